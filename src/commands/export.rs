use chrono::{DateTime, NaiveDate, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::commands::trades::get_trades;
use crate::db::Database;
use crate::error::{JournalError, Result};
use crate::models::{TradeFilters, TradeRecord};

const BOM: &str = "\u{FEFF}";
const MISSING: &str = "-";

pub const CSV_HEADER: [&str; 12] = [
    "Date",
    "Exchange",
    "Symbol",
    "Position",
    "Entry Price",
    "Close Price",
    "Leverage",
    "PnL (%)",
    "Net PnL ($)",
    "Fees ($)",
    "Strategy",
    "Memo",
];

pub fn export_filename(date: NaiveDate) -> String {
    format!("trading_log_{}.csv", date.format("%Y-%m-%d"))
}

fn format_date(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn or_missing(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| MISSING.to_string())
}

fn text_or_missing(value: &str) -> String {
    if value.trim().is_empty() {
        MISSING.to_string()
    } else {
        value.to_string()
    }
}

fn csv_row(record: &TradeRecord) -> [String; 12] {
    // One record per line, whatever the memo holds
    let memo = record.memo().replace(['\r', '\n'], " ");

    [
        format_date(record.open_date),
        text_or_missing(&record.exchange),
        record.symbol.clone(),
        record.position.to_string(),
        or_missing(record.entry_price),
        or_missing(record.close_price),
        record.leverage.to_string(),
        or_missing(record.pnl),
        or_missing(record.realized_pnl_value),
        or_missing(record.fees),
        text_or_missing(&record.strategy),
        memo,
    ]
}

/// BOM-prefixed CSV, header first, one line per record in the given order.
pub fn records_to_csv(records: &[TradeRecord]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(BOM.as_bytes().to_vec());

    writer.write_record(CSV_HEADER)?;
    for record in records {
        writer.write_record(csv_row(record))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| JournalError::Csv(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| JournalError::Csv(e.to_string()))
}

/// Writes `trading_log_<date>.csv` into `dir` and returns its path.
pub fn export_csv(
    db: &Database,
    user_id: &str,
    filters: Option<&TradeFilters>,
    dir: &Path,
) -> Result<PathBuf> {
    let records = get_trades(db, user_id, filters)?;
    let content = records_to_csv(&records)?;

    fs::create_dir_all(dir)?;
    let path = dir.join(export_filename(Utc::now().date_naive()));
    fs::write(&path, content)?;

    log::info!("Exported {} records to {}", records.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::test_support::record;

    fn sample() -> Vec<TradeRecord> {
        let mut closed = record("BTCUSDT", "Binance");
        closed.entry_price = Some(100.0);
        closed.close_price = Some(110.0);
        closed.leverage = 10.0;
        closed.pnl = Some(100.0);
        closed.fees = Some(0.42);
        closed.realized_pnl_value = Some(99.58);
        closed.strategy = "Range Breakout".into();
        closed.entry_memo = "entry, with comma".into();
        closed.exit_memo = "took profit\nat target".into();

        let mut open = record("ETHUSDT", "");
        open.entry_price = Some(2500.5);

        vec![closed, open, record("SOLUSDT", "Upbit")]
    }

    #[test]
    fn output_starts_with_bom_and_has_one_line_per_record() {
        let records = sample();
        let csv = records_to_csv(&records).unwrap();

        assert!(csv.starts_with(BOM));
        assert_eq!(csv.lines().count(), records.len() + 1);
    }

    #[test]
    fn rows_follow_header_order() {
        let records = sample();
        let csv = records_to_csv(&records).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(csv.trim_start_matches(BOM).as_bytes());

        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, CSV_HEADER);

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert_eq!(row.len(), CSV_HEADER.len());
        }

        let first = &rows[0];
        assert_eq!(&first[0], "2023-11-14 22:13");
        assert_eq!(&first[1], "Binance");
        assert_eq!(&first[2], "BTCUSDT");
        assert_eq!(&first[3], "Long");
        assert_eq!(&first[4], "100");
        assert_eq!(&first[5], "110");
        assert_eq!(&first[6], "10");
        assert_eq!(&first[7], "100");
        assert_eq!(&first[8], "99.58");
        assert_eq!(&first[9], "0.42");
        assert_eq!(&first[10], "Range Breakout");
        assert_eq!(&first[11], "entry, with comma took profit at target");

        let open = &rows[1];
        assert_eq!(&open[1], "-");
        assert_eq!(&open[5], "-");
        assert_eq!(&open[7], "-");
        assert_eq!(&open[10], "-");
    }

    #[test]
    fn empty_journal_exports_header_only() {
        let csv = records_to_csv(&[]).unwrap();
        assert_eq!(csv.lines().count(), 1);
    }

    #[test]
    fn filename_uses_iso_date() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        assert_eq!(export_filename(date), "trading_log_2026-10-18.csv");
    }

    #[test]
    fn export_writes_file_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        crate::commands::trades::create_trade(
            &db,
            "u1",
            crate::models::CreateTradeInput::new("btc"),
        )
        .unwrap();

        let path = export_csv(&db, "u1", None, dir.path()).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("trading_log_"));
        assert_eq!(content.lines().count(), 2);
    }
}
