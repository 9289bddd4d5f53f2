use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::commands::settings::load_settings;
use crate::db::Database;
use crate::error::{JournalError, Result};
use crate::journal::{self, filter_records};
use crate::models::{
    non_blank, CreateTradeInput, FeeType, TradeFilters, TradePatch, TradeRecord, TradeStatus,
};

const TRADE_COLUMNS: &str = "id, user_id, symbol, exchange, position, leverage, margin, \
     entry_price, close_price, entry_type, exit_type, status, open_date, close_date, \
     pnl, gross_pnl, fees, realized_pnl_value, entry_memo, exit_memo, exit_reason, strategy, \
     created_at, updated_at";

/// Helper function to map a database row to a TradeRecord
fn map_row_to_trade(row: &rusqlite::Row) -> rusqlite::Result<TradeRecord> {
    Ok(TradeRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        symbol: row.get(2)?,
        exchange: row.get(3)?,
        position: row.get(4)?,
        leverage: row.get(5)?,
        margin: row.get(6)?,
        entry_price: row.get(7)?,
        close_price: row.get(8)?,
        entry_type: row.get(9)?,
        exit_type: row.get(10)?,
        status: row.get(11)?,
        open_date: row.get(12)?,
        close_date: row.get(13)?,
        pnl: row.get(14)?,
        gross_pnl: row.get(15)?,
        fees: row.get(16)?,
        realized_pnl_value: row.get(17)?,
        entry_memo: row.get(18)?,
        exit_memo: row.get(19)?,
        exit_reason: row.get(20)?,
        strategy: row.get(21)?,
        created_at: row.get(22)?,
        updated_at: row.get(23)?,
    })
}

/// Every record of `user_id`, newest open date first.
pub(crate) fn query_trades(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<TradeRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM trades WHERE user_id = ? ORDER BY open_date DESC, created_at DESC, id",
        TRADE_COLUMNS
    ))?;
    let rows = stmt.query_map([user_id], map_row_to_trade)?;
    rows.collect()
}

fn query_trade(conn: &Connection, user_id: &str, id: &str) -> Result<TradeRecord> {
    conn.query_row(
        &format!("SELECT {} FROM trades WHERE user_id = ? AND id = ?", TRADE_COLUMNS),
        params![user_id, id],
        map_row_to_trade,
    )
    .optional()?
    .ok_or_else(|| JournalError::trade_not_found(id))
}

/// Inserts or overwrites a record by id.
pub(crate) fn save_trade(conn: &Connection, trade: &TradeRecord) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "REPLACE INTO trades ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TRADE_COLUMNS
        ),
        params![
            trade.id,
            trade.user_id,
            trade.symbol,
            trade.exchange,
            trade.position,
            trade.leverage,
            trade.margin,
            trade.entry_price,
            trade.close_price,
            trade.entry_type,
            trade.exit_type,
            trade.status,
            trade.open_date,
            trade.close_date,
            trade.pnl,
            trade.gross_pnl,
            trade.fees,
            trade.realized_pnl_value,
            trade.entry_memo,
            trade.exit_memo,
            trade.exit_reason,
            trade.strategy,
            trade.created_at,
            trade.updated_at,
        ],
    )?;
    Ok(())
}

fn new_trade_id() -> String {
    format!("TRADE-{}-{}", Utc::now().timestamp_millis(), uuid::Uuid::new_v4())
}

/// Validates, derives pnl/fees from the user's fee table, and stores.
fn finalize_and_save(conn: &Connection, trade: &mut TradeRecord) -> Result<()> {
    trade.validate()?;
    let settings = load_settings(conn, &trade.user_id)?;
    journal::apply_to_record(trade, &settings.exchanges);
    save_trade(conn, trade)?;
    Ok(())
}

pub fn get_trades(
    db: &Database,
    user_id: &str,
    filters: Option<&TradeFilters>,
) -> Result<Vec<TradeRecord>> {
    let conn = db.lock()?;
    let trades = query_trades(&conn, user_id)?;

    Ok(match filters {
        Some(f) => filter_records(&trades, f).into_iter().cloned().collect(),
        None => trades,
    })
}

pub fn get_trade(db: &Database, user_id: &str, id: &str) -> Result<TradeRecord> {
    let conn = db.lock()?;
    query_trade(&conn, user_id, id)
}

pub fn list_symbols(db: &Database, user_id: &str) -> Result<Vec<String>> {
    let trades = get_trades(db, user_id, None)?;
    Ok(journal::unique_symbols(&trades))
}

pub fn create_trade(db: &Database, user_id: &str, input: CreateTradeInput) -> Result<TradeRecord> {
    let now = Utc::now().timestamp();

    let mut trade = TradeRecord {
        id: new_trade_id(),
        user_id: user_id.to_string(),
        symbol: input.symbol.trim().to_uppercase(),
        exchange: input.exchange.trim().to_string(),
        position: input.position,
        leverage: input.leverage,
        margin: input.margin,
        entry_price: non_blank(input.entry_price),
        close_price: None,
        entry_type: input.entry_type,
        exit_type: input.exit_type,
        status: TradeStatus::Open,
        open_date: input.open_date.unwrap_or(now),
        close_date: input.close_date,
        pnl: None,
        gross_pnl: None,
        fees: None,
        realized_pnl_value: None,
        entry_memo: input.entry_memo,
        exit_memo: input.exit_memo,
        exit_reason: input.exit_reason,
        strategy: input.strategy,
        created_at: now,
        updated_at: now,
    };
    trade.set_close_price(input.close_price, now);
    if input.closed {
        trade.set_closed(true, now);
    }

    let conn = db.lock()?;
    finalize_and_save(&conn, &mut trade)?;

    log::info!("Created trade {} ({} {})", trade.id, trade.symbol, trade.position);
    Ok(trade)
}

/// Applies `patch` in form order: plain fields, explicit close date, close
/// price (which may close the record), then the manual closed toggle.
fn apply_patch(trade: &mut TradeRecord, patch: TradePatch, now: i64) {
    if let Some(symbol) = patch.symbol {
        trade.symbol = symbol.trim().to_uppercase();
    }
    if let Some(exchange) = patch.exchange {
        trade.exchange = exchange.trim().to_string();
    }
    if let Some(position) = patch.position {
        trade.position = position;
    }
    if let Some(leverage) = patch.leverage {
        trade.leverage = leverage;
    }
    if let Some(margin) = patch.margin {
        trade.margin = margin;
    }
    if let Some(entry_price) = patch.entry_price {
        trade.entry_price = non_blank(Some(entry_price));
    }
    if let Some(entry_type) = patch.entry_type {
        trade.entry_type = entry_type;
    }
    if let Some(exit_type) = patch.exit_type {
        trade.exit_type = exit_type;
    }
    if let Some(open_date) = patch.open_date {
        trade.open_date = open_date;
    }
    if let Some(entry_memo) = patch.entry_memo {
        trade.entry_memo = entry_memo;
    }
    if let Some(exit_memo) = patch.exit_memo {
        trade.exit_memo = exit_memo;
    }
    if let Some(exit_reason) = patch.exit_reason {
        trade.exit_reason = exit_reason;
    }
    if let Some(strategy) = patch.strategy {
        trade.strategy = strategy;
    }
    if let Some(close_date) = patch.close_date {
        trade.close_date = close_date;
    }
    if let Some(close_price) = patch.close_price {
        trade.set_close_price(close_price, now);
    }
    if let Some(closed) = patch.closed {
        trade.set_closed(closed, now);
    }
    trade.updated_at = now;
}

pub fn update_trade(
    db: &Database,
    user_id: &str,
    id: &str,
    patch: TradePatch,
) -> Result<TradeRecord> {
    let conn = db.lock()?;
    let mut trade = query_trade(&conn, user_id, id)?;

    apply_patch(&mut trade, patch, Utc::now().timestamp());
    finalize_and_save(&conn, &mut trade)?;

    log::info!("Updated trade {} (status {})", trade.id, trade.status);
    Ok(trade)
}

/// What the exit half of the trade form submits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseTradeInput {
    pub close_price: f64,
    pub exit_type: Option<FeeType>,
    pub close_date: Option<i64>,
    pub exit_reason: Option<String>,
    pub exit_memo: Option<String>,
}

pub fn close_trade(
    db: &Database,
    user_id: &str,
    id: &str,
    input: CloseTradeInput,
) -> Result<TradeRecord> {
    if !(input.close_price.is_finite() && input.close_price > 0.0) {
        return Err(JournalError::Validation(format!(
            "close price must be positive, got {}",
            input.close_price
        )));
    }

    let patch = TradePatch {
        close_price: Some(Some(input.close_price)),
        close_date: input.close_date.map(Some),
        exit_type: input.exit_type,
        exit_reason: input.exit_reason,
        exit_memo: input.exit_memo,
        ..Default::default()
    };
    update_trade(db, user_id, id, patch)
}

pub fn reopen_trade(db: &Database, user_id: &str, id: &str) -> Result<TradeRecord> {
    let patch = TradePatch {
        closed: Some(false),
        ..Default::default()
    };
    update_trade(db, user_id, id, patch)
}

pub fn delete_trade(db: &Database, user_id: &str, id: &str) -> Result<()> {
    let conn = db.lock()?;
    let deleted = conn.execute(
        "DELETE FROM trades WHERE user_id = ? AND id = ?",
        params![user_id, id],
    )?;
    if deleted == 0 {
        return Err(JournalError::trade_not_found(id));
    }
    log::info!("Deleted trade {}", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::settings::upsert_exchange;
    use crate::models::{ExchangeFeeProfile, Position};

    const USER: &str = "user-1";

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn btc_long() -> CreateTradeInput {
        CreateTradeInput {
            exchange: "Binance".into(),
            leverage: 10.0,
            margin: 100.0,
            entry_price: Some(100.0),
            open_date: Some(1_700_000_000),
            ..CreateTradeInput::new("btcusdt")
        }
    }

    #[test]
    fn create_open_trade_has_no_derived_fields() {
        let db = db();
        let trade = create_trade(&db, USER, btc_long()).unwrap();

        assert!(trade.id.starts_with("TRADE-"));
        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.status, TradeStatus::Open);
        assert_eq!(trade.close_date, None);
        assert_eq!(trade.pnl, None);
        assert_eq!(trade.fees, None);
        assert_eq!(trade.realized_pnl_value, None);

        let stored = get_trade(&db, USER, &trade.id).unwrap();
        assert_eq!(stored, trade);
    }

    #[test]
    fn create_with_close_price_closes_and_calculates() {
        let db = db();
        let input = CreateTradeInput {
            close_price: Some(110.0),
            exit_type: FeeType::Maker,
            ..btc_long()
        };
        let trade = create_trade(&db, USER, input).unwrap();

        assert_eq!(trade.status, TradeStatus::Closed);
        assert!(trade.close_date.is_some());
        assert_eq!(trade.pnl, Some(100.0));
        assert_eq!(trade.gross_pnl, Some(100.0));
        // Binance default maker fee 0.02% on both legs
        assert_eq!(trade.fees, Some(0.42));
        assert_eq!(trade.realized_pnl_value, Some(99.58));
    }

    #[test]
    fn unknown_exchange_falls_back_to_flat_fee() {
        let db = db();
        let input = CreateTradeInput {
            exchange: "NoSuchEx".into(),
            close_price: Some(110.0),
            ..btc_long()
        };
        let trade = create_trade(&db, USER, input).unwrap();
        assert_eq!(trade.fees, Some(0.84));
    }

    #[test]
    fn fees_follow_the_users_own_table() {
        let db = db();
        upsert_exchange(&db, USER, ExchangeFeeProfile::new("binance", "Binance", 0.1, 0.1)).unwrap();

        let input = CreateTradeInput {
            close_price: Some(110.0),
            ..btc_long()
        };
        let trade = create_trade(&db, USER, input).unwrap();
        // 1000 * 0.001 + 1100 * 0.001
        assert_eq!(trade.fees, Some(2.1));
    }

    #[test]
    fn closing_later_stamps_date_once() {
        let db = db();
        let trade = create_trade(&db, USER, btc_long()).unwrap();

        let input = CloseTradeInput {
            close_price: 90.0,
            exit_type: Some(FeeType::Taker),
            close_date: None,
            exit_reason: Some("stop hit".into()),
            exit_memo: None,
        };
        let closed = close_trade(&db, USER, &trade.id, input).unwrap();
        assert_eq!(closed.status, TradeStatus::Closed);
        assert_eq!(closed.pnl, Some(-100.0));
        assert!(closed.is_liquidated());
        let first_close_date = closed.close_date;
        assert!(first_close_date.is_some());

        let patch = TradePatch {
            close_price: Some(Some(95.0)),
            ..Default::default()
        };
        let edited = update_trade(&db, USER, &trade.id, patch).unwrap();
        assert_eq!(edited.close_date, first_close_date);
        assert_eq!(edited.pnl, Some(-50.0));
    }

    #[test]
    fn clearing_close_price_blanks_derived_fields() {
        let db = db();
        let input = CreateTradeInput {
            close_price: Some(110.0),
            ..btc_long()
        };
        let trade = create_trade(&db, USER, input).unwrap();

        let patch: TradePatch = serde_json::from_str(r#"{"close_price": null, "closed": false}"#).unwrap();
        let reopened = update_trade(&db, USER, &trade.id, patch).unwrap();

        assert_eq!(reopened.status, TradeStatus::Open);
        assert_eq!(reopened.close_price, None);
        assert_eq!(reopened.pnl, None);
        assert_eq!(reopened.realized_pnl_value, None);
        assert_eq!(reopened.close_date, trade.close_date);
    }

    #[test]
    fn short_trade_profits_on_drop() {
        let db = db();
        let input = CreateTradeInput {
            position: Position::Short,
            close_price: Some(90.0),
            ..btc_long()
        };
        let trade = create_trade(&db, USER, input).unwrap();
        assert_eq!(trade.pnl, Some(100.0));
    }

    #[test]
    fn invalid_input_is_rejected_and_not_stored() {
        let db = db();
        let input = CreateTradeInput {
            leverage: 0.0,
            ..btc_long()
        };
        assert!(matches!(
            create_trade(&db, USER, input),
            Err(JournalError::Validation(_))
        ));
        assert!(get_trades(&db, USER, None).unwrap().is_empty());
    }

    #[test]
    fn records_are_scoped_per_user_and_ordered_newest_first() {
        let db = db();
        let older = create_trade(&db, USER, btc_long()).unwrap();
        let newer = create_trade(
            &db,
            USER,
            CreateTradeInput {
                open_date: Some(1_800_000_000),
                ..CreateTradeInput::new("eth")
            },
        )
        .unwrap();
        create_trade(&db, "someone-else", btc_long()).unwrap();

        let trades = get_trades(&db, USER, None).unwrap();
        let ids: Vec<_> = trades.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![newer.id.as_str(), older.id.as_str()]);

        assert!(matches!(
            get_trade(&db, "someone-else", &older.id),
            Err(JournalError::NotFound { .. })
        ));
    }

    #[test]
    fn filters_and_symbols() {
        let db = db();
        create_trade(&db, USER, btc_long()).unwrap();
        create_trade(
            &db,
            USER,
            CreateTradeInput {
                strategy: "RSI Divergence".into(),
                ..CreateTradeInput::new("ethusdt")
            },
        )
        .unwrap();

        let filters = TradeFilters {
            search: Some("rsi".into()),
            ..Default::default()
        };
        let found = get_trades(&db, USER, Some(&filters)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].symbol, "ETHUSDT");

        assert_eq!(list_symbols(&db, USER).unwrap(), vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn delete_removes_only_the_owners_record() {
        let db = db();
        let trade = create_trade(&db, USER, btc_long()).unwrap();

        assert!(delete_trade(&db, "intruder", &trade.id).is_err());
        delete_trade(&db, USER, &trade.id).unwrap();
        assert!(get_trades(&db, USER, None).unwrap().is_empty());
        assert!(delete_trade(&db, USER, &trade.id).is_err());
    }
}
