use chrono::{NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::db::Database;
use crate::error::{JournalError, Result};
use crate::models::LIQUIDATION_PNL_PERCENT;

const DAY_SECS: i64 = 24 * 60 * 60;

/// Window of close dates the statistics look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DateRange {
    Today,
    Week,
    Month,
    ThreeMonths,
    SixMonths,
    Year,
    #[default]
    All,
}

impl DateRange {
    /// Earliest close date (unix seconds) inside the range.
    pub fn threshold(&self, now: chrono::DateTime<Utc>) -> Option<i64> {
        let days = match self {
            DateRange::Today => {
                return Some(now.date_naive().and_time(NaiveTime::MIN).and_utc().timestamp());
            }
            DateRange::Week => 7,
            DateRange::Month => 30,
            DateRange::ThreeMonths => 90,
            DateRange::SixMonths => 180,
            DateRange::Year => 365,
            DateRange::All => return None,
        };
        Some(now.timestamp() - days * DAY_SECS)
    }
}

impl FromStr for DateRange {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "today" => Ok(DateRange::Today),
            "week" => Ok(DateRange::Week),
            "month" => Ok(DateRange::Month),
            "3months" => Ok(DateRange::ThreeMonths),
            "6months" => Ok(DateRange::SixMonths),
            "year" => Ok(DateRange::Year),
            "all" | "" => Ok(DateRange::All),
            other => Err(JournalError::Validation(format!(
                "unknown date range '{}' (today, week, month, 3months, 6months, year, all)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalStats {
    /// Closed records in range
    pub total_trades: i64,
    pub wins: i64,
    pub losses: i64,
    pub liquidations: i64,
    pub open_positions: i64,
    /// Whole percent of closed records with positive pnl
    pub win_rate: f64,
    pub total_net_pnl: f64,
    pub total_fees: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub profit_factor: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityCurvePoint {
    pub date: String,
    pub cumulative_pnl: f64,
    pub daily_pnl: f64,
    pub trade_count: i32,
}

// date_filter is one of two constant strings; every value goes through parameters.
fn date_filter(range: DateRange) -> (&'static str, Option<i64>) {
    match range.threshold(Utc::now()) {
        Some(threshold) => ("AND close_date >= ?2", Some(threshold)),
        None => ("AND ?2 IS NULL", None),
    }
}

pub fn get_journal_stats(db: &Database, user_id: &str, range: DateRange) -> Result<JournalStats> {
    let conn = db.lock()?;
    let (filter, threshold) = date_filter(range);

    let query = format!(
        "SELECT
            COUNT(*),
            COALESCE(SUM(CASE WHEN pnl > 0 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN pnl < 0 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN pnl <= ?3 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(realized_pnl_value), 0.0),
            COALESCE(SUM(fees), 0.0),
            COALESCE(SUM(CASE WHEN realized_pnl_value > 0 THEN realized_pnl_value END), 0.0),
            COALESCE(ABS(SUM(CASE WHEN realized_pnl_value < 0 THEN realized_pnl_value END)), 0.0),
            COALESCE(MAX(realized_pnl_value), 0.0),
            COALESCE(MIN(realized_pnl_value), 0.0)
         FROM trades
         WHERE user_id = ?1 AND status = 'Closed' {}",
        filter
    );

    let mut stats = conn.query_row(
        &query,
        rusqlite::params![user_id, threshold, LIQUIDATION_PNL_PERCENT],
        |row| {
            Ok(JournalStats {
                total_trades: row.get(0)?,
                wins: row.get(1)?,
                losses: row.get(2)?,
                liquidations: row.get(3)?,
                open_positions: 0,
                win_rate: 0.0,
                total_net_pnl: row.get(4)?,
                total_fees: row.get(5)?,
                gross_profit: row.get(6)?,
                gross_loss: row.get(7)?,
                profit_factor: 0.0,
                best_trade: row.get(8)?,
                worst_trade: row.get(9)?,
            })
        },
    )?;

    stats.open_positions = conn.query_row(
        "SELECT COUNT(*) FROM trades WHERE user_id = ? AND status = 'Open'",
        [user_id],
        |row| row.get(0),
    )?;

    stats.win_rate = if stats.total_trades > 0 {
        (stats.wins as f64 / stats.total_trades as f64 * 100.0).round()
    } else {
        0.0
    };

    stats.profit_factor = if stats.gross_loss > 0.0 {
        stats.gross_profit / stats.gross_loss
    } else if stats.gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    Ok(stats)
}

/// Net pnl per UTC close day, with the running total.
pub fn get_equity_curve(
    db: &Database,
    user_id: &str,
    range: DateRange,
) -> Result<Vec<EquityCurvePoint>> {
    let conn = db.lock()?;
    let (filter, threshold) = date_filter(range);

    let mut stmt = conn.prepare(&format!(
        "SELECT close_date, realized_pnl_value
         FROM trades
         WHERE user_id = ?1
         AND status = 'Closed'
         AND close_date IS NOT NULL
         AND realized_pnl_value IS NOT NULL
         {}
         ORDER BY close_date ASC",
        filter
    ))?;

    let rows = stmt.query_map(rusqlite::params![user_id, threshold], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
    })?;

    let mut daily: BTreeMap<String, (f64, i32)> = BTreeMap::new();
    for row in rows {
        let (close_timestamp, pnl) = row?;
        let date = chrono::DateTime::from_timestamp(close_timestamp, 0)
            .ok_or_else(|| JournalError::Validation(format!("invalid close date {}", close_timestamp)))?
            .format("%Y-%m-%d")
            .to_string();

        let entry = daily.entry(date).or_insert((0.0, 0));
        entry.0 += pnl;
        entry.1 += 1;
    }

    let mut cumulative_pnl = 0.0;
    Ok(daily
        .into_iter()
        .map(|(date, (daily_pnl, trade_count))| {
            cumulative_pnl += daily_pnl;
            EquityCurvePoint {
                date,
                cumulative_pnl,
                daily_pnl,
                trade_count,
            }
        })
        .collect())
}
