use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{JournalError, Result};

/// A closed record at or below this pnl (%) lost its whole margin.
pub const LIQUIDATION_PNL_PERCENT: f64 = -100.0;

/// Implements the string plumbing shared by the journal's enums: canonical
/// names for SQLite and CSV, case-insensitive parsing for user input.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = JournalError;

            fn from_str(s: &str) -> Result<Self> {
                $(
                    if s.trim().eq_ignore_ascii_case($text) {
                        return Ok($name::$variant);
                    }
                )+
                Err(JournalError::Validation(format!(
                    "unknown {} '{}'",
                    stringify!($name),
                    s
                )))
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                text.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Position {
    #[default]
    Long,
    Short,
}

text_enum!(Position { Long => "Long", Short => "Short" });

/// Which side of the book an order sat on; selects the maker or taker rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeType {
    Maker,
    Taker,
}

text_enum!(FeeType { Maker => "Maker", Taker => "Taker" });

impl FeeType {
    pub fn default_entry() -> Self {
        FeeType::Maker
    }

    pub fn default_exit() -> Self {
        FeeType::Taker
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TradeStatus {
    #[default]
    Open,
    Closed,
}

text_enum!(TradeStatus { Open => "Open", Closed => "Closed" });

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub exchange: String,
    pub position: Position,
    pub leverage: f64,
    pub margin: f64,
    pub entry_price: Option<f64>,
    pub close_price: Option<f64>,
    pub entry_type: FeeType,
    pub exit_type: FeeType,
    pub status: TradeStatus,
    pub open_date: i64,
    pub close_date: Option<i64>,

    // Derived at save time
    pub pnl: Option<f64>,
    pub gross_pnl: Option<f64>,
    pub fees: Option<f64>,
    pub realized_pnl_value: Option<f64>,

    #[serde(default)]
    pub entry_memo: String,
    #[serde(default)]
    pub exit_memo: String,
    #[serde(default)]
    pub exit_reason: String,
    #[serde(default)]
    pub strategy: String,

    pub created_at: i64,
    pub updated_at: i64,
}

impl TradeRecord {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    pub fn is_liquidated(&self) -> bool {
        self.pnl.is_some_and(|pnl| pnl <= LIQUIDATION_PNL_PERCENT)
    }

    /// Entry and exit memos as one line of text.
    pub fn memo(&self) -> String {
        format!("{} {}", self.entry_memo, self.exit_memo)
            .trim()
            .to_string()
    }

    /// Records a new close price. The first non-empty close price closes an
    /// open record and stamps `close_date` unless one is already set; later
    /// edits only change the price.
    pub fn set_close_price(&mut self, price: Option<f64>, now: i64) {
        let price = non_blank(price);
        let first_close = self.close_price.is_none() && price.is_some();
        self.close_price = price;

        if first_close && self.is_open() {
            self.status = TradeStatus::Closed;
            self.close_date.get_or_insert(now);
        }
    }

    /// The manual "position closed" toggle. Reopening keeps the close date.
    pub fn set_closed(&mut self, closed: bool, now: i64) {
        if closed {
            self.status = TradeStatus::Closed;
            self.close_date.get_or_insert(now);
        } else {
            self.status = TradeStatus::Open;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(JournalError::Validation("symbol is required".into()));
        }
        if !(self.leverage.is_finite() && self.leverage > 0.0) {
            return Err(JournalError::Validation(format!(
                "leverage must be positive, got {}",
                self.leverage
            )));
        }
        if !(self.margin.is_finite() && self.margin >= 0.0) {
            return Err(JournalError::Validation(format!(
                "margin must not be negative, got {}",
                self.margin
            )));
        }
        for (label, price) in [("entry price", self.entry_price), ("close price", self.close_price)] {
            if let Some(p) = price {
                if !(p.is_finite() && p > 0.0) {
                    return Err(JournalError::Validation(format!(
                        "{} must be positive, got {}",
                        label, p
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A zero price is what a blank form field turns into.
pub fn non_blank(price: Option<f64>) -> Option<f64> {
    price.filter(|p| *p != 0.0)
}

fn default_leverage() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTradeInput {
    pub symbol: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
    #[serde(default)]
    pub margin: f64,
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub close_price: Option<f64>,
    #[serde(default = "FeeType::default_entry")]
    pub entry_type: FeeType,
    #[serde(default = "FeeType::default_exit")]
    pub exit_type: FeeType,
    /// Defaults to now
    #[serde(default)]
    pub open_date: Option<i64>,
    #[serde(default)]
    pub close_date: Option<i64>,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub entry_memo: String,
    #[serde(default)]
    pub exit_memo: String,
    #[serde(default)]
    pub exit_reason: String,
    #[serde(default)]
    pub strategy: String,
}

impl CreateTradeInput {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: String::new(),
            position: Position::Long,
            leverage: default_leverage(),
            margin: 0.0,
            entry_price: None,
            close_price: None,
            entry_type: FeeType::default_entry(),
            exit_type: FeeType::default_exit(),
            open_date: None,
            close_date: None,
            closed: false,
            entry_memo: String::new(),
            exit_memo: String::new(),
            exit_reason: String::new(),
            strategy: String::new(),
        }
    }
}

/// Partial edit of a record. `close_price` and `close_date` tell "leave as
/// is" (`None`) apart from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradePatch {
    pub symbol: Option<String>,
    pub exchange: Option<String>,
    pub position: Option<Position>,
    pub leverage: Option<f64>,
    pub margin: Option<f64>,
    pub entry_price: Option<f64>,
    #[serde(default, deserialize_with = "double_option")]
    pub close_price: Option<Option<f64>>,
    pub entry_type: Option<FeeType>,
    pub exit_type: Option<FeeType>,
    pub open_date: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    pub close_date: Option<Option<i64>>,
    pub closed: Option<bool>,
    pub entry_memo: Option<String>,
    pub exit_memo: Option<String>,
    pub exit_reason: Option<String>,
    pub strategy: Option<String>,
}

fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeFilters {
    /// Case-insensitive substring over symbol, strategy, exchange and entry memo
    pub search: Option<String>,
    /// Exact symbol; `ALL` means any
    pub symbol: Option<String>,
    pub status: Option<TradeStatus>,
}
