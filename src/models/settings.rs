use serde::{Deserialize, Serialize};

use crate::error::{JournalError, Result};
use crate::models::FeeType;

/// Fee rate (%) used when a record's exchange has no profile.
pub const FALLBACK_FEE_PERCENT: f64 = 0.04;

pub const DEFAULT_QUOTE: &str = "Records turn into skill.";

/// Maker/taker fees of one exchange, in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeFeeProfile {
    pub id: String,
    pub name: String,
    pub maker_fee: f64,
    pub taker_fee: f64,
}

impl ExchangeFeeProfile {
    pub fn new(id: &str, name: &str, maker_fee: f64, taker_fee: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            maker_fee,
            taker_fee,
        }
    }

    pub fn fee_percent(&self, fee_type: FeeType) -> f64 {
        match fee_type {
            FeeType::Maker => self.maker_fee,
            FeeType::Taker => self.taker_fee,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(JournalError::Validation("exchange name is required".into()));
        }
        for (label, fee) in [("maker fee", self.maker_fee), ("taker fee", self.taker_fee)] {
            if !(fee.is_finite() && fee >= 0.0) {
                return Err(JournalError::Validation(format!(
                    "{} must not be negative, got {}",
                    label, fee
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyNote {
    pub id: String,
    pub title: String,
    pub description: String,
}

impl StrategyNote {
    pub fn new(id: &str, title: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(JournalError::Validation("strategy title is required".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub user_id: String,
    pub quote: String,
    pub exchanges: Vec<ExchangeFeeProfile>,
    pub strategies: Vec<StrategyNote>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Settings {
    /// What a user sees before saving any settings of their own.
    pub fn defaults_for(user_id: &str, now: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            quote: DEFAULT_QUOTE.to_string(),
            exchanges: vec![
                ExchangeFeeProfile::new("binance", "Binance", 0.02, 0.05),
                ExchangeFeeProfile::new("bybit", "Bybit", 0.01, 0.06),
                ExchangeFeeProfile::new("upbit", "Upbit", 0.05, 0.05),
            ],
            strategies: vec![
                StrategyNote::new(
                    "rsi_div",
                    "RSI Divergence",
                    "Trade the gap between price and indicator in overbought/oversold zones",
                ),
                StrategyNote::new(
                    "breakout",
                    "Range Breakout",
                    "Enter when a long sideways range breaks on strong volume",
                ),
                StrategyNote::new(
                    "bband",
                    "Bollinger Bands",
                    "Trade support at the lower band or resistance at the upper band",
                ),
            ],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn find_exchange(&self, name: &str) -> Option<&ExchangeFeeProfile> {
        self.exchanges.iter().find(|ex| ex.name == name)
    }

    /// Same rules the single-profile and single-strategy edits enforce.
    pub fn validate(&self) -> Result<()> {
        for exchange in &self.exchanges {
            exchange.validate()?;
        }
        for strategy in &self.strategies {
            strategy.validate()?;
        }
        Ok(())
    }
}

/// Fields left as `None` keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSettingsInput {
    pub quote: Option<String>,
    pub exchanges: Option<Vec<ExchangeFeeProfile>>,
    pub strategies: Option<Vec<StrategyNote>>,
}
