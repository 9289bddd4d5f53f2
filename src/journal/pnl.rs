//! Trade economics derived when a record is saved.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::models::{
    non_blank, ExchangeFeeProfile, FeeType, Position, TradeRecord, FALLBACK_FEE_PERCENT,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnlInput {
    pub entry_price: Option<f64>,
    pub close_price: Option<f64>,
    pub leverage: f64,
    pub margin: f64,
    pub position: Position,
    pub entry_type: FeeType,
    pub exit_type: FeeType,
}

impl From<&TradeRecord> for PnlInput {
    fn from(record: &TradeRecord) -> Self {
        Self {
            entry_price: record.entry_price,
            close_price: record.close_price,
            leverage: record.leverage,
            margin: record.margin,
            position: record.position,
            entry_type: record.entry_type,
            exit_type: record.exit_type,
        }
    }
}

/// All values rounded to cents; `pnl_percent` is the leveraged return on margin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PnlBreakdown {
    pub pnl_percent: f64,
    pub position_size: f64,
    pub entry_fee: f64,
    pub exit_fee: f64,
    pub fees: f64,
    pub gross_pnl: f64,
    pub realized_pnl_value: f64,
}

/// Rounds to cents on the exact stored value, halves away from zero.
/// `0.015` is stored just below the half and rounds to `0.01`.
pub fn round2(value: f64) -> f64 {
    Decimal::from_f64_retain(value)
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Fee rate as a fraction, falling back to the flat rate for unknown exchanges.
fn fee_rate(profile: Option<&ExchangeFeeProfile>, fee_type: FeeType) -> f64 {
    profile
        .map(|p| p.fee_percent(fee_type))
        .unwrap_or(FALLBACK_FEE_PERCENT)
        / 100.0
}

/// Returns `None` unless entry price, close price and leverage are all
/// present and non-zero. A missing margin counts as zero.
pub fn calculate(input: &PnlInput, profile: Option<&ExchangeFeeProfile>) -> Option<PnlBreakdown> {
    let entry = non_blank(input.entry_price)?;
    let close = non_blank(input.close_price)?;
    let leverage = input.leverage;
    if leverage == 0.0 || !leverage.is_finite() {
        return None;
    }
    let margin = if input.margin.is_finite() { input.margin } else { 0.0 };

    let direction = match input.position {
        Position::Long => close - entry,
        Position::Short => entry - close,
    };
    let pnl_percent = (direction / entry) * 100.0 * leverage;

    let position_size = margin * leverage;
    let entry_fee = position_size * fee_rate(profile, input.entry_type);
    let exit_value = position_size * (1.0 + pnl_percent / 100.0 / leverage);
    let exit_fee = exit_value * fee_rate(profile, input.exit_type);
    let fees = entry_fee + exit_fee;

    let gross_pnl = margin * (pnl_percent / 100.0);

    Some(PnlBreakdown {
        pnl_percent: round2(pnl_percent),
        position_size: round2(position_size),
        entry_fee: round2(entry_fee),
        exit_fee: round2(exit_fee),
        fees: round2(fees),
        gross_pnl: round2(gross_pnl),
        realized_pnl_value: round2(gross_pnl - fees),
    })
}

/// Recomputes the derived fields of `record` against the user's fee table.
/// Records that fail the input guard end up with blank derived fields.
pub fn apply_to_record(record: &mut TradeRecord, exchanges: &[ExchangeFeeProfile]) {
    let profile = exchanges.iter().find(|ex| ex.name == record.exchange);
    let breakdown = calculate(&PnlInput::from(&*record), profile);

    record.pnl = breakdown.map(|b| b.pnl_percent);
    record.gross_pnl = breakdown.map(|b| b.gross_pnl);
    record.fees = breakdown.map(|b| b.fees);
    record.realized_pnl_value = breakdown.map(|b| b.realized_pnl_value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    fn input(position: Position, entry: f64, close: f64) -> PnlInput {
        PnlInput {
            entry_price: Some(entry),
            close_price: Some(close),
            leverage: 10.0,
            margin: 100.0,
            position,
            entry_type: FeeType::Maker,
            exit_type: FeeType::Maker,
        }
    }

    fn flat_fees(percent: f64) -> ExchangeFeeProfile {
        ExchangeFeeProfile::new("test", "TestEx", percent, percent)
    }

    #[test]
    fn long_winner_with_maker_fees() {
        let profile = flat_fees(0.02);
        let result = calculate(&input(Position::Long, 100.0, 110.0), Some(&profile)).unwrap();

        assert_close(result.pnl_percent, 100.0);
        assert_close(result.gross_pnl, 100.0);
        assert_close(result.entry_fee, 0.2);
        assert_close(result.exit_fee, 0.22);
        assert_close(result.fees, 0.42);
        assert_close(result.realized_pnl_value, 99.58);
    }

    #[test]
    fn short_profits_when_price_drops() {
        let profile = flat_fees(0.02);
        let result = calculate(&input(Position::Short, 100.0, 90.0), Some(&profile)).unwrap();

        assert_close(result.pnl_percent, 100.0);
        assert_close(result.gross_pnl, 100.0);
    }

    #[test]
    fn short_loses_when_price_rises() {
        let profile = flat_fees(0.02);
        let result = calculate(&input(Position::Short, 100.0, 105.0), Some(&profile)).unwrap();

        assert_close(result.pnl_percent, -50.0);
        assert_close(result.gross_pnl, -50.0);
        // exit value 1000 * (1 - 0.05) = 950
        assert_close(result.exit_fee, 0.19);
        assert_close(result.fees, 0.39);
        assert_close(result.realized_pnl_value, -50.39);
    }

    #[test]
    fn missing_or_zero_prices_skip_calculation() {
        let profile = flat_fees(0.02);
        let mut no_close = input(Position::Long, 100.0, 110.0);
        no_close.close_price = None;
        assert!(calculate(&no_close, Some(&profile)).is_none());

        let mut zero_entry = input(Position::Long, 100.0, 110.0);
        zero_entry.entry_price = Some(0.0);
        assert!(calculate(&zero_entry, Some(&profile)).is_none());

        let mut zero_leverage = input(Position::Long, 100.0, 110.0);
        zero_leverage.leverage = 0.0;
        assert!(calculate(&zero_leverage, Some(&profile)).is_none());
    }

    #[test]
    fn unknown_exchange_uses_fallback_rate_on_both_legs() {
        let result = calculate(&input(Position::Long, 100.0, 110.0), None).unwrap();

        // 1000 * 0.0004 + 1100 * 0.0004
        assert_close(result.entry_fee, 0.4);
        assert_close(result.exit_fee, 0.44);
        assert_close(result.fees, 0.84);
        assert_close(result.realized_pnl_value, 99.16);
    }

    #[test]
    fn maker_and_taker_rates_are_picked_per_leg() {
        let profile = ExchangeFeeProfile::new("binance", "Binance", 0.02, 0.05);
        let mut trade = input(Position::Long, 100.0, 110.0);
        trade.entry_type = FeeType::Maker;
        trade.exit_type = FeeType::Taker;

        let result = calculate(&trade, Some(&profile)).unwrap();
        assert_close(result.entry_fee, 0.2);
        assert_close(result.exit_fee, 0.55);
        assert_close(result.fees, 0.75);
    }

    #[test]
    fn rounding_follows_the_stored_binary_value() {
        assert_eq!(round2(0.015), 0.01);
        assert_eq!(round2(-0.015), -0.01);
        assert_eq!(round2(1.005), 1.0);
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(-0.125), -0.13);
        assert_eq!(round2(99.58), 99.58);
        assert_eq!(round2(-50.394), -50.39);
    }

    #[test]
    fn missing_margin_counts_as_zero() {
        let mut trade = input(Position::Long, 100.0, 110.0);
        trade.margin = 0.0;

        let result = calculate(&trade, None).unwrap();
        assert_close(result.pnl_percent, 100.0);
        assert_close(result.gross_pnl, 0.0);
        assert_close(result.fees, 0.0);
    }

    #[test]
    fn apply_to_record_blanks_fields_when_guard_fails() {
        let mut record = crate::journal::test_support::record("BTCUSDT", "Binance");
        record.entry_price = Some(100.0);
        record.close_price = Some(110.0);
        record.leverage = 10.0;
        record.margin = 100.0;

        let exchanges = vec![ExchangeFeeProfile::new("binance", "Binance", 0.02, 0.05)];
        apply_to_record(&mut record, &exchanges);
        assert_eq!(record.pnl, Some(100.0));
        assert!(record.fees.is_some());

        record.close_price = None;
        apply_to_record(&mut record, &exchanges);
        assert_eq!(record.pnl, None);
        assert_eq!(record.gross_pnl, None);
        assert_eq!(record.fees, None);
        assert_eq!(record.realized_pnl_value, None);
    }
}
