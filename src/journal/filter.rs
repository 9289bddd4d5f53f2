use std::collections::BTreeSet;

use crate::models::{TradeFilters, TradeRecord};

/// Symbol selector value that disables symbol filtering.
pub const ALL_SYMBOLS: &str = "ALL";

fn contains_ignore_case(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

pub fn matches(record: &TradeRecord, filters: &TradeFilters) -> bool {
    if let Some(status) = filters.status {
        if record.status != status {
            return false;
        }
    }

    if let Some(symbol) = filters.symbol.as_deref().map(str::trim) {
        if !symbol.is_empty()
            && !symbol.eq_ignore_ascii_case(ALL_SYMBOLS)
            && !record.symbol.eq_ignore_ascii_case(symbol)
        {
            return false;
        }
    }

    match filters.search.as_deref().map(str::trim) {
        Some(term) if !term.is_empty() => {
            let term = term.to_lowercase();
            contains_ignore_case(&record.symbol, &term)
                || contains_ignore_case(&record.strategy, &term)
                || contains_ignore_case(&record.exchange, &term)
                || contains_ignore_case(&record.entry_memo, &term)
        }
        _ => true,
    }
}

/// Keeps input order.
pub fn filter_records<'a>(records: &'a [TradeRecord], filters: &TradeFilters) -> Vec<&'a TradeRecord> {
    records.iter().filter(|r| matches(r, filters)).collect()
}

/// Distinct uppercase symbols, sorted.
pub fn unique_symbols(records: &[TradeRecord]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.symbol.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Splits into (open positions, closed history).
pub fn split_open_closed<'a>(
    records: &[&'a TradeRecord],
) -> (Vec<&'a TradeRecord>, Vec<&'a TradeRecord>) {
    records.iter().copied().partition(|r| r.is_open())
}
