pub mod filter;
pub mod pnl;

pub use filter::{filter_records, split_open_closed, unique_symbols, ALL_SYMBOLS};
pub use pnl::{apply_to_record, calculate, round2, PnlBreakdown, PnlInput};
