use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::commands::{self, CloseTradeInput, DateRange};
use crate::config::AppConfig;
use crate::db::Database;
use crate::feed::RecordFeed;
use crate::models::{
    CreateTradeInput, ExchangeFeeProfile, FeeType, Position, StrategyNote, TradeFilters,
    TradePatch, TradeRecord, TradeStatus,
};

#[derive(Debug, Parser)]
#[command(name = "daily-log", author, version, about = "Journal for leveraged trades", long_about = None)]
pub struct Cli {
    /// Directory holding the journal database (overrides DAILY_LOG_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Journal owner (overrides DAILY_LOG_USER)
    #[arg(long, global = true)]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(user) = &self.user {
            config.user_id = user.clone();
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Record a new trade
    Add {
        symbol: String,
        #[arg(short, long, default_value = "")]
        exchange: String,
        #[arg(short, long, default_value = "Long")]
        position: Position,
        #[arg(short, long, default_value_t = 1.0)]
        leverage: f64,
        #[arg(short, long, default_value_t = 0.0)]
        margin: f64,
        #[arg(long)]
        entry: Option<f64>,
        /// Giving a close price records the trade as closed
        #[arg(long)]
        close: Option<f64>,
        #[arg(long, default_value = "Maker")]
        entry_type: FeeType,
        #[arg(long, default_value = "Taker")]
        exit_type: FeeType,
        /// YYYY-MM-DD or "YYYY-MM-DD HH:MM" (UTC); defaults to now
        #[arg(long)]
        opened: Option<String>,
        #[arg(short, long, default_value = "")]
        strategy: String,
        #[arg(long, default_value = "")]
        memo: String,
    },
    /// Close an open trade at a price
    Close {
        id: String,
        price: f64,
        #[arg(long)]
        exit_type: Option<FeeType>,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        memo: Option<String>,
        /// YYYY-MM-DD or "YYYY-MM-DD HH:MM" (UTC); defaults to now
        #[arg(long)]
        closed: Option<String>,
    },
    /// Mark a closed trade as open again
    Reopen { id: String },
    /// Edit fields of a trade with a JSON patch, e.g. '{"margin": 50}'
    Update { id: String, json: String },
    Delete { id: String },
    /// List trades, newest first
    List {
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        status: Option<TradeStatus>,
        #[arg(long)]
        json: bool,
    },
    /// Distinct symbols in the journal
    Symbols,
    Stats {
        #[arg(short, long, default_value = "all")]
        range: DateRange,
    },
    Equity {
        #[arg(short, long, default_value = "all")]
        range: DateRange,
    },
    /// Write trading_log_<date>.csv
    Export {
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Dump the whole journal as JSON
    Backup {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Load a JSON backup into this user's journal
    Restore { file: PathBuf },
    Settings,
    /// Set the motto shown above the journal
    Quote { text: String },
    Exchange {
        #[command(subcommand)]
        action: ExchangeAction,
    },
    Strategy {
        #[command(subcommand)]
        action: StrategyAction,
    },
    /// Show the free-text note, or replace it
    Note { text: Option<String> },
    /// Follow the journal live until Ctrl-C
    Watch,
}

#[derive(Debug, Subcommand)]
pub enum ExchangeAction {
    /// Add a fee profile, or replace the one with --id
    Add {
        name: String,
        /// Maker fee in percent
        maker: f64,
        /// Taker fee in percent
        taker: f64,
        #[arg(long, default_value = "")]
        id: String,
    },
    Remove { id: String },
}

#[derive(Debug, Subcommand)]
pub enum StrategyAction {
    Add {
        title: String,
        #[arg(default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        id: String,
    },
    Remove { id: String },
}

/// Accepts `YYYY-MM-DD HH:MM`, `YYYY-MM-DDTHH:MM` or `YYYY-MM-DD`, read as UTC.
pub fn parse_timestamp(value: &str) -> Result<i64> {
    let value = value.trim();
    for format in ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt.and_utc().timestamp());
        }
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}'", value))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc().timestamp())
}

fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn format_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn format_record(record: &TradeRecord) -> String {
    let mut line = format!(
        "{}  {}  {:<10} {:<5} x{:<4} entry {:<10} close {:<10} pnl {:>8}%  net {:>10}  fees {:>7}  [{}]",
        record.id,
        format_timestamp(record.open_date),
        record.symbol,
        record.position,
        record.leverage,
        format_value(record.entry_price),
        format_value(record.close_price),
        format_value(record.pnl),
        format_value(record.realized_pnl_value),
        format_value(record.fees),
        record.status,
    );
    if record.is_liquidated() {
        line.push_str(" LIQUIDATED");
    }
    if !record.strategy.is_empty() {
        line.push_str(&format!("  ({})", record.strategy));
    }
    line
}

fn print_records(records: &[TradeRecord]) {
    if records.is_empty() {
        println!("No trades recorded.");
        return;
    }
    for record in records {
        println!("{}", format_record(record));
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Runs one command against an open journal.
pub fn execute(command: Command, db: &Arc<Database>, config: &AppConfig) -> Result<()> {
    let user = config.user_id.as_str();

    match command {
        Command::Add {
            symbol,
            exchange,
            position,
            leverage,
            margin,
            entry,
            close,
            entry_type,
            exit_type,
            opened,
            strategy,
            memo,
        } => {
            let input = CreateTradeInput {
                exchange,
                position,
                leverage,
                margin,
                entry_price: entry,
                close_price: close,
                entry_type,
                exit_type,
                open_date: opened.as_deref().map(parse_timestamp).transpose()?,
                strategy,
                entry_memo: memo,
                ..CreateTradeInput::new(symbol)
            };
            let trade = commands::create_trade(db, user, input)?;
            println!("{}", format_record(&trade));
        }
        Command::Close {
            id,
            price,
            exit_type,
            reason,
            memo,
            closed,
        } => {
            let input = CloseTradeInput {
                close_price: price,
                exit_type,
                close_date: closed.as_deref().map(parse_timestamp).transpose()?,
                exit_reason: reason,
                exit_memo: memo,
            };
            let trade = commands::close_trade(db, user, &id, input)?;
            println!("{}", format_record(&trade));
        }
        Command::Reopen { id } => {
            let trade = commands::reopen_trade(db, user, &id)?;
            println!("{}", format_record(&trade));
        }
        Command::Update { id, json } => {
            let patch: TradePatch = serde_json::from_str(&json).context("invalid trade patch")?;
            let trade = commands::update_trade(db, user, &id, patch)?;
            println!("{}", format_record(&trade));
        }
        Command::Delete { id } => {
            commands::delete_trade(db, user, &id)?;
            println!("Deleted {}", id);
        }
        Command::List {
            search,
            symbol,
            status,
            json,
        } => {
            let filters = TradeFilters {
                search,
                symbol,
                status,
            };
            let records = commands::get_trades(db, user, Some(&filters))?;
            if json {
                print_json(&records)?;
            } else {
                print_records(&records);
            }
        }
        Command::Symbols => {
            for symbol in commands::list_symbols(db, user)? {
                println!("{}", symbol);
            }
        }
        Command::Stats { range } => print_json(&commands::get_journal_stats(db, user, range)?)?,
        Command::Equity { range } => print_json(&commands::get_equity_curve(db, user, range)?)?,
        Command::Export {
            out,
            search,
            symbol,
        } => {
            let filters = TradeFilters {
                search,
                symbol,
                status: None,
            };
            let path = commands::export_csv(db, user, Some(&filters), &out)?;
            println!("{}", path.display());
        }
        Command::Backup { out } => {
            let json = commands::export_all_data(db, user)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("{}", path.display());
                }
                None => println!("{}", json),
            }
        }
        Command::Restore { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            print_json(&commands::import_all_data(db, user, &json)?)?;
        }
        Command::Settings => print_json(&commands::get_settings(db, user)?)?,
        Command::Quote { text } => print_json(&commands::set_quote(db, user, &text)?)?,
        Command::Exchange { action } => {
            let settings = match action {
                ExchangeAction::Add {
                    name,
                    maker,
                    taker,
                    id,
                } => commands::upsert_exchange(
                    db,
                    user,
                    ExchangeFeeProfile {
                        id,
                        name,
                        maker_fee: maker,
                        taker_fee: taker,
                    },
                )?,
                ExchangeAction::Remove { id } => commands::remove_exchange(db, user, &id)?,
            };
            print_json(&settings.exchanges)?;
        }
        Command::Strategy { action } => {
            let settings = match action {
                StrategyAction::Add {
                    title,
                    description,
                    id,
                } => commands::upsert_strategy(
                    db,
                    user,
                    StrategyNote {
                        id,
                        title,
                        description,
                    },
                )?,
                StrategyAction::Remove { id } => commands::remove_strategy(db, user, &id)?,
            };
            print_json(&settings.strategies)?;
        }
        Command::Note { text } => {
            let note = match text {
                Some(text) => commands::save_note(db, user, &text)?,
                None => commands::load_note(db, user)?,
            };
            println!("{}", note.content);
        }
        Command::Watch => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(watch(Arc::clone(db), user.to_string(), config.poll_interval));
        }
    }

    Ok(())
}

async fn watch(db: Arc<Database>, user_id: String, poll_interval: Duration) {
    let feed = RecordFeed::new(db);
    let mut subscription = feed.subscribe(&user_id);
    print_records(&subscription.current());

    feed.start(poll_interval);
    log::info!("Watching journal of {} (Ctrl-C to stop)", user_id);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            snapshot = subscription.changed() => match snapshot {
                Some(records) => {
                    println!("---- {} trades ----", records.len());
                    print_records(&records);
                }
                None => break,
            },
        }
    }

    feed.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn add_parses_enums_and_defaults() {
        let cli = Cli::try_parse_from([
            "daily-log", "--user", "alice", "add", "btcusdt", "--position", "short", "-l", "20",
            "--entry", "65000",
        ])
        .unwrap();

        assert_eq!(cli.user.as_deref(), Some("alice"));
        match cli.command {
            Command::Add {
                symbol,
                position,
                leverage,
                entry,
                entry_type,
                exit_type,
                ..
            } => {
                assert_eq!(symbol, "btcusdt");
                assert_eq!(position, Position::Short);
                assert_eq!(leverage, 20.0);
                assert_eq!(entry, Some(65000.0));
                assert_eq!(entry_type, FeeType::Maker);
                assert_eq!(exit_type, FeeType::Taker);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn bad_enum_value_is_a_parse_error() {
        assert!(Cli::try_parse_from(["daily-log", "add", "btc", "--position", "flat"]).is_err());
        assert!(Cli::try_parse_from(["daily-log", "stats", "--range", "decade"]).is_err());
    }

    #[test]
    fn timestamps_accept_date_and_minutes() {
        assert_eq!(parse_timestamp("2024-01-01").unwrap(), 1_704_067_200);
        assert_eq!(parse_timestamp("2024-01-01 01:30").unwrap(), 1_704_072_600);
        assert_eq!(parse_timestamp("2024-01-01T01:30").unwrap(), 1_704_072_600);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn execute_add_then_close() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let config = AppConfig::default();

        let cli = Cli::try_parse_from([
            "daily-log", "add", "eth", "-e", "Bybit", "-l", "5", "-m", "200", "--entry", "2000",
        ])
        .unwrap();
        execute(cli.command, &db, &config).unwrap();

        let trades = commands::get_trades(&db, &config.user_id, None).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].symbol, "ETH");

        let id = trades[0].id.clone();
        let cli = Cli::try_parse_from(["daily-log", "close", id.as_str(), "2100"]).unwrap();
        execute(cli.command, &db, &config).unwrap();

        let trade = commands::get_trade(&db, &config.user_id, &id).unwrap();
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.pnl, Some(25.0));
    }

    #[test]
    fn global_flags_override_config() {
        let cli = Cli::try_parse_from(["daily-log", "symbols", "--data-dir", "/tmp/x", "--user", "bob"]).unwrap();
        let mut config = AppConfig::default();
        cli.apply_to(&mut config);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/x"));
        assert_eq!(config.user_id, "bob");
    }
}
