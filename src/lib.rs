pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod journal;
pub mod models;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;

pub use config::AppConfig;
pub use db::Database;
pub use error::{JournalError, Result};
pub use feed::{RecordFeed, Subscription};

fn init_logging(level: &str) {
    // RUST_LOG wins over the configured level
    let env = env_logger::Env::default().default_filter_or(level);
    let _ = env_logger::Builder::from_env(env).try_init();
}

pub fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let mut config = AppConfig::from_env()?;
    cli.apply_to(&mut config);
    init_logging(&config.log_level);

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("failed to create data directory {}", config.data_dir.display())
    })?;

    let db_path = config.db_path();
    log::debug!("Database path: {:?}", db_path);

    let db_path_str = db_path
        .to_str()
        .with_context(|| format!("database path is not valid UTF-8: {:?}", db_path))?;
    let database = match Database::new(db_path_str) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            log::error!("Database initialization failed: {}", e);
            log::error!(
                "Backups taken before each migration are in {:?}; copy the newest one over {:?} to recover",
                config.data_dir.join("backups"),
                db_path
            );
            return Err(e).context("database initialization failed");
        }
    };

    cli::execute(cli.command, &database, &config)
}
