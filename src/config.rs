//! Runtime configuration, read from the environment (and `.env`).

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "daily_log.db";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Holds the database and its `backups/` folder
    pub data_dir: PathBuf,
    /// Opaque identifier the journal is keyed by
    pub user_id: String,
    pub poll_interval: Duration,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            user_id: "local".to_string(),
            poll_interval: Duration::from_millis(1000),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("DAILY_LOG_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(user) = lookup("DAILY_LOG_USER").filter(|v| !v.trim().is_empty()) {
            config.user_id = user.trim().to_string();
        }
        if let Some(ms) = lookup("DAILY_LOG_POLL_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .with_context(|| format!("DAILY_LOG_POLL_MS must be a whole number of milliseconds, got '{}'", ms))?;
            anyhow::ensure!(ms > 0, "DAILY_LOG_POLL_MS must be greater than zero");
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(level) = lookup("DAILY_LOG_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            config.log_level = level.trim().to_lowercase();
        }

        Ok(config)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }
}
