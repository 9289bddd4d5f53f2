use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::commands::notes::{load_note, write_note};
use crate::commands::settings::{load_settings, save_settings};
use crate::commands::trades::{query_trades, save_trade};
use crate::db::Database;
use crate::error::Result;
use crate::models::{Settings, TradeRecord};

pub const BACKUP_VERSION: &str = "1.0.0";

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupData {
    pub settings: Settings,
    pub trades: Vec<TradeRecord>,
    #[serde(default)]
    pub note: String,
    pub export_date: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub settings_updated: usize,
    pub trades_imported: usize,
}

/// Everything one user owns, as pretty JSON.
pub fn export_all_data(db: &Database, user_id: &str) -> Result<String> {
    let note = load_note(db, user_id)?.content;

    let conn = db.lock()?;
    let backup = BackupData {
        settings: load_settings(&conn, user_id)?,
        trades: query_trades(&conn, user_id)?,
        note,
        export_date: Utc::now().to_rfc3339(),
        version: BACKUP_VERSION.to_string(),
    };

    Ok(serde_json::to_string_pretty(&backup)?)
}

/// Restores a backup into `user_id`'s journal in one transaction. Settings
/// and the note are replaced. Trades are upserted by id within this user's
/// journal, so other users' records are never touched.
pub fn import_all_data(db: &Database, user_id: &str, json_data: &str) -> Result<RestoreSummary> {
    let backup: BackupData = serde_json::from_str(json_data)?;
    let now = Utc::now().timestamp();

    let settings = Settings {
        user_id: user_id.to_string(),
        updated_at: now,
        ..backup.settings
    };
    settings.validate()?;

    let trades = backup
        .trades
        .into_iter()
        .map(|mut trade| {
            trade.user_id = user_id.to_string();
            trade.validate().map(|_| trade)
        })
        .collect::<Result<Vec<_>>>()?;

    let conn = db.lock()?;
    let tx = conn.unchecked_transaction()?;

    save_settings(&tx, &settings)?;
    for trade in &trades {
        save_trade(&tx, trade)?;
    }
    write_note(&tx, user_id, &backup.note, now)?;

    tx.commit()?;

    log::info!(
        "Restored backup v{} ({} trades) for {}",
        backup.version,
        trades.len(),
        user_id
    );

    Ok(RestoreSummary {
        settings_updated: 1,
        trades_imported: trades.len(),
    })
}
