use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::Database;
use crate::error::{JournalError, Result};
use crate::models::{ExchangeFeeProfile, Settings, StrategyNote, UpdateSettingsInput};

/// Stored settings of `user_id`, or the defaults when none were saved yet.
pub(crate) fn load_settings(conn: &Connection, user_id: &str) -> Result<Settings> {
    let row = conn
        .query_row(
            "SELECT user_id, quote, exchanges, strategies, created_at, updated_at FROM settings WHERE user_id = ?",
            [user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((user_id, quote, exchanges, strategies, created_at, updated_at)) => Ok(Settings {
            user_id,
            quote,
            exchanges: serde_json::from_str(&exchanges)?,
            strategies: serde_json::from_str(&strategies)?,
            created_at,
            updated_at,
        }),
        None => Ok(Settings::defaults_for(user_id, Utc::now().timestamp())),
    }
}

pub(crate) fn save_settings(conn: &Connection, settings: &Settings) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (user_id, quote, exchanges, strategies, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id) DO UPDATE SET
            quote = excluded.quote,
            exchanges = excluded.exchanges,
            strategies = excluded.strategies,
            updated_at = excluded.updated_at",
        params![
            settings.user_id,
            settings.quote,
            serde_json::to_string(&settings.exchanges)?,
            serde_json::to_string(&settings.strategies)?,
            settings.created_at,
            settings.updated_at,
        ],
    )?;
    Ok(())
}

/// Loads, edits and stores the settings document in one lock.
fn modify_settings<F>(db: &Database, user_id: &str, edit: F) -> Result<Settings>
where
    F: FnOnce(&mut Settings) -> Result<()>,
{
    let conn = db.lock()?;
    let mut settings = load_settings(&conn, user_id)?;
    edit(&mut settings)?;
    settings.updated_at = Utc::now().timestamp();
    save_settings(&conn, &settings)?;
    Ok(settings)
}

pub fn get_settings(db: &Database, user_id: &str) -> Result<Settings> {
    let conn = db.lock()?;
    load_settings(&conn, user_id)
}

pub fn update_settings(db: &Database, user_id: &str, input: UpdateSettingsInput) -> Result<Settings> {
    modify_settings(db, user_id, |settings| {
        if let Some(quote) = input.quote {
            settings.quote = quote;
        }
        if let Some(exchanges) = input.exchanges {
            for exchange in &exchanges {
                exchange.validate()?;
            }
            settings.exchanges = exchanges;
        }
        if let Some(strategies) = input.strategies {
            for strategy in &strategies {
                strategy.validate()?;
            }
            settings.strategies = strategies;
        }
        Ok(())
    })
}

pub fn set_quote(db: &Database, user_id: &str, quote: &str) -> Result<Settings> {
    update_settings(
        db,
        user_id,
        UpdateSettingsInput {
            quote: Some(quote.to_string()),
            ..Default::default()
        },
    )
}

/// Adds a fee profile, or replaces the one with the same id. An empty id
/// gets a fresh one.
pub fn upsert_exchange(
    db: &Database,
    user_id: &str,
    mut exchange: ExchangeFeeProfile,
) -> Result<Settings> {
    exchange.name = exchange.name.trim().to_string();
    exchange.validate()?;
    if exchange.id.is_empty() {
        exchange.id = uuid::Uuid::new_v4().to_string();
    }

    modify_settings(db, user_id, |settings| {
        match settings.exchanges.iter_mut().find(|ex| ex.id == exchange.id) {
            Some(existing) => *existing = exchange,
            None => settings.exchanges.push(exchange),
        }
        Ok(())
    })
}

pub fn remove_exchange(db: &Database, user_id: &str, exchange_id: &str) -> Result<Settings> {
    modify_settings(db, user_id, |settings| {
        let before = settings.exchanges.len();
        settings.exchanges.retain(|ex| ex.id != exchange_id);
        if settings.exchanges.len() == before {
            return Err(JournalError::NotFound {
                entity: "Exchange",
                id: exchange_id.to_string(),
            });
        }
        Ok(())
    })
}

pub fn upsert_strategy(db: &Database, user_id: &str, mut strategy: StrategyNote) -> Result<Settings> {
    strategy.title = strategy.title.trim().to_string();
    strategy.validate()?;
    if strategy.id.is_empty() {
        strategy.id = uuid::Uuid::new_v4().to_string();
    }

    modify_settings(db, user_id, |settings| {
        match settings.strategies.iter_mut().find(|s| s.id == strategy.id) {
            Some(existing) => *existing = strategy,
            None => settings.strategies.push(strategy),
        }
        Ok(())
    })
}

pub fn remove_strategy(db: &Database, user_id: &str, strategy_id: &str) -> Result<Settings> {
    modify_settings(db, user_id, |settings| {
        let before = settings.strategies.len();
        settings.strategies.retain(|s| s.id != strategy_id);
        if settings.strategies.len() == before {
            return Err(JournalError::NotFound {
                entity: "Strategy",
                id: strategy_id.to_string(),
            });
        }
        Ok(())
    })
}
