use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::Database;
use crate::error::Result;
use crate::models::JournalNote;

pub(crate) fn write_note(conn: &Connection, user_id: &str, content: &str, now: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO notes (user_id, content, updated_at) VALUES (?, ?, ?)
         ON CONFLICT(user_id) DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at",
        params![user_id, content, now],
    )?;
    Ok(())
}

pub fn save_note(db: &Database, user_id: &str, content: &str) -> Result<JournalNote> {
    let conn = db.lock()?;
    let now = Utc::now().timestamp();
    write_note(&conn, user_id, content, now)?;

    Ok(JournalNote {
        user_id: user_id.to_string(),
        content: content.to_string(),
        updated_at: Some(now),
    })
}

/// An empty note when the user never saved one.
pub fn load_note(db: &Database, user_id: &str) -> Result<JournalNote> {
    let conn = db.lock()?;
    let note = conn
        .query_row(
            "SELECT content, updated_at FROM notes WHERE user_id = ?",
            [user_id],
            |row| {
                Ok(JournalNote {
                    user_id: user_id.to_string(),
                    content: row.get(0)?,
                    updated_at: row.get(1)?,
                })
            },
        )
        .optional()?;

    Ok(note.unwrap_or_else(|| JournalNote {
        user_id: user_id.to_string(),
        ..Default::default()
    }))
}
