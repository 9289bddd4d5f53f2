use serde::{Deserialize, Serialize};

/// The single free-text note each user keeps beside the journal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalNote {
    pub user_id: String,
    pub content: String,
    pub updated_at: Option<i64>,
}
