//! Note drafts produced by the worker and notes persisted by the client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A parsed note proposal, not yet persisted anywhere
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteDraft {
    pub title: String,
    /// Markdown body derived from parsed text
    pub body: String,
}

impl NoteDraft {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Terminal result of a completed import task
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    /// Worker-side placeholder ids. Bookkeeping only, never sent to clients.
    pub created_note_ids: Vec<String>,
    pub notes: Vec<NoteDraft>,
}

/// A note in the client's local store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Create a note with a fresh local identifier
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("local-{}", Uuid::new_v4()),
            title: title.into(),
            body: body.into(),
            created_at: now,
            updated_at: now,
        }
    }
}
