//! Local note store on the client side

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::storage::database::{self, parse_timestamp, timestamp, SharedConnection};
use crate::types::Note;

const ACTIVE_NOTE_KEY: &str = "active_note";

/// Persistent store the materializer writes notes into
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn insert(&self, note: &Note) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Note>>;

    /// All notes, oldest first
    async fn list(&self) -> Result<Vec<Note>>;

    /// Mark the note open in the editor
    async fn set_active(&self, id: &str) -> Result<()>;

    async fn active(&self) -> Result<Option<String>>;
}

/// SQLite-backed [`NoteStore`]
pub struct SqliteNoteStore {
    conn: SharedConnection,
}

impl SqliteNoteStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_connection(database::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(database::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS notes (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn row_to_note(row: &Row) -> rusqlite::Result<Note> {
    let created_at: String = row.get(3)?;
    let updated_at: String = row.get(4)?;
    Ok(Note {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_timestamp(&updated_at).unwrap_or_else(Utc::now),
    })
}

#[async_trait]
impl NoteStore for SqliteNoteStore {
    async fn insert(&self, note: &Note) -> Result<()> {
        let note = note.clone();
        database::call(&self.conn, move |conn| {
            conn.execute(
                "INSERT INTO notes (id, title, body, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    note.id,
                    note.title,
                    note.body,
                    timestamp(note.created_at),
                    timestamp(note.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<Note>> {
        let id = id.to_string();
        database::call(&self.conn, move |conn| {
            let note = conn
                .query_row(
                    "SELECT id, title, body, created_at, updated_at FROM notes WHERE id = ?1",
                    params![id],
                    row_to_note,
                )
                .optional()?;
            Ok(note)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<Note>> {
        database::call(&self.conn, |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, body, created_at, updated_at FROM notes \
                 ORDER BY created_at, rowid",
            )?;
            let notes = stmt
                .query_map([], row_to_note)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(notes)
        })
        .await
    }

    async fn set_active(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        database::call(&self.conn, move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![ACTIVE_NOTE_KEY, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn active(&self) -> Result<Option<String>> {
        database::call(&self.conn, |conn| {
            let id: Option<String> = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![ACTIVE_NOTE_KEY],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_list_and_active() {
        let store = SqliteNoteStore::in_memory().unwrap();
        let first = Note::new("First", "one");
        let second = Note::new("Second", "two");
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let notes = store.list().await.unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(store.get(&second.id).await.unwrap().unwrap().body, "two");
        assert!(store.get("missing").await.unwrap().is_none());

        assert_eq!(store.active().await.unwrap(), None);
        store.set_active(&first.id).await.unwrap();
        store.set_active(&second.id).await.unwrap();
        assert_eq!(store.active().await.unwrap(), Some(second.id.clone()));
    }

    #[tokio::test]
    async fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.db");
        let note = Note::new("Kept", "body");

        {
            let store = SqliteNoteStore::open(&path).unwrap();
            store.insert(&note).await.unwrap();
            store.set_active(&note.id).await.unwrap();
        }

        let store = SqliteNoteStore::open(&path).unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert_eq!(store.active().await.unwrap(), Some(note.id));
    }
}
