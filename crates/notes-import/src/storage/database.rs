//! SQLite connection helpers
//!
//! The queue database is opened by the server process and by every worker
//! process, so connections run in WAL mode with a busy timeout. Waiting on
//! that timeout blocks the calling thread, so async callers go through
//! [`call`], which runs statements on the blocking thread pool.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// A connection shared between async tasks
pub type SharedConnection = Arc<Mutex<Connection>>;

/// How long a connection waits on a lock held by another process
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create or open the database at the given path
pub fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

/// Create an in-memory database
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA temp_store=MEMORY;
    "#,
    )?;
    Ok(())
}

/// Run `f` with the locked connection on the blocking thread pool
pub async fn call<T, F>(conn: &SharedConnection, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let mut conn = conn.lock();
        f(&mut conn)
    })
    .await
    .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
}

/// Fixed-width RFC 3339 timestamp, so stored values sort as text
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
