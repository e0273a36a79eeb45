//! Persisted relay list.
//!
//! The user's relay list is a JSON array stored under one well-known key in a
//! small SQLite key/value table. It is read at startup and rewritten on every
//! add or remove.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

use crate::error::{Error, Result};

/// Key the relay list is stored under.
pub const RELAYS_KEY: &str = "nostr_relays";

/// SQLite-backed store for the relay list.
pub struct RelayListStore {
    conn: Mutex<Connection>,
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

impl RelayListStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Database(format!("Failed to open SQLite: {}", e)))?;
        init_schema(&conn)
            .map_err(|e| Error::Database(format!("Failed to init schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("Failed to open in-memory SQLite: {}", e)))?;
        init_schema(&conn)
            .map_err(|e| Error::Database(format!("Failed to init schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// The saved relay list, or `None` if nothing has been saved yet.
    ///
    /// A corrupt value is logged and treated as absent.
    pub fn load(&self) -> Result<Option<Vec<String>>> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                [RELAYS_KEY],
                |row| row.get(0),
            )
            .optional()?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(list) => Ok(Some(list)),
            Err(e) => {
                tracing::warn!("Ignoring corrupt saved relay list: {}", e);
                Ok(None)
            }
        }
    }

    /// Replace the saved relay list.
    pub fn save(&self, relays: &[String]) -> Result<()> {
        let value = serde_json::to_string(relays)?;
        self.conn.lock().execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![RELAYS_KEY, value],
        )?;
        tracing::debug!("Saved {} relays", relays.len());
        Ok(())
    }
}
