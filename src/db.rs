//! SQLite storage for preferences and session snapshots.
//!
//! Two tables:
//! - `preferences`: key/value pairs scoped per project (the remembered
//!   project identifier, the tracked build directories)
//! - `sessions`: serialized share state keyed by workflow identity, saved
//!   when a run is interrupted and consumed when it is resumed
//!
//! The database is stored in the platform data directory as `publisher.db`.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

/// Project-scoped key/value preferences
pub trait Preferences: Send + Sync {
    /// Value for `key`, or an empty string when unset
    fn get(&self, key: &str) -> Result<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// A saved share session
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state_json: String,
    pub saved_at: DateTime<Utc>,
}

/// Database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get the database file path
    pub fn db_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("com", "publisher", "Publisher")
            .context("Could not determine data directory")?;

        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        Ok(data_dir.join("publisher.db"))
    }

    /// Open or create the database
    pub fn open() -> Result<Self> {
        let path = Self::db_path()?;
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let db = Self { conn };
        db.init_schema()?;

        tracing::debug!("Opened database at {:?}", path);
        Ok(db)
    }

    /// Open a throwaway database in memory
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS preferences (
                scope TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (scope, key)
            );

            CREATE TABLE IF NOT EXISTS sessions (
                identity TEXT PRIMARY KEY,
                state_json TEXT NOT NULL,
                saved_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    pub fn get_preference(&self, scope: &str, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM preferences WHERE scope = ? AND key = ?",
                params![scope, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_preference(&self, scope: &str, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO preferences (scope, key, value) VALUES (?, ?, ?)",
            params![scope, key, value],
        )?;
        Ok(())
    }

    /// Store a snapshot, replacing any previous one for `identity`
    pub fn save_session(&self, identity: &str, state_json: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sessions (identity, state_json, saved_at) VALUES (?, ?, ?)",
            params![identity, state_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_session(&self, identity: &str) -> Result<Option<SessionSnapshot>> {
        let row = self
            .conn
            .query_row(
                "SELECT state_json, saved_at FROM sessions WHERE identity = ?",
                params![identity],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((state_json, saved_at)) = row else {
            return Ok(None);
        };
        let saved_at = DateTime::parse_from_rfc3339(&saved_at)
            .with_context(|| format!("Invalid snapshot timestamp '{}'", saved_at))?
            .with_timezone(&Utc);

        Ok(Some(SessionSnapshot {
            state_json,
            saved_at,
        }))
    }

    /// Remove a snapshot. Returns whether one existed.
    pub fn clear_session(&self, identity: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM sessions WHERE identity = ?", params![identity])?;
        Ok(removed > 0)
    }
}

/// Preferences for one project, backed by the database
pub struct ProjectPreferences {
    db: Mutex<Database>,
    scope: String,
}

impl ProjectPreferences {
    pub fn new(db: Database, scope: impl Into<String>) -> Self {
        Self {
            db: Mutex::new(db),
            scope: scope.into(),
        }
    }

    /// Run `f` against the underlying database
    pub fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let db = self
            .db
            .lock()
            .map_err(|_| anyhow::anyhow!("Database lock poisoned"))?;
        f(&db)
    }
}

impl Preferences for ProjectPreferences {
    fn get(&self, key: &str) -> Result<String> {
        self.with_db(|db| Ok(db.get_preference(&self.scope, key)?.unwrap_or_default()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_db(|db| db.set_preference(&self.scope, key, value))
    }
}

/// In-memory preferences for tests
#[cfg(test)]
#[derive(Default)]
pub struct MemoryPreferences {
    values: Mutex<std::collections::HashMap<String, String>>,
}

#[cfg(test)]
impl Preferences for MemoryPreferences {
    fn get(&self, key: &str) -> Result<String> {
        Ok(self.values.lock().unwrap().get(key).cloned().unwrap_or_default())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
