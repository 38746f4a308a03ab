pub mod configs;
pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Index {index}: {values} values for {timestamps} timestamps")]
    LengthMismatch {
        index: String,
        values: usize,
        timestamps: usize,
    },
    #[error("Cannot serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Writers from other processes wait this long for the lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest number of ids bound into one `IN (...)` query.
pub(crate) const MAX_IDS_PER_QUERY: usize = 900;

const SCHEMA_VERSION: i32 = 1;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL lets shard workers read while one of them writes
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: recordings, per-domain skip marks, per-chunk index values, configuration registry.
    ///
    /// `audio_files` may already exist when the recording scanner created the database;
    /// only the columns used here are required.
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS audio_files (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                filename            TEXT NOT NULL,
                filepath            TEXT NOT NULL UNIQUE,
                duration_seconds    REAL,
                samplerate_hz       INTEGER,
                created_at          TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at          TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS acoustic_indices (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id             INTEGER NOT NULL REFERENCES audio_files(id) ON DELETE CASCADE,
                index_name          TEXT NOT NULL,
                chunk_index         INTEGER NOT NULL,
                start_time_sec      REAL NOT NULL,
                value               REAL NOT NULL,
                processing_domain   TEXT NOT NULL,
                computed_at         TEXT NOT NULL,
                UNIQUE(file_id, index_name, chunk_index)
            );

            CREATE TABLE IF NOT EXISTS recording_skips (
                file_id             INTEGER NOT NULL REFERENCES audio_files(id) ON DELETE CASCADE,
                processing_domain   TEXT NOT NULL,
                reason              TEXT NOT NULL,
                skipped_at          TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (file_id, processing_domain)
            );

            CREATE INDEX IF NOT EXISTS idx_indices_file_domain
                ON acoustic_indices(file_id, processing_domain);
            CREATE INDEX IF NOT EXISTS idx_indices_name ON acoustic_indices(index_name);

            CREATE TABLE IF NOT EXISTS index_configurations (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                config_source       TEXT NOT NULL,
                index_name          TEXT NOT NULL,
                cosmetic_name       TEXT NOT NULL,
                processor           TEXT NOT NULL,
                processing_domain   TEXT NOT NULL,
                config_fragment     TEXT NOT NULL,
                content_hash        TEXT NOT NULL,
                created_at          TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(config_source, index_name, content_hash)
            );

            CREATE INDEX IF NOT EXISTS idx_configs_index ON index_configurations(index_name);
            ",
        )?;
        Ok(())
    }
}
