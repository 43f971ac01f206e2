//! SQLite store for messages, capsules, membership links and follow-ups.
//!
//! The database lives at `~/.capsules/capsules.db` unless the config points
//! elsewhere. Typed records are converted to and from rows only inside this
//! module; JSON columns hold participant lists, labels and entity bags.
//!
//! Each statement is its own unit of work. The one multi-row write that must
//! not be torn (a capsule and its initial follow-ups) runs in a transaction.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

pub mod types;
pub use types::*;

pub mod capsules;
pub mod messages;

pub struct CapsuleDb {
    conn: Connection,
}

impl CapsuleDb {
    /// Borrow the underlying connection for ad-hoc queries.
    #[cfg(test)]
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `~/.capsules/capsules.db` and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        log::debug!("Opened capsule store at {}", path.display());
        Ok(Self { conn })
    }

    /// Open the configured path, or the default one.
    pub fn open_configured(path: Option<&Path>) -> Result<Self, DbError> {
        match path {
            Some(p) => Self::open_at(p.to_path_buf()),
            None => Self::open(),
        }
    }

    /// Default database path: `~/.capsules/capsules.db`.
    pub fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".capsules").join("capsules.db"))
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::CapsuleDb;

    /// Create a temporary database for testing.
    ///
    /// We leak the `TempDir` so the directory persists for the duration of the test.
    pub fn test_db() -> CapsuleDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        CapsuleDb::open_at(path).expect("Failed to open test database")
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::test_db;

    #[test]
    fn test_open_creates_schema() {
        let db = test_db();
        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM capsule_messages", [], |row| row.get(0))
            .expect("membership table should exist");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let result: Result<(), super::DbError> = db.with_transaction(|tx| {
            tx.conn_ref().execute(
                "INSERT INTO capsules (id, title, capsule_type, created_at, updated_at)
                 VALUES ('c1', 't', 'Task', 'x', 'x')",
                [],
            )?;
            Err(super::DbError::NotFound("forced".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM capsules", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
