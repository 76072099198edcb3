//! SQLite-backed contact store.
//!
//! One [`PeopleDb`] wraps one connection. Table-level operations live in the
//! submodules as `impl PeopleDb` blocks and never open transactions of their
//! own; the orchestrator in `services` wraps each logical unit in
//! [`PeopleDb::with_transaction`]. A second handle opened with
//! [`PeopleDb::open_readonly_at`] can read concurrently with a writer and sees
//! committed state only.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

use crate::migrations::MigrationOutcome;

pub mod contacts;
pub mod details;
pub mod native_changes;
pub mod server_changes;
pub mod settings;
pub mod summary;
pub mod timeline;
pub mod types;

pub use native_changes::{NativeChange, NativeChangeInfo, NativeChangeType};
pub use server_changes::{ContactChangeInfo, ServerChange, ServerChangeType};
pub use types::*;

pub struct PeopleDb {
    conn: Connection,
    migration: MigrationOutcome,
}

impl PeopleDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// What opening this handle did to the schema.
    pub fn migration_outcome(&self) -> MigrationOutcome {
        self.migration
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err. Transactions never nest.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| E::from(DbError::Sqlite(e)))?;
        match f(self) {
            Ok(val) => {
                if let Err(e) = self.conn.execute_batch("COMMIT") {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    return Err(E::from(DbError::Sqlite(e)));
                }
                Ok(val)
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    log::error!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `~/.peoplesync/people.db`.
    pub fn open() -> Result<Self, DbError> {
        Self::open_at(Self::default_path()?)
    }

    /// Open a database at an explicit path and bring its schema up to date.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL lets a read-only handle proceed while a writer holds the lock
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let migration = crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;
        log::info!("Opened contact store at {} ({:?})", path.display(), migration);

        Ok(Self { conn, migration })
    }

    /// Open a database at an explicit path in read-only mode.
    pub fn open_readonly_at(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn,
            migration: MigrationOutcome::UpToDate,
        })
    }

    /// Resolve the default database path: `~/.peoplesync/people.db`.
    pub fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".peoplesync").join("people.db"))
    }

    /// Delete every row of user data while keeping the schema.
    pub fn clear_user_data(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "DELETE FROM contacts;
             DELETE FROM contact_details;
             DELETE FROM contact_groups;
             DELETE FROM contact_sources;
             DELETE FROM contact_summary;
             DELETE FROM timeline;
             DELETE FROM server_change_log;
             DELETE FROM native_change_log;
             DELETE FROM settings;",
        )?;
        Ok(())
    }
}

// =============================================================================
// Shared test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use super::PeopleDb;

    /// Create a temporary database for testing.
    ///
    /// We leak the `TempDir` so the directory persists for the duration of the test.
    pub fn test_db() -> PeopleDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        PeopleDb::open_at(path).expect("Failed to open test database")
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::test_db;
    use super::*;

    #[test]
    fn test_open_creates_tables() {
        let db = test_db();
        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
            .expect("contacts table should exist");
        assert_eq!(count, 0);
        assert_eq!(db.migration_outcome(), MigrationOutcome::Fresh);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let result: Result<(), DbError> = db.with_transaction(|tx| {
            tx.conn.execute(
                "INSERT INTO settings (key, value) VALUES ('k', 'v')",
                [],
            )?;
            Err(DbError::NotFound("forced".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0, "insert should have been rolled back");
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let db = test_db();
        db.with_transaction(|tx| -> Result<(), DbError> {
            tx.conn.execute(
                "INSERT INTO settings (key, value) VALUES ('k', 'v')",
                [],
            )?;
            Ok(())
        })
        .expect("commit");

        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_readonly_handle_sees_committed_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("people.db");
        let db = PeopleDb::open_at(path.clone()).expect("open");
        db.conn
            .execute("INSERT INTO settings (key, value) VALUES ('a', '1')", [])
            .expect("insert");

        let reader = PeopleDb::open_readonly_at(&path).expect("open readonly");
        let count: i64 = reader
            .conn
            .query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 1);
        assert!(reader
            .conn
            .execute("INSERT INTO settings (key, value) VALUES ('b', '2')", [])
            .is_err());
    }

    #[test]
    fn test_clear_user_data() {
        let db = test_db();
        db.conn
            .execute("INSERT INTO settings (key, value) VALUES ('a', '1')", [])
            .expect("insert");
        db.clear_user_data().expect("clear");
        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0);
    }
}
