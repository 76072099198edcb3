//! Schema versioning for the contact store.
//!
//! The baseline SQL is embedded at compile time via `include_str!` and the
//! applied version is tracked in the `schema_version` table. There is no
//! in-place migration path: a database stamped with any version other than
//! [`SCHEMA_VERSION`] is backed up, wiped and rebuilt from the baseline.

use rusqlite::{Connection, DatabaseName};

/// Bump whenever a table shape, column meaning or persisted setting
/// encoding changes.
pub const SCHEMA_VERSION: i32 = 1;

const BASELINE_SQL: &str = include_str!("migrations/001_baseline.sql");

/// Tables owned by the baseline, dropped on rebuild.
const USER_TABLES: &[&str] = &[
    "contacts",
    "contact_details",
    "contact_groups",
    "contact_sources",
    "contact_summary",
    "timeline",
    "server_change_log",
    "native_change_log",
    "settings",
];

/// What [`run_migrations`] did to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Empty database, baseline applied.
    Fresh,
    /// Stored version matches; nothing touched.
    UpToDate,
    /// Stored version differed; all user data was discarded.
    Rebuilt { from: i32 },
}

impl MigrationOutcome {
    pub fn is_rebuilt(&self) -> bool {
        matches!(self, MigrationOutcome::Rebuilt { .. })
    }
}

/// Create the `schema_version` table if it doesn't exist.
fn ensure_schema_version_table(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Failed to create schema_version table: {}", e))
}

/// Return the highest recorded version, or 0 if none.
fn current_version(conn: &Connection) -> Result<i32, String> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Failed to read schema version: {}", e))
}

/// Copy a file database aside as `<db_path>.v<from>.bak` so a store
/// written by another schema can still be inspected after the wipe.
/// Returns the snapshot path; in-memory databases have none.
fn snapshot_stale_store(conn: &Connection, from: i32) -> Result<Option<String>, String> {
    let Some(db_path) = conn.path().filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    let snapshot = format!("{}.v{}.bak", db_path, from);
    conn.backup(DatabaseName::Main, &snapshot, None)
        .map_err(|e| format!("Could not snapshot schema v{} store to {}: {}", from, snapshot, e))?;
    Ok(Some(snapshot))
}

fn apply_baseline(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(BASELINE_SQL)
        .map_err(|e| format!("Baseline v{} failed: {}", SCHEMA_VERSION, e))?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )
    .map_err(|e| format!("Failed to record schema v{}: {}", SCHEMA_VERSION, e))?;
    Ok(())
}

/// Drop every user table and the version history.
pub(crate) fn drop_user_tables(conn: &Connection) -> Result<(), String> {
    let mut sql = String::new();
    for table in USER_TABLES {
        sql.push_str(&format!("DROP TABLE IF EXISTS {};\n", table));
    }
    sql.push_str("DELETE FROM schema_version;\n");
    conn.execute_batch(&sql)
        .map_err(|e| format!("Failed to drop user tables: {}", e))
}

/// Bring the database to [`SCHEMA_VERSION`].
pub fn run_migrations(conn: &Connection) -> Result<MigrationOutcome, String> {
    ensure_schema_version_table(conn)?;

    let current = current_version(conn)?;
    if current == SCHEMA_VERSION {
        return Ok(MigrationOutcome::UpToDate);
    }

    if current == 0 {
        apply_baseline(conn)?;
        log::info!("Applied baseline schema v{}", SCHEMA_VERSION);
        return Ok(MigrationOutcome::Fresh);
    }

    log::warn!(
        "Schema version {} does not match expected {}; wiping contact store",
        current,
        SCHEMA_VERSION
    );
    if let Some(snapshot) = snapshot_stale_store(conn, current)? {
        log::info!("Schema v{} store kept at {}", current, snapshot);
    }
    drop_user_tables(conn)?;
    apply_baseline(conn)?;
    Ok(MigrationOutcome::Rebuilt { from: current })
}
