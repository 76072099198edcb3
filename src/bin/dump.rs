//! peoplesync-dump: print what is waiting to be pushed.
//!
//! Opens the configured store read-only, so it can run next to a live
//! writer, and prints the pending server and native change counts plus the
//! first page of each log as JSON.
//!
//! Usage: `peoplesync-dump [path/to/people.db]`

use std::path::PathBuf;

use serde::Serialize;

use peoplesync::config::load_config;
use peoplesync::db::{ContactChangeInfo, NativeChangeInfo, PeopleDb};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    database: PathBuf,
    server_pending: i64,
    native_pending: i64,
    server_changes: Vec<ContactChangeInfo>,
    native_changes: Vec<NativeChangeInfo>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or(config.database_path.clone());

    let db = PeopleDb::open_readonly_at(&path)
        .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", path.display()))?;

    let page = config.change_log_page_size.max(1);
    let report = Report {
        server_pending: db.count_contact_changes(None)?,
        native_pending: db.count_native_changes(None)?,
        server_changes: db.fetch_contact_change_log(None, 0, page)?,
        native_changes: db.fetch_native_change_log(None, 0, page)?,
        database: path,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
