//! peoplesync: local persistence and synchronization core for a contacts
//! client.
//!
//! Contacts live in a normalized SQLite store with two denormalized
//! projections (the contact summary list and the activity timeline). Every
//! local mutation is queued in two independent change logs, one for the
//! server and one for the device address book, until the caller confirms
//! it was applied remotely. Observers learn about changes through a
//! coalescing notifier.
//!
//! Write paths go through [`services`], which keep all of the above
//! consistent inside one transaction per logical unit:
//!
//! ```no_run
//! use peoplesync::{config, services, PeopleDb, SyncSession};
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = config::load_config()?;
//! let db = PeopleDb::open_at(config.database_path.clone())?;
//! let session = SyncSession::open(&db, &config)?;
//! let pending = services::changes::fetch_server_changes(&db, &session, None, 0, None)?;
//! # let _ = pending;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
mod migrations;
pub mod notify;
pub mod services;
pub mod session;
pub mod thumbnails;

pub use db::{DbError, PeopleDb};
pub use error::{ServiceStatus, SyncError};
pub use migrations::MigrationOutcome;
pub use notify::{ChangeEvent, ChangeKind, ChangeNotifier};
pub use services::{BatchOutcome, SyncTarget};
pub use session::SyncSession;
