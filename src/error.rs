//! Error types for orchestrator operations
//!
//! Every write returns one of four statuses:
//! - Success: the logical unit committed
//! - NotFound: a referenced row is absent
//! - Corrupt: the store failed mid-operation and the unit was rolled back
//! - NotReady: the change cannot be expressed yet (parent not on the server)

use serde::Serialize;
use thiserror::Error;

use crate::db::{DbError, LogRejection};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store failure: {0}")]
    Corrupt(String),

    #[error("Not ready: {0}")]
    NotReady(String),
}

/// Status code surfaced to transport and UI collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Success,
    NotFound,
    Corrupt,
    NotReady,
}

impl SyncError {
    pub fn status(&self) -> ServiceStatus {
        match self {
            SyncError::NotFound(_) => ServiceStatus::NotFound,
            SyncError::Corrupt(_) => ServiceStatus::Corrupt,
            SyncError::NotReady(_) => ServiceStatus::NotReady,
        }
    }

    pub(crate) fn rejected(rejection: LogRejection, local_contact_id: i64) -> Self {
        match rejection {
            LogRejection::ContactDeleted => {
                SyncError::NotFound(format!("contact {} is pending deletion", local_contact_id))
            }
            LogRejection::ParentNotSynced => {
                SyncError::NotReady(format!("contact {} has no server id yet", local_contact_id))
            }
        }
    }
}

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => SyncError::NotFound(what),
            other => SyncError::Corrupt(other.to_string()),
        }
    }
}

/// Collapse an operation result into its status code.
pub fn status_of<T>(result: &Result<T, SyncError>) -> ServiceStatus {
    match result {
        Ok(_) => ServiceStatus::Success,
        Err(e) => e.status(),
    }
}
