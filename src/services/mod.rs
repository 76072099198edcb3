//! Sync orchestrator.
//!
//! Free functions taking the store and the session. Each logical unit runs
//! inside [`PeopleDb::with_transaction`] and keeps the entity tables, both
//! projections and both change logs consistent. Notifications and thumbnail
//! file removal happen only after the unit committed.

use serde::Serialize;

use crate::db::PeopleDb;
use crate::error::{ServiceStatus, SyncError};
use crate::notify::ChangeKind;
use crate::session::SyncSession;

pub mod changes;
pub mod contacts;
pub mod details;
pub mod groups;
pub mod ids;
pub mod merge;
pub mod store;

/// Which change logs a write must be queued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTarget {
    None,
    ServerOnly,
    NativeOnly,
    Both,
}

impl SyncTarget {
    /// The me profile never syncs anywhere.
    pub fn resolve(sync_to_server: bool, sync_to_native: bool, is_me_profile: bool) -> Self {
        if is_me_profile {
            return SyncTarget::None;
        }
        match (sync_to_server, sync_to_native) {
            (true, true) => SyncTarget::Both,
            (true, false) => SyncTarget::ServerOnly,
            (false, true) => SyncTarget::NativeOnly,
            (false, false) => SyncTarget::None,
        }
    }

    pub fn server(&self) -> bool {
        matches!(self, SyncTarget::ServerOnly | SyncTarget::Both)
    }

    pub fn native(&self) -> bool {
        matches!(self, SyncTarget::NativeOnly | SyncTarget::Both)
    }
}

/// Where a call originated. A write that is not pushed to both sides came
/// in from one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Origin {
    pub to_server: bool,
    pub to_native: bool,
}

impl Origin {
    pub const LOCAL: Origin = Origin {
        to_server: true,
        to_native: true,
    };

    pub fn new(to_server: bool, to_native: bool) -> Self {
        Self {
            to_server,
            to_native,
        }
    }

    pub fn external(&self) -> bool {
        !(self.to_server && self.to_native)
    }

    pub fn target(&self, is_me_profile: bool) -> SyncTarget {
        SyncTarget::resolve(self.to_server, self.to_native, is_me_profile)
    }
}

/// Per-item result of a contact list operation.
///
/// Items are committed one by one; a failure rolls back only that item.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Local contact ids of the items that committed.
    pub succeeded: Vec<i64>,
    /// Input index and error of every item that rolled back.
    pub failed: Vec<(usize, SyncError)>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Status of the first failure, or success.
    pub fn status(&self) -> ServiceStatus {
        self.failed
            .first()
            .map(|(_, e)| e.status())
            .unwrap_or(ServiceStatus::Success)
    }

    pub(crate) fn record(&mut self, index: usize, result: Result<i64, SyncError>) {
        match result {
            Ok(id) => self.succeeded.push(id),
            Err(e) => {
                log::warn!("Batch item {} rolled back: {}", index, e);
                self.failed.push((index, e));
            }
        }
    }
}

/// Side effects of a committed unit, applied after commit.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub contacts: bool,
    pub timeline: bool,
    pub me_profile: bool,
    pub me_presence: bool,
    pub profile_cleared: bool,
    pub thumbnails_to_delete: Vec<i64>,
}

impl Effects {
    pub fn absorb(&mut self, other: Effects) {
        self.contacts |= other.contacts;
        self.timeline |= other.timeline;
        self.me_profile |= other.me_profile;
        self.me_presence |= other.me_presence;
        self.profile_cleared |= other.profile_cleared;
        self.thumbnails_to_delete.extend(other.thumbnails_to_delete);
    }

    /// Mark the contact list or the profile as changed.
    pub fn touch(&mut self, is_me_profile: bool) {
        if is_me_profile {
            self.me_profile = true;
        } else {
            self.contacts = true;
        }
    }

    pub fn publish(self, session: &SyncSession, external: bool) {
        if self.profile_cleared {
            session.set_me_profile_id(None);
        }
        for local_id in &self.thumbnails_to_delete {
            if let Err(e) = session.thumbnails().delete(*local_id) {
                log::warn!("Failed to delete thumbnail for contact {}: {}", local_id, e);
            }
        }
        let notifier = session.notifier();
        if self.contacts {
            notifier.fire(ChangeKind::Contacts, external);
        }
        if self.timeline {
            notifier.fire(ChangeKind::Timeline, external);
        }
        if self.me_profile {
            notifier.fire(ChangeKind::MeProfile, external);
        }
        if self.me_presence {
            notifier.fire(ChangeKind::MeProfilePresenceText, external);
        }
    }
}

/// Rebuild a contact's summary row, or drop it when the contact has no
/// details left. Returns the display name when a row exists.
pub(crate) fn refresh_projection(
    tx: &PeopleDb,
    local_contact_id: i64,
    is_me_profile: bool,
) -> Result<Option<String>, SyncError> {
    if !is_me_profile && tx.fetch_contact_details(local_contact_id)?.is_empty() {
        tx.delete_summary(local_contact_id)?;
        return Ok(None);
    }
    Ok(Some(
        tx.update_contact_name_in_summary(local_contact_id, is_me_profile)?,
    ))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_target_resolution() {
        assert_eq!(SyncTarget::resolve(true, true, false), SyncTarget::Both);
        assert_eq!(SyncTarget::resolve(true, false, false), SyncTarget::ServerOnly);
        assert_eq!(SyncTarget::resolve(false, true, false), SyncTarget::NativeOnly);
        assert_eq!(SyncTarget::resolve(false, false, false), SyncTarget::None);
        assert_eq!(SyncTarget::resolve(true, true, true), SyncTarget::None);

        assert!(SyncTarget::Both.server() && SyncTarget::Both.native());
        assert!(!SyncTarget::NativeOnly.server());
        assert!(!SyncTarget::None.native());
    }

    #[test]
    fn test_origin_external() {
        assert!(!Origin::LOCAL.external());
        assert!(Origin::new(false, true).external());
        assert!(Origin::new(false, false).external());
    }

    #[test]
    fn test_batch_outcome_status() {
        let mut outcome = BatchOutcome::default();
        outcome.record(0, Ok(1));
        assert!(outcome.is_complete());
        assert_eq!(outcome.status(), ServiceStatus::Success);
        outcome.record(1, Err(SyncError::NotReady("x".into())));
        assert_eq!(outcome.succeeded, vec![1]);
        assert_eq!(outcome.status(), ServiceStatus::NotReady);
    }
}
