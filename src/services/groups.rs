// Group membership edited on this device.

use super::Effects;
use crate::db::{LogOutcome, PeopleDb};
use crate::error::SyncError;
use crate::session::SyncSession;

/// Put a contact into a group. Already a member is a successful no-op.
pub fn add_contact_to_group(
    db: &PeopleDb,
    session: &SyncSession,
    local_contact_id: i64,
    group_id: i64,
) -> Result<(), SyncError> {
    let is_me = session.is_me_profile(local_contact_id);
    let changed = db.with_transaction(|tx| -> Result<bool, SyncError> {
        let contact = tx.fetch_contact_row(local_contact_id)?;
        if !tx.add_contact_group(local_contact_id, group_id)? {
            return Ok(false);
        }
        if !is_me {
            let outcome =
                tx.add_group_rel_change(local_contact_id, contact.server_contact_id, group_id)?;
            if let LogOutcome::Rejected(rejection) = outcome {
                return Err(SyncError::rejected(rejection, local_contact_id));
            }
        }
        Ok(true)
    })?;

    if changed {
        let mut effects = Effects::default();
        effects.touch(is_me);
        effects.publish(session, false);
    }
    Ok(())
}

/// Take a contact out of a group. Not a member is a successful no-op.
///
/// Fails with `NotReady` when the contact has never reached the server and
/// no pending addition can absorb the removal; nothing is changed then.
pub fn delete_contact_from_group(
    db: &PeopleDb,
    session: &SyncSession,
    local_contact_id: i64,
    group_id: i64,
) -> Result<(), SyncError> {
    let is_me = session.is_me_profile(local_contact_id);
    let changed = db.with_transaction(|tx| -> Result<bool, SyncError> {
        let contact = tx.fetch_contact_row(local_contact_id)?;
        if !tx.remove_contact_group(local_contact_id, group_id)? {
            return Ok(false);
        }
        if !is_me {
            let outcome =
                tx.delete_group_rel_change(local_contact_id, contact.server_contact_id, group_id)?;
            if let LogOutcome::Rejected(rejection) = outcome {
                return Err(SyncError::rejected(rejection, local_contact_id));
            }
        }
        Ok(true)
    })?;

    if changed {
        let mut effects = Effects::default();
        effects.touch(is_me);
        effects.publish(session, false);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::{ServerChange, ServerChangeType};
    use crate::error::ServiceStatus;
    use crate::services::contacts::{set_me_profile, sync_add_contact_list};
    use crate::services::test_utils::person;
    use crate::session::test_utils::test_session;

    fn synced_contact(db: &PeopleDb, session: &SyncSession, server_id: Option<i64>) -> i64 {
        let outcome = sync_add_contact_list(db, session, &mut [person("A", "1")], false, false);
        let id = outcome.succeeded[0];
        if server_id.is_some() {
            db.set_contact_server_id(id, server_id, None).expect("server id");
        }
        id
    }

    #[test]
    fn test_add_is_idempotent() {
        let db = test_db();
        let session = test_session(&db);
        let id = synced_contact(&db, &session, Some(7));

        add_contact_to_group(&db, &session, id, 3).expect("first");
        add_contact_to_group(&db, &session, id, 3).expect("second");

        assert!(db.contact_in_group(id, 3).expect("member"));
        let changes = db.fetch_all_contact_changes().expect("changes");
        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes[0].change,
            ServerChange::AddGroupRel {
                local_contact_id: id,
                server_contact_id: Some(7),
                group_id: 3,
            }
        );
    }

    #[test]
    fn test_remove_absent_relation_is_noop() {
        let db = test_db();
        let session = test_session(&db);
        let id = synced_contact(&db, &session, None);
        delete_contact_from_group(&db, &session, id, 3).expect("noop");
        assert_eq!(db.count_contact_changes(None).expect("count"), 0);
    }

    #[test]
    fn test_add_then_remove_cancels_out() {
        let db = test_db();
        let session = test_session(&db);
        let id = synced_contact(&db, &session, None);
        add_contact_to_group(&db, &session, id, 3).expect("add");
        delete_contact_from_group(&db, &session, id, 3).expect("remove");
        assert!(!db.contact_in_group(id, 3).expect("member"));
        assert_eq!(db.count_contact_changes(None).expect("count"), 0);
    }

    #[test]
    fn test_remove_before_server_id_is_not_ready() {
        let db = test_db();
        let session = test_session(&db);
        let mut contact = person("A", "1");
        contact.groups.insert(3);
        let id = sync_add_contact_list(&db, &session, &mut [contact], false, false).succeeded[0];

        let err = delete_contact_from_group(&db, &session, id, 3).expect_err("not ready");
        assert_eq!(err.status(), ServiceStatus::NotReady);
        assert!(db.contact_in_group(id, 3).expect("rolled back"));

        db.set_contact_server_id(id, Some(9), None).expect("server id");
        delete_contact_from_group(&db, &session, id, 3).expect("now ready");
        assert_eq!(
            db.count_contact_changes(Some(ServerChangeType::DeleteGroupRel))
                .expect("count"),
            1
        );
    }

    #[test]
    fn test_profile_membership_is_not_logged() {
        let db = test_db();
        let session = test_session(&db);
        let me = set_me_profile(&db, &session, &mut person("Me", "1")).expect("profile");
        add_contact_to_group(&db, &session, me, 1).expect("add");
        delete_contact_from_group(&db, &session, me, 1).expect("remove");
        assert_eq!(db.count_contact_changes(None).expect("count"), 0);
    }

    #[test]
    fn test_unknown_contact_is_not_found() {
        let db = test_db();
        let session = test_session(&db);
        let err = add_contact_to_group(&db, &session, 404, 1).expect_err("missing");
        assert_eq!(err.status(), ServiceStatus::NotFound);
    }
}
