// Change-log reads and confirmations for the sync transports.

use crate::db::{
    ContactChangeInfo, NativeChangeInfo, NativeChangeType, PeopleDb, ServerChangeType,
};
use crate::error::SyncError;
use crate::session::SyncSession;

/// One page of pending server changes in logging order. `limit` defaults to
/// the configured page size.
pub fn fetch_server_changes(
    db: &PeopleDb,
    session: &SyncSession,
    change_type: Option<ServerChangeType>,
    offset: i64,
    limit: Option<i64>,
) -> Result<Vec<ContactChangeInfo>, SyncError> {
    let limit = limit.unwrap_or_else(|| session.page_size());
    Ok(db.fetch_contact_change_log(change_type, offset.max(0), limit)?)
}

pub fn fetch_native_changes(
    db: &PeopleDb,
    session: &SyncSession,
    change_type: Option<NativeChangeType>,
    offset: i64,
    limit: Option<i64>,
) -> Result<Vec<NativeChangeInfo>, SyncError> {
    let limit = limit.unwrap_or_else(|| session.page_size());
    Ok(db.fetch_native_change_log(change_type, offset.max(0), limit)?)
}

/// Remove server changes the server acknowledged. Returns how many rows
/// were removed; ids already gone are ignored.
pub fn confirm_server_changes(db: &PeopleDb, change_ids: &[i64]) -> Result<usize, SyncError> {
    let removed = db.with_transaction(|tx| tx.delete_contact_changes(change_ids))?;
    log::debug!("Confirmed {} of {} server change(s)", removed, change_ids.len());
    Ok(removed)
}

pub fn confirm_native_changes(db: &PeopleDb, change_ids: &[i64]) -> Result<usize, SyncError> {
    let removed = db.with_transaction(|tx| tx.delete_native_changes(change_ids))?;
    log::debug!("Confirmed {} of {} native change(s)", removed, change_ids.len());
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::services::contacts::sync_add_contact_list;
    use crate::services::test_utils::person;
    use crate::session::test_utils::test_session;

    #[test]
    fn test_pages_concatenate_to_full_log() {
        let db = test_db();
        let session = test_session(&db);
        let mut contacts: Vec<_> = (0..500)
            .map(|i| person(&format!("Person {}", i), &format!("555{:04}", i)))
            .collect();
        let outcome = sync_add_contact_list(&db, &session, &mut contacts, true, false);
        assert_eq!(outcome.succeeded.len(), 500);

        let first = fetch_server_changes(&db, &session, None, 0, Some(50)).expect("page 1");
        let second = fetch_server_changes(&db, &session, None, 50, Some(50)).expect("page 2");
        let full = fetch_server_changes(&db, &session, None, 0, Some(100)).expect("both");
        assert_eq!(first.len(), 50);
        assert_eq!(second.len(), 50);

        let paged: Vec<i64> = first.iter().chain(&second).map(|c| c.change_id).collect();
        let unpaged: Vec<i64> = full.iter().map(|c| c.change_id).collect();
        assert_eq!(paged, unpaged);

        let all = db.fetch_all_contact_changes().expect("all");
        assert_eq!(all.len(), 500);
        assert_eq!(&all[..100], &full[..]);
    }

    #[test]
    fn test_default_limit_is_page_size() {
        let db = test_db();
        let session = test_session(&db);
        let mut contacts: Vec<_> = (0..(session.page_size() + 5))
            .map(|i| person("P", &i.to_string()))
            .collect();
        sync_add_contact_list(&db, &session, &mut contacts, false, true);

        let page = fetch_native_changes(&db, &session, None, 0, None).expect("page");
        assert_eq!(page.len() as i64, session.page_size());
        let rest = fetch_native_changes(&db, &session, Some(NativeChangeType::NewContact), session.page_size(), None)
            .expect("rest");
        assert_eq!(rest.len(), 5);
    }

    #[test]
    fn test_confirm_removes_only_acknowledged_rows() {
        let db = test_db();
        let session = test_session(&db);
        let mut contacts = vec![person("A", "1"), person("B", "2")];
        sync_add_contact_list(&db, &session, &mut contacts, true, true);

        let pending = fetch_server_changes(&db, &session, Some(ServerChangeType::NewContact), 0, None)
            .expect("pending");
        assert_eq!(pending.len(), 2);
        assert_eq!(
            confirm_server_changes(&db, &[pending[0].change_id, 9999]).expect("confirm"),
            1
        );
        assert_eq!(db.count_contact_changes(None).expect("server"), 1);
        assert_eq!(db.count_native_changes(None).expect("native"), 2);

        let native: Vec<i64> = db
            .fetch_all_native_changes()
            .expect("native")
            .iter()
            .map(|c| c.change_id)
            .collect();
        assert_eq!(confirm_native_changes(&db, &native).expect("confirm"), 2);
        assert_eq!(db.count_native_changes(None).expect("native"), 0);
    }
}
