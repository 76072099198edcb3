// Detail-level orchestration.
//
// A detail list is one logical unit: the whole list commits or none of it
// does. Projections are rebuilt once per touched contact at the end.

use std::collections::BTreeMap;

use super::{refresh_projection, Effects, Origin, SyncTarget};
use crate::db::{ContactDetail, DetailKey, IdStrip, LogOutcome, PeopleDb};
use crate::error::SyncError;
use crate::session::SyncSession;

/// What a unit did to one contact, applied once after all its details.
#[derive(Debug, Default)]
struct ContactTouch {
    is_me_profile: bool,
    name_changed: bool,
    /// (old number, new number) for every phone detail written.
    phone_moves: Vec<(Option<String>, Option<String>)>,
    reset_picture: bool,
}

#[derive(Default)]
struct DetailUnit {
    touched: BTreeMap<i64, ContactTouch>,
    effects: Effects,
}

impl DetailUnit {
    fn touch(&mut self, local_contact_id: i64, is_me_profile: bool) -> &mut ContactTouch {
        let entry = self.touched.entry(local_contact_id).or_default();
        entry.is_me_profile = is_me_profile;
        self.effects.touch(is_me_profile);
        entry
    }

    /// Record the projection-relevant consequences of writing `detail`,
    /// whose previous value was `old_value`.
    fn note(
        &mut self,
        tx: &PeopleDb,
        detail: &ContactDetail,
        old_value: Option<&str>,
        is_me_profile: bool,
        origin: Origin,
    ) -> Result<(), SyncError> {
        let contact_id = detail.local_contact_id.unwrap_or_default();
        let new_value = detail.trimmed_value().map(str::to_string);
        match detail.key {
            DetailKey::Name | DetailKey::Nickname | DetailKey::Org => {
                self.touch(contact_id, is_me_profile).name_changed = true;
            }
            DetailKey::Phone => {
                let moved = (old_value.map(str::to_string), new_value);
                let touch = self.touch(contact_id, is_me_profile);
                touch.name_changed = true;
                touch.phone_moves.push(moved);
            }
            DetailKey::Photo => {
                let touch = self.touch(contact_id, is_me_profile);
                match new_value {
                    Some(url) if old_value != Some(url.as_str()) => touch.reset_picture = true,
                    Some(_) => {}
                    None => {
                        // Locally changed picture: the client uploads it, nothing to download
                        if is_me_profile && !origin.external() {
                            tx.set_me_profile_avatar_changed(true)?;
                        }
                    }
                }
            }
            DetailKey::PresenceText if is_me_profile => {
                self.touch(contact_id, true);
                self.effects.me_presence = true;
            }
            _ => {
                self.touch(contact_id, is_me_profile);
            }
        }
        Ok(())
    }

    /// Rebuild summary rows and re-key timeline rows for every touched contact.
    fn finish(mut self, tx: &PeopleDb) -> Result<Effects, SyncError> {
        for (contact_id, touch) in std::mem::take(&mut self.touched) {
            if !tx.contact_exists(contact_id)? {
                continue;
            }
            let Some(name) = refresh_projection(tx, contact_id, touch.is_me_profile)? else {
                continue;
            };
            if touch.name_changed && tx.update_timeline_names(contact_id, &name)? > 0 {
                self.effects.timeline = true;
            }
            for (old, new) in &touch.phone_moves {
                tx.relink_timeline_phone(contact_id, old.as_deref(), new.as_deref(), &name)?;
                self.effects.timeline = true;
            }
            if touch.reset_picture {
                tx.set_summary_picture_loaded(contact_id, false)?;
            }
        }
        Ok(self.effects)
    }
}

fn check_logged(outcome: LogOutcome, local_contact_id: i64) -> Result<(), SyncError> {
    match outcome {
        LogOutcome::Rejected(rejection) => Err(SyncError::rejected(rejection, local_contact_id)),
        LogOutcome::Logged(_) | LogOutcome::Coalesced => Ok(()),
    }
}

fn target_for(session: &SyncSession, origin: Origin, local_contact_id: i64) -> (SyncTarget, bool) {
    let is_me = session.is_me_profile(local_contact_id);
    (origin.target(is_me), is_me)
}

fn add_details_unit(
    tx: &PeopleDb,
    session: &SyncSession,
    details: &mut [ContactDetail],
    origin: Origin,
) -> Result<(Vec<i64>, Effects), SyncError> {
    let mut unit = DetailUnit::default();
    let mut ids = Vec::with_capacity(details.len());

    for detail in details.iter_mut() {
        let contact_id = detail
            .local_contact_id
            .ok_or_else(|| SyncError::NotFound("detail without owning contact".into()))?;
        let contact = tx.fetch_contact_row(contact_id)?;
        let (target, is_me) = target_for(session, origin, contact_id);

        detail.local_detail_id = None;
        let detail_id = tx.add_contact_detail(
            detail,
            IdStrip::new(target.server(), target.native()),
        )?;
        if target.server() {
            check_logged(
                tx.add_new_contact_detail_change(detail, contact.server_contact_id)?,
                contact_id,
            )?;
        }
        if target.native() {
            check_logged(
                tx.add_new_native_detail_change(detail, contact.native_contact_id)?,
                contact_id,
            )?;
        }
        unit.note(tx, detail, None, is_me, origin)?;
        ids.push(detail_id);
    }

    Ok((ids, unit.finish(tx)?))
}

fn modify_details_unit(
    tx: &PeopleDb,
    session: &SyncSession,
    details: &mut [ContactDetail],
    origin: Origin,
) -> Result<Effects, SyncError> {
    let mut unit = DetailUnit::default();

    for detail in details.iter_mut() {
        let detail_id = detail
            .local_detail_id
            .ok_or_else(|| SyncError::NotFound("detail without local id".into()))?;
        let stored = tx.fetch_contact_detail(detail_id)?;
        let contact_id = stored.local_contact_id.unwrap_or_default();
        let contact = tx.fetch_contact_row(contact_id)?;
        let (target, is_me) = target_for(session, origin, contact_id);

        tx.modify_contact_detail(detail)?;
        detail.server_detail_id = detail.server_detail_id.or(stored.server_detail_id);
        detail.native_detail_id = detail.native_detail_id.or(stored.native_detail_id);
        detail.native_contact_id = detail.native_contact_id.or(stored.native_contact_id);

        if target.server() {
            check_logged(
                tx.add_modified_contact_detail_change(detail, contact.server_contact_id)?,
                contact_id,
            )?;
        }
        if target.native() {
            check_logged(
                tx.add_modified_native_detail_change(detail, contact.native_contact_id)?,
                contact_id,
            )?;
        }
        unit.note(tx, detail, stored.trimmed_value(), is_me, origin)?;
    }

    unit.finish(tx)
}

fn delete_details_unit(
    tx: &PeopleDb,
    session: &SyncSession,
    detail_ids: &[i64],
    origin: Origin,
) -> Result<Effects, SyncError> {
    let mut unit = DetailUnit::default();

    for detail_id in detail_ids {
        let stored = tx.fetch_contact_detail(*detail_id)?;
        let contact_id = stored.local_contact_id.unwrap_or_default();
        let contact = tx.fetch_contact_row(contact_id)?;
        let (target, is_me) = target_for(session, origin, contact_id);

        if target.server() {
            check_logged(
                tx.add_deleted_contact_detail_change(&stored, contact.server_contact_id)?,
                contact_id,
            )?;
        }
        if target.native() {
            check_logged(
                tx.add_deleted_native_detail_change(&stored, contact.native_contact_id)?,
                contact_id,
            )?;
        }
        tx.delete_contact_detail(*detail_id)?;

        // Old value moves out; a deleted photo leaves nothing to reset
        let mut removed = stored.clone();
        removed.value = None;
        let old = stored.trimmed_value();
        if stored.key == DetailKey::Photo {
            unit.touch(contact_id, is_me);
        } else {
            unit.note(tx, &removed, old, is_me, origin)?;
        }
    }

    unit.finish(tx)
}

/// Add details to existing contacts as one unit. Returns the new local ids.
pub fn sync_add_contact_detail_list(
    db: &PeopleDb,
    session: &SyncSession,
    details: &mut [ContactDetail],
    sync_to_server: bool,
    sync_to_native: bool,
) -> Result<Vec<i64>, SyncError> {
    let origin = Origin::new(sync_to_server, sync_to_native);
    let result = db.with_transaction(|tx| add_details_unit(tx, session, details, origin));
    match result {
        Ok((ids, effects)) => {
            effects.publish(session, origin.external());
            Ok(ids)
        }
        Err(e) => {
            for detail in details.iter_mut() {
                detail.local_detail_id = None;
            }
            log::warn!("Detail list rolled back: {}", e);
            Err(e)
        }
    }
}

pub fn sync_modify_contact_detail_list(
    db: &PeopleDb,
    session: &SyncSession,
    details: &mut [ContactDetail],
    sync_to_server: bool,
    sync_to_native: bool,
) -> Result<(), SyncError> {
    let origin = Origin::new(sync_to_server, sync_to_native);
    let effects = db
        .with_transaction(|tx| modify_details_unit(tx, session, details, origin))
        .inspect_err(|e| log::warn!("Detail list rolled back: {}", e))?;
    effects.publish(session, origin.external());
    Ok(())
}

pub fn sync_delete_contact_detail_list(
    db: &PeopleDb,
    session: &SyncSession,
    local_detail_ids: &[i64],
    sync_to_server: bool,
    sync_to_native: bool,
) -> Result<(), SyncError> {
    let origin = Origin::new(sync_to_server, sync_to_native);
    let effects = db
        .with_transaction(|tx| delete_details_unit(tx, session, local_detail_ids, origin))
        .inspect_err(|e| log::warn!("Detail list rolled back: {}", e))?;
    effects.publish(session, origin.external());
    Ok(())
}

/// Add a detail edited on this device.
pub fn add_contact_detail(
    db: &PeopleDb,
    session: &SyncSession,
    detail: &mut ContactDetail,
) -> Result<i64, SyncError> {
    let ids = sync_add_contact_detail_list(db, session, std::slice::from_mut(detail), true, true)?;
    ids.first()
        .copied()
        .ok_or_else(|| SyncError::Corrupt("detail insert returned no id".into()))
}

pub fn modify_contact_detail(
    db: &PeopleDb,
    session: &SyncSession,
    detail: &mut ContactDetail,
) -> Result<(), SyncError> {
    sync_modify_contact_detail_list(db, session, std::slice::from_mut(detail), true, true)
}

pub fn delete_contact_detail(
    db: &PeopleDb,
    session: &SyncSession,
    local_detail_id: i64,
) -> Result<(), SyncError> {
    sync_delete_contact_detail_list(db, session, &[local_detail_id], true, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::{ServerChangeType, TimelineEvent, TimelineEventKind, ORDER_NORMAL};
    use crate::error::ServiceStatus;
    use crate::services::contacts::{add_contact, delete_contact, set_me_profile, sync_add_contact_list};
    use crate::services::test_utils::person;
    use crate::session::test_utils::test_session;

    fn detail_of(db: &PeopleDb, contact_id: i64, key: DetailKey) -> ContactDetail {
        db.fetch_contact_details(contact_id)
            .expect("details")
            .into_iter()
            .find(|d| d.key == key)
            .expect("detail present")
    }

    #[test]
    fn test_rename_propagates_to_timeline() {
        let db = test_db();
        let session = test_session(&db);
        let jane = add_contact(&db, &session, &mut person("Jane Doe", "555-1234")).expect("add");
        assert_eq!(
            db.fetch_formatted_name(jane).expect("name").as_deref(),
            Some("Jane Doe")
        );

        let mut call = TimelineEvent {
            contact_address: Some("555-1234".into()),
            event_kind: TimelineEventKind::Call,
            timestamp: 1,
            ..TimelineEvent::default()
        };
        db.add_timeline_event(&mut call).expect("call");
        assert_eq!(call.contact_name.as_deref(), Some("Jane Doe"));

        let mut name = detail_of(&db, jane, DetailKey::Name);
        name.value = Some("Jane Smith".into());
        modify_contact_detail(&db, &session, &mut name).expect("rename");

        let stored = db
            .fetch_timeline_event(call.timeline_id.expect("id"))
            .expect("fetch")
            .expect("row");
        assert_eq!(stored.contact_name.as_deref(), Some("Jane Smith"));
        assert_eq!(
            db.fetch_formatted_name(jane).expect("name").as_deref(),
            Some("Jane Smith")
        );
    }

    #[test]
    fn test_phone_change_rekeys_timeline() {
        let db = test_db();
        let session = test_session(&db);
        let jane = add_contact(&db, &session, &mut person("Jane", "111")).expect("add");
        let mut unknown = TimelineEvent {
            contact_address: Some("222".into()),
            event_kind: TimelineEventKind::Sms,
            ..TimelineEvent::default()
        };
        db.add_timeline_event(&mut unknown).expect("sms");
        assert_eq!(unknown.local_contact_id, None);
        let mut earlier = TimelineEvent {
            contact_address: Some("111".into()),
            event_kind: TimelineEventKind::Call,
            ..TimelineEvent::default()
        };
        db.add_timeline_event(&mut earlier).expect("call");
        assert_eq!(earlier.local_contact_id, Some(jane));

        let mut phone = detail_of(&db, jane, DetailKey::Phone);
        phone.value = Some("222".into());
        modify_contact_detail(&db, &session, &mut phone).expect("modify");

        let rows = db.fetch_timeline_for_contact(jane).expect("rows");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.contact_name.as_deref() == Some("Jane")));
        assert_eq!(
            db.fetch_timeline_for_address(TimelineEventKind::Call, "222")
                .expect("grouped")
                .len(),
            2
        );
    }

    #[test]
    fn test_second_preferred_detail_is_demoted() {
        let db = test_db();
        let session = test_session(&db);
        let id = add_contact(&db, &session, &mut person("A", "1")).expect("add");

        let mut first = ContactDetail::new(DetailKey::Email, "a@x").preferred();
        first.local_contact_id = Some(id);
        let mut second = ContactDetail::new(DetailKey::Email, "b@x").preferred();
        second.local_contact_id = Some(id);
        sync_add_contact_detail_list(&db, &session, &mut [first, second], true, true)
            .expect("add");

        let emails: Vec<ContactDetail> = db
            .fetch_contact_details(id)
            .expect("details")
            .into_iter()
            .filter(|d| d.key == DetailKey::Email)
            .collect();
        assert_eq!(emails.iter().filter(|d| d.is_preferred()).count(), 1);
        let b = emails
            .iter()
            .find(|d| d.value.as_deref() == Some("b@x"))
            .expect("b");
        assert_eq!(b.order, ORDER_NORMAL);
    }

    #[test]
    fn test_detail_list_is_atomic() {
        let db = test_db();
        let session = test_session(&db);
        let id = add_contact(&db, &session, &mut person("A", "1")).expect("add");

        let mut good = ContactDetail::new(DetailKey::Note, "ok");
        good.local_contact_id = Some(id);
        let mut orphan = ContactDetail::new(DetailKey::Note, "orphan");
        orphan.local_contact_id = Some(9999);
        let mut batch = [good, orphan];
        let err = sync_add_contact_detail_list(&db, &session, &mut batch, true, true)
            .expect_err("orphan must fail");
        assert_eq!(err.status(), ServiceStatus::NotFound);
        assert!(batch[0].local_detail_id.is_none());
        assert!(db
            .find_detail(id, DetailKey::Note, Some("ok"))
            .expect("find")
            .is_none());
    }

    #[test]
    fn test_detail_change_after_contact_delete_is_rejected() {
        let db = test_db();
        let session = test_session(&db);
        let outcome = sync_add_contact_list(&db, &session, &mut [person("A", "1")], false, false);
        let id = outcome.succeeded[0];
        db.set_contact_server_id(id, Some(10), None).expect("server id");
        let phone = detail_of(&db, id, DetailKey::Phone);
        db.add_deleted_contact_change(id, Some(10)).expect("pending delete");

        let err = delete_contact_detail(&db, &session, phone.local_detail_id.expect("id"))
            .expect_err("rejected");
        assert_eq!(err.status(), ServiceStatus::NotFound);
        assert!(db.fetch_contact_detail(phone.local_detail_id.expect("id")).is_ok());
    }

    #[test]
    fn test_modify_synced_detail_logs_modify() {
        let db = test_db();
        let session = test_session(&db);
        let outcome = sync_add_contact_list(&db, &session, &mut [person("A", "1")], false, false);
        let id = outcome.succeeded[0];
        db.set_contact_server_id(id, Some(10), None).expect("server id");
        let mut phone = detail_of(&db, id, DetailKey::Phone);
        db.set_detail_server_id(phone.local_detail_id.expect("id"), Some(20))
            .expect("detail id");

        phone.value = Some("2".into());
        phone.server_detail_id = None;
        sync_modify_contact_detail_list(&db, &session, std::slice::from_mut(&mut phone), true, false)
            .expect("modify");

        let changes = db.fetch_all_contact_changes().expect("changes");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change.change_type(), ServerChangeType::ModifyDetail);
        assert_eq!(db.count_native_changes(None).expect("native"), 0);
    }

    #[test]
    fn test_deleting_last_detail_drops_summary() {
        let db = test_db();
        let session = test_session(&db);
        let mut contact = crate::db::Contact::default()
            .with_detail(ContactDetail::new(DetailKey::Name, "Solo"));
        let id = add_contact(&db, &session, &mut contact).expect("add");
        assert!(db.fetch_summary_item(id).expect("summary").is_some());

        let name = detail_of(&db, id, DetailKey::Name);
        delete_contact_detail(&db, &session, name.local_detail_id.expect("id")).expect("delete");
        assert!(db.fetch_summary_item(id).expect("summary").is_none());
        assert!(db.contact_exists(id).expect("exists"));
        delete_contact(&db, &session, id).expect("cleanup");
    }

    #[test]
    fn test_photo_url_change_resets_picture_flag() {
        let db = test_db();
        let session = test_session(&db);
        let mut contact = person("A", "1")
            .with_detail(ContactDetail::new(DetailKey::Photo, "http://img/1"));
        let id = add_contact(&db, &session, &mut contact).expect("add");
        db.set_summary_picture_loaded(id, true).expect("loaded");

        let mut photo = detail_of(&db, id, DetailKey::Photo);
        photo.value = Some("http://img/1".into());
        modify_contact_detail(&db, &session, &mut photo).expect("same url");
        assert!(db.fetch_summary_item(id).expect("summary").expect("row").picture_loaded);

        photo.value = Some("http://img/2".into());
        sync_modify_contact_detail_list(&db, &session, std::slice::from_mut(&mut photo), false, true)
            .expect("new url");
        assert!(!db.fetch_summary_item(id).expect("summary").expect("row").picture_loaded);
    }

    #[test]
    fn test_local_profile_photo_raises_avatar_flag() {
        let db = test_db();
        let session = test_session(&db);
        let me = set_me_profile(&db, &session, &mut person("Me", "1")).expect("profile");
        db.set_summary_picture_loaded(me, true).expect("loaded");

        let mut photo = ContactDetail::new(DetailKey::Photo, "");
        photo.local_contact_id = Some(me);
        add_contact_detail(&db, &session, &mut photo).expect("add photo");

        assert!(db.me_profile_avatar_changed().expect("flag"));
        assert!(db.fetch_summary_item(me).expect("summary").expect("row").picture_loaded);
        assert_eq!(db.count_contact_changes(None).expect("server"), 0);
    }
}
