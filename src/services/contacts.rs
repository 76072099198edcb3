// Contact-level orchestration: add, modify and delete whole contacts.

use serde::{Deserialize, Serialize};

use super::{refresh_projection, BatchOutcome, Effects, Origin, SyncTarget};
use crate::db::{Contact, DetailKey, IdStrip, PeopleDb};
use crate::error::SyncError;
use crate::notify::ChangeKind;
use crate::session::SyncSession;

/// One contact to delete. `merged_into` names the survivor when the
/// contact is a duplicate folded into another one; the native record is
/// then kept and the timeline follows the survivor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDeleteRequest {
    pub local_contact_id: i64,
    pub merged_into: Option<i64>,
}

impl ContactDeleteRequest {
    pub fn new(local_contact_id: i64) -> Self {
        Self {
            local_contact_id,
            merged_into: None,
        }
    }

    pub fn merged(local_contact_id: i64, survivor: i64) -> Self {
        Self {
            local_contact_id,
            merged_into: Some(survivor),
        }
    }
}

/// Local id of a contact an earlier run already stored from the same
/// remote record. Only ids the unit keeps are looked up.
fn already_applied(tx: &PeopleDb, contact: &Contact, target: SyncTarget) -> Result<Option<i64>, SyncError> {
    if !target.server() {
        if let Some(server_id) = contact.server_contact_id {
            if let Some(local_id) = tx.local_id_for_server_id(server_id)? {
                return Ok(Some(local_id));
            }
        }
    }
    if !target.native() {
        if let Some(native_id) = contact.native_contact_id {
            if let Some(existing) = tx.fetch_contact_by_native_id(native_id)? {
                return Ok(existing.local_contact_id);
            }
        }
    }
    Ok(None)
}

/// Insert one contact with everything it owns. Runs inside the caller's
/// transaction.
///
/// An inbound contact whose remote id is already stored was applied by an
/// earlier run; its existing local id is returned and nothing is written.
pub(crate) fn add_contact_unit(
    tx: &PeopleDb,
    contact: &mut Contact,
    target: SyncTarget,
) -> Result<(i64, Effects), SyncError> {
    if let Some(existing) = already_applied(tx, contact, target)? {
        log::debug!("Inbound contact already stored as {}", existing);
        contact.local_contact_id = Some(existing);
        return Ok((existing, Effects::default()));
    }

    let strip = IdStrip::new(target.server(), target.native());
    let local_id = tx.add_contact(contact, strip)?;

    for detail in contact.details.iter_mut() {
        detail.local_contact_id = Some(local_id);
        detail.local_detail_id = None;
        tx.add_contact_detail(detail, strip)?;
    }
    for group in &contact.groups {
        tx.add_contact_group(local_id, *group)?;
    }
    for source in &contact.sources {
        tx.add_contact_source(local_id, source)?;
    }

    // Details, groups and sources travel with the creation request
    if target.server() {
        tx.add_new_contact_change(local_id)?;
    }
    if target.native() {
        tx.add_new_native_contact_change(local_id)?;
    }

    let mut effects = Effects {
        contacts: true,
        ..Effects::default()
    };
    if let Some(name) = refresh_projection(tx, local_id, false)? {
        for phone in contact.details.iter().filter(|d| d.key == DetailKey::Phone) {
            tx.relink_timeline_phone(local_id, None, phone.value.as_deref(), &name)?;
            effects.timeline = true;
        }
    } else {
        log::debug!("Contact {} has no details; not listed", local_id);
    }
    Ok((local_id, effects))
}

/// Forget ids handed out by a unit that rolled back.
fn clear_assigned_ids(contact: &mut Contact) {
    contact.local_contact_id = None;
    for detail in contact.details.iter_mut() {
        detail.local_contact_id = None;
        detail.local_detail_id = None;
    }
}

/// Add contacts one transaction at a time.
///
/// Server and native ids are stripped for every side the contact still has
/// to be pushed to. Inbound records flagged `deleted` are skipped.
pub fn sync_add_contact_list(
    db: &PeopleDb,
    session: &SyncSession,
    contacts: &mut [Contact],
    sync_to_server: bool,
    sync_to_native: bool,
) -> BatchOutcome {
    let origin = Origin::new(sync_to_server, sync_to_native);
    let target = origin.target(false);
    let mut outcome = BatchOutcome::default();
    let mut effects = Effects::default();

    for (index, contact) in contacts.iter_mut().enumerate() {
        if contact.deleted {
            log::debug!("Skipping inbound contact {} flagged deleted", index);
            continue;
        }
        let result = db.with_transaction(|tx| add_contact_unit(tx, contact, target));
        let result = match result {
            Ok((local_id, unit)) => {
                effects.absorb(unit);
                Ok(local_id)
            }
            Err(e) => {
                clear_assigned_ids(contact);
                Err(e)
            }
        };
        outcome.record(index, result);
    }

    effects.publish(session, origin.external());
    outcome
}

/// Add a contact created on this device; queued for server and native.
pub fn add_contact(
    db: &PeopleDb,
    session: &SyncSession,
    contact: &mut Contact,
) -> Result<i64, SyncError> {
    let target = Origin::LOCAL.target(false);
    let result = db.with_transaction(|tx| add_contact_unit(tx, contact, target));
    match result {
        Ok((local_id, effects)) => {
            effects.publish(session, false);
            Ok(local_id)
        }
        Err(e) => {
            clear_assigned_ids(contact);
            Err(e)
        }
    }
}

/// Store `contact` as the me profile, replacing any previous profile pointer.
///
/// A contact carrying the local id of an existing row is promoted in place;
/// otherwise it is inserted. The profile never reaches either change log,
/// so pending rows of a promoted contact are dropped. The previous profile
/// stays as an ordinary contact.
pub fn set_me_profile(
    db: &PeopleDb,
    session: &SyncSession,
    contact: &mut Contact,
) -> Result<i64, SyncError> {
    let previous = session.me_profile_id();
    let local_id = db.with_transaction(|tx| -> Result<i64, SyncError> {
        let local_id = match contact.local_contact_id {
            Some(id) if tx.contact_exists(id)? => id,
            _ => add_contact_unit(tx, contact, SyncTarget::None)?.0,
        };
        tx.drop_contact_changes_for(local_id)?;
        tx.drop_native_changes_for(local_id)?;

        tx.set_me_profile_id(Some(local_id))?;
        tx.update_contact_name_in_summary(local_id, true)?;

        if let Some(prev) = previous.filter(|p| *p != local_id) {
            if tx.contact_exists(prev)? {
                refresh_projection(tx, prev, false)?;
            }
        }
        Ok(local_id)
    })?;

    log::info!("Contact {} is now the me profile", local_id);
    session.set_me_profile_id(Some(local_id));
    let notifier = session.notifier();
    notifier.fire(ChangeKind::MeProfile, false);
    if previous.is_some_and(|p| p != local_id) {
        notifier.fire(ChangeKind::Contacts, false);
    }
    Ok(local_id)
}

/// Update scalar contact fields and source tags.
///
/// These fields are owned by the server (friendship, sync-to-phone flag,
/// account id), so no change-log rows are written. Details and groups go
/// through their own operations.
pub fn sync_modify_contact_list(
    db: &PeopleDb,
    session: &SyncSession,
    contacts: &[Contact],
    sync_to_server: bool,
    sync_to_native: bool,
) -> BatchOutcome {
    let origin = Origin::new(sync_to_server, sync_to_native);
    let mut outcome = BatchOutcome::default();
    let mut effects = Effects::default();

    for (index, contact) in contacts.iter().enumerate() {
        let result = db.with_transaction(|tx| -> Result<i64, SyncError> {
            let local_id = contact
                .local_contact_id
                .ok_or_else(|| SyncError::NotFound("contact without local id".into()))?;
            tx.modify_contact(contact)?;
            tx.delete_contact_sources(local_id)?;
            for source in &contact.sources {
                tx.add_contact_source(local_id, source)?;
            }
            tx.refresh_summary_flags(local_id)?;
            Ok(local_id)
        });
        if let Ok(local_id) = &result {
            effects.touch(session.is_me_profile(*local_id));
        }
        outcome.record(index, result);
    }

    effects.publish(session, origin.external());
    outcome
}

/// Delete one contact and everything derived from it. Runs inside the
/// caller's transaction; the thumbnail file is removed after commit.
pub(crate) fn delete_contact_unit(
    tx: &PeopleDb,
    request: &ContactDeleteRequest,
    target: SyncTarget,
) -> Result<Effects, SyncError> {
    let local_id = request.local_contact_id;
    let contact = tx.fetch_contact_row(local_id)?;
    let merged = request.merged_into.is_some();

    // A merged duplicate keeps its native record, now owned by the survivor
    if target.native() && !merged {
        tx.add_deleted_native_contact_change(local_id, contact.native_contact_id)?;
    } else {
        tx.drop_native_changes_for(local_id)?;
    }
    if target.server() && !merged {
        tx.add_deleted_contact_change(local_id, contact.server_contact_id)?;
    } else {
        tx.drop_contact_changes_for(local_id)?;
    }

    let mut effects = Effects::default();
    if tx.fetch_me_profile_id()? == Some(local_id) {
        tx.set_me_profile_id(None)?;
        tx.set_me_profile_avatar_changed(false)?;
        effects.profile_cleared = true;
        effects.me_profile = true;
    } else {
        effects.contacts = true;
    }

    tx.delete_summary(local_id)?;
    tx.delete_contact_details(local_id)?;
    tx.delete_contact(local_id)?;

    let moved = match request.merged_into {
        Some(survivor) => {
            let name = tx.fetch_formatted_name(survivor)?.unwrap_or_default();
            tx.repoint_timeline_contact(local_id, survivor, &name)?
        }
        None => tx.unlink_timeline_contact(local_id)?,
    };
    effects.timeline = moved > 0;
    effects.thumbnails_to_delete.push(local_id);
    Ok(effects)
}

/// Delete contacts one transaction at a time.
pub fn sync_delete_contact_list(
    db: &PeopleDb,
    session: &SyncSession,
    requests: &[ContactDeleteRequest],
    sync_to_server: bool,
    sync_to_native: bool,
) -> BatchOutcome {
    let origin = Origin::new(sync_to_server, sync_to_native);
    let mut outcome = BatchOutcome::default();
    let mut effects = Effects::default();

    for (index, request) in requests.iter().enumerate() {
        let target = origin.target(session.is_me_profile(request.local_contact_id));
        let result = db
            .with_transaction(|tx| delete_contact_unit(tx, request, target))
            .map(|unit| {
                effects.absorb(unit);
                request.local_contact_id
            });
        outcome.record(index, result);
    }

    effects.publish(session, origin.external());
    outcome
}

/// Delete a contact on this device; queued for server and native.
pub fn delete_contact(db: &PeopleDb, session: &SyncSession, local_id: i64) -> Result<(), SyncError> {
    let request = ContactDeleteRequest::new(local_id);
    let target = Origin::LOCAL.target(session.is_me_profile(local_id));
    let effects = db.with_transaction(|tx| delete_contact_unit(tx, &request, target))?;
    effects.publish(session, false);
    Ok(())
}

/// Contact with its details, groups and sources.
pub fn fetch_contact(db: &PeopleDb, local_id: i64) -> Result<Contact, SyncError> {
    Ok(db.fetch_contact(local_id)?)
}
