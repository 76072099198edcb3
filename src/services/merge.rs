// Duplicate merge.
//
// A contact pushed to the server can come back with a server id that an
// existing contact already owns. The existing contact survives; the
// duplicate hands over its address-book linkage and is deleted.

use super::contacts::{delete_contact_unit, ContactDeleteRequest};
use super::{refresh_projection, BatchOutcome, Effects, SyncTarget};
use crate::db::{LogOutcome, NativeDetailIdInfo, PeopleDb, ServerIdInfo};
use crate::error::SyncError;
use crate::session::SyncSession;

fn check_logged(outcome: LogOutcome, local_contact_id: i64) -> Result<(), SyncError> {
    match outcome {
        LogOutcome::Rejected(rejection) => Err(SyncError::rejected(rejection, local_contact_id)),
        LogOutcome::Logged(_) | LogOutcome::Coalesced => Ok(()),
    }
}

/// Fold `duplicate` into `survivor` inside the caller's transaction.
///
/// When both contacts are linked to different address-book records the
/// survivor keeps its own: the duplicate's record is queued for deletion
/// and its moved details are queued as new details of the survivor's.
fn merge_unit(
    tx: &PeopleDb,
    duplicate: i64,
    survivor: i64,
    survivor_is_me: bool,
) -> Result<Effects, SyncError> {
    let dup = tx.fetch_contact(duplicate)?;
    let keep = tx.fetch_contact_row(survivor)?;

    let inherits_native = keep.native_contact_id.is_none() && dup.native_contact_id.is_some();
    let separate_records = keep.native_contact_id.is_some()
        && dup.native_contact_id.is_some()
        && keep.native_contact_id != dup.native_contact_id;
    let native_contact_id = keep.native_contact_id.or(dup.native_contact_id);
    if inherits_native {
        tx.set_contact_native_id(survivor, native_contact_id)?;
    }

    // Details without a native id are server copies the survivor already has
    for detail in &dup.details {
        let Some(native_detail_id) = detail.native_detail_id else {
            continue;
        };
        let detail_id = detail.local_detail_id.unwrap_or_default();
        let twin = tx.find_detail(survivor, detail.key, detail.value.as_deref())?;
        match twin {
            Some(twin) if !separate_records => {
                // Survivor keeps its own value and server identity
                tx.set_detail_native_ids(&NativeDetailIdInfo {
                    local_detail_id: twin.local_detail_id.unwrap_or_default(),
                    native_detail_id,
                    native_contact_id,
                })?;
            }
            Some(_) => {}
            None => {
                let moved_native_id = (!separate_records).then_some(native_detail_id);
                tx.reparent_detail(detail_id, survivor, native_contact_id, moved_native_id)?;
                let mut moved = detail.clone();
                moved.local_contact_id = Some(survivor);
                moved.server_detail_id = None;
                moved.native_contact_id = native_contact_id;
                moved.native_detail_id = moved_native_id;
                if !survivor_is_me {
                    check_logged(
                        tx.add_new_contact_detail_change(&moved, keep.server_contact_id)?,
                        survivor,
                    )?;
                    if separate_records {
                        check_logged(
                            tx.add_new_native_detail_change(&moved, native_contact_id)?,
                            survivor,
                        )?;
                    }
                }
            }
        }
    }

    // The survivor now lives in the duplicate's address-book record: a
    // pending creation there would write a second one
    if inherits_native && !survivor_is_me {
        tx.drop_native_changes_for(survivor)?;
        for detail in tx.fetch_contact_details(survivor)? {
            if detail.native_detail_id.is_none() {
                check_logged(
                    tx.add_new_native_detail_change(&detail, native_contact_id)?,
                    survivor,
                )?;
            }
        }
    }

    let mut effects = Effects::default();
    effects.touch(survivor_is_me);
    if let Some(name) = refresh_projection(tx, survivor, survivor_is_me)? {
        if tx.update_timeline_names(survivor, &name)? > 0 {
            effects.timeline = true;
        }
    }

    let request = ContactDeleteRequest::merged(duplicate, survivor);
    effects.absorb(delete_contact_unit(tx, &request, SyncTarget::Both)?);
    if separate_records {
        log::debug!(
            "Contact {} keeps native record {:?}; removing {:?}",
            survivor,
            keep.native_contact_id,
            dup.native_contact_id
        );
        tx.add_deleted_native_contact_change(duplicate, dup.native_contact_id)?;
    }
    Ok(effects)
}

/// Merge server-detected duplicates, one transaction per pair.
///
/// Each entry names the duplicate's local id and the server id it was
/// given; the survivor is the contact already owning that server id. When
/// nobody owns it any more the server id is simply assigned.
pub fn sync_merge_contact_list(
    db: &PeopleDb,
    session: &SyncSession,
    duplicates: &[ServerIdInfo],
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    let mut effects = Effects::default();

    for (index, info) in duplicates.iter().enumerate() {
        let duplicate = info.local_id;
        let result = db.with_transaction(|tx| -> Result<Effects, SyncError> {
            if !tx.contact_exists(duplicate)? {
                return Err(SyncError::NotFound(format!("contact {}", duplicate)));
            }
            match tx.local_id_for_server_id(info.server_id)? {
                Some(survivor) if survivor != duplicate => {
                    log::info!("Merging contact {} into {}", duplicate, survivor);
                    merge_unit(tx, duplicate, survivor, session.is_me_profile(survivor))
                }
                Some(_) => Ok(Effects::default()),
                None => {
                    tx.set_contact_server_id(duplicate, Some(info.server_id), info.user_id)?;
                    tx.refresh_summary_flags(duplicate)?;
                    Ok(Effects {
                        contacts: true,
                        ..Effects::default()
                    })
                }
            }
        });
        let result = result.map(|unit| {
            effects.absorb(unit);
            duplicate
        });
        outcome.record(index, result);
    }

    effects.publish(session, true);
    outcome
}
