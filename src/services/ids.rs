// Bulk remote id assignment after a successful push.
//
// Each list is one transaction. Rows deleted locally since the push are
// skipped rather than failing the batch.

use super::Effects;
use crate::db::{
    DbError, NativeDetailIdInfo, NativeIdInfo, PeopleDb, ServerDetailIdInfo, ServerIdInfo,
};
use crate::error::SyncError;
use crate::session::SyncSession;

/// Treat a vanished local row as "nothing to do".
fn skip_missing(result: Result<(), DbError>, what: &str, id: i64) -> Result<bool, DbError> {
    match result {
        Ok(()) => Ok(true),
        Err(DbError::NotFound(_)) => {
            log::debug!("Skipping id assignment for vanished {} {}", what, id);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn publish_if(changed: bool, session: &SyncSession) {
    if changed {
        let effects = Effects {
            contacts: true,
            ..Effects::default()
        };
        effects.publish(session, true);
    }
}

/// Store server ids for freshly pushed contacts.
///
/// A server id already owned by another local contact means the server
/// recognised the push as a duplicate; those pairs are left unassigned and
/// returned so the caller can merge them with
/// [`sync_merge_contact_list`](super::merge::sync_merge_contact_list).
pub fn sync_set_server_ids(
    db: &PeopleDb,
    session: &SyncSession,
    ids: &[ServerIdInfo],
) -> Result<Vec<ServerIdInfo>, SyncError> {
    let (duplicates, changed) = db.with_transaction(|tx| -> Result<_, SyncError> {
        let mut duplicates = Vec::new();
        let mut changed = false;
        for info in ids {
            if !tx.contact_exists(info.local_id)? {
                log::debug!("Skipping server id for vanished contact {}", info.local_id);
                continue;
            }
            match tx.local_id_for_server_id(info.server_id)? {
                Some(owner) if owner == info.local_id => continue,
                Some(owner) => {
                    log::info!(
                        "Contact {} duplicates contact {} (server id {})",
                        info.local_id,
                        owner,
                        info.server_id
                    );
                    duplicates.push(*info);
                    continue;
                }
                None => {}
            }
            tx.set_contact_server_id(info.local_id, Some(info.server_id), info.user_id)?;
            tx.refresh_summary_flags(info.local_id)?;
            changed = true;
        }
        Ok((duplicates, changed))
    })?;

    publish_if(changed, session);
    Ok(duplicates)
}

pub fn sync_set_server_detail_ids(
    db: &PeopleDb,
    session: &SyncSession,
    ids: &[ServerDetailIdInfo],
) -> Result<(), SyncError> {
    let changed = db.with_transaction(|tx| -> Result<bool, SyncError> {
        let mut changed = false;
        for info in ids {
            changed |= skip_missing(
                tx.set_detail_server_id(info.local_detail_id, Some(info.server_detail_id)),
                "detail",
                info.local_detail_id,
            )?;
        }
        Ok(changed)
    })?;
    publish_if(changed, session);
    Ok(())
}

/// Store native ids for contacts written to the device address book. Every
/// detail of the contact inherits the native contact id.
pub fn sync_set_native_ids(
    db: &PeopleDb,
    session: &SyncSession,
    ids: &[NativeIdInfo],
) -> Result<(), SyncError> {
    let changed = db.with_transaction(|tx| -> Result<bool, SyncError> {
        let mut changed = false;
        for info in ids {
            let assigned = skip_missing(
                tx.set_contact_native_id(info.local_id, Some(info.native_id)),
                "contact",
                info.local_id,
            )?;
            if assigned {
                tx.refresh_summary_flags(info.local_id)?;
                changed = true;
            }
        }
        Ok(changed)
    })?;
    publish_if(changed, session);
    Ok(())
}

pub fn sync_set_native_detail_ids(
    db: &PeopleDb,
    session: &SyncSession,
    ids: &[NativeDetailIdInfo],
) -> Result<(), SyncError> {
    let changed = db.with_transaction(|tx| -> Result<bool, SyncError> {
        let mut changed = false;
        for info in ids {
            changed |= skip_missing(tx.set_detail_native_ids(info), "detail", info.local_detail_id)?;
        }
        Ok(changed)
    })?;
    publish_if(changed, session);
    Ok(())
}
