// Store-wide housekeeping.

use super::Effects;
use crate::db::{DbError, PeopleDb};
use crate::error::SyncError;
use crate::session::SyncSession;

/// Wipe every contact, detail, projection row, pending change, setting and
/// cached thumbnail. The schema is kept. Used on sign-out.
pub fn remove_user_data(db: &PeopleDb, session: &SyncSession) -> Result<(), SyncError> {
    db.with_transaction(|tx| tx.clear_user_data())?;

    let removed = session.thumbnails().clear().map_err(DbError::Io)?;
    log::info!("Removed all user data ({} thumbnail(s))", removed);

    let effects = Effects {
        contacts: true,
        timeline: true,
        me_profile: true,
        profile_cleared: true,
        ..Effects::default()
    };
    effects.publish(session, false);
    Ok(())
}
