//! Explicit per-store session: owns the notifier, the thumbnail cache and
//! the cached me-profile pointer. Passed to every orchestrator operation.

use parking_lot::RwLock;

use crate::config::StoreConfig;
use crate::db::{DbError, PeopleDb};
use crate::error::SyncError;
use crate::notify::ChangeNotifier;
use crate::thumbnails::ThumbnailStore;

pub struct SyncSession {
    notifier: ChangeNotifier,
    thumbnails: ThumbnailStore,
    me_profile_id: RwLock<Option<i64>>,
    page_size: i64,
}

impl SyncSession {
    /// Build a session over an opened store.
    ///
    /// When opening the store wiped an incompatible schema, cached
    /// thumbnails are cleared too so no file outlives its contact row.
    pub fn open(db: &PeopleDb, config: &StoreConfig) -> Result<Self, SyncError> {
        let thumbnails = ThumbnailStore::new(&config.thumbnail_dir);
        if db.migration_outcome().is_rebuilt() {
            let removed = thumbnails.clear().map_err(DbError::Io)?;
            log::info!("Store was rebuilt; removed {} stale thumbnail(s)", removed);
        }

        let me_profile_id = db.fetch_me_profile_id()?;
        Ok(Self {
            notifier: ChangeNotifier::new(config.notify_interval()),
            thumbnails,
            me_profile_id: RwLock::new(me_profile_id),
            page_size: config.change_log_page_size.max(1),
        })
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub fn thumbnails(&self) -> &ThumbnailStore {
        &self.thumbnails
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    pub fn me_profile_id(&self) -> Option<i64> {
        *self.me_profile_id.read()
    }

    pub(crate) fn set_me_profile_id(&self, local_id: Option<i64>) {
        *self.me_profile_id.write() = local_id;
    }

    pub fn is_me_profile(&self, local_contact_id: i64) -> bool {
        self.me_profile_id() == Some(local_contact_id)
    }

    /// Whether a detail belongs to the me profile. Unknown details do not.
    pub fn is_me_profile_detail(&self, db: &PeopleDb, local_detail_id: i64) -> Result<bool, SyncError> {
        let Some(me) = self.me_profile_id() else {
            return Ok(false);
        };
        Ok(db.detail_owner(local_detail_id)? == Some(me))
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;

    /// A session whose thumbnails live in a leaked temp dir and whose
    /// notifier never fires on its own during a test.
    pub fn test_session(db: &PeopleDb) -> SyncSession {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = StoreConfig {
            database_path: dir.path().join("unused.db"),
            thumbnail_dir: dir.path().join("thumbnails"),
            notify_interval_ms: 60_000,
            change_log_page_size: 50,
        };
        std::mem::forget(dir);
        SyncSession::open(db, &config).expect("Failed to open test session")
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::test_session;
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::{Contact, ContactDetail, DetailKey, IdStrip};

    #[test]
    fn test_profile_cache_loaded_from_settings() {
        let db = test_db();
        db.set_me_profile_id(Some(4)).expect("set");
        let session = test_session(&db);
        assert_eq!(session.me_profile_id(), Some(4));
        assert!(session.is_me_profile(4));
        assert!(!session.is_me_profile(5));
    }

    #[test]
    fn test_is_me_profile_detail() {
        let db = test_db();
        let me = db
            .add_contact(&mut Contact::default(), IdStrip::KEEP)
            .expect("contact");
        let mut detail = ContactDetail::new(DetailKey::Name, "Me");
        detail.local_contact_id = Some(me);
        let detail_id = db.add_contact_detail(&mut detail, IdStrip::KEEP).expect("detail");

        let session = test_session(&db);
        assert!(!session.is_me_profile_detail(&db, detail_id).expect("query"));
        session.set_me_profile_id(Some(me));
        assert!(session.is_me_profile_detail(&db, detail_id).expect("query"));
        assert!(!session.is_me_profile_detail(&db, 9999).expect("query"));
    }

    #[test]
    fn test_rebuilt_store_clears_thumbnails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("people.db");
        let config = StoreConfig {
            database_path: db_path.clone(),
            thumbnail_dir: dir.path().join("thumbs"),
            notify_interval_ms: 60_000,
            change_log_page_size: 50,
        };
        {
            let db = PeopleDb::open_at(db_path.clone()).expect("open");
            db.conn_ref()
                .execute("UPDATE schema_version SET version = 999", [])
                .expect("bump version");
        }
        ThumbnailStore::new(&config.thumbnail_dir)
            .write(1, b"img")
            .expect("write");

        let db = PeopleDb::open_at(db_path).expect("reopen");
        assert!(db.migration_outcome().is_rebuilt());
        let session = SyncSession::open(&db, &config).expect("session");
        assert!(!session.thumbnails().exists(1));
    }
}
