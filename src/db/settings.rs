//! Persisted session state: the me-profile pointer and its avatar flag.

use rusqlite::{params, OptionalExtension};

use super::*;

const ME_PROFILE_ID: &str = "me_profile_local_id";
const ME_PROFILE_AVATAR_CHANGED: &str = "me_profile_avatar_changed";

impl PeopleDb {
    fn get_setting(&self, key: &str) -> Result<Option<String>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_setting(&self, key: &str, value: Option<&str>) -> Result<(), DbError> {
        match value {
            Some(v) => self.conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, v],
            )?,
            None => self
                .conn
                .execute("DELETE FROM settings WHERE key = ?1", params![key])?,
        };
        Ok(())
    }

    pub fn fetch_me_profile_id(&self) -> Result<Option<i64>, DbError> {
        Ok(self
            .get_setting(ME_PROFILE_ID)?
            .and_then(|v| v.parse::<i64>().ok()))
    }

    pub fn set_me_profile_id(&self, local_id: Option<i64>) -> Result<(), DbError> {
        let value = local_id.map(|id| id.to_string());
        self.set_setting(ME_PROFILE_ID, value.as_deref())
    }

    pub fn me_profile_avatar_changed(&self) -> Result<bool, DbError> {
        Ok(self.get_setting(ME_PROFILE_AVATAR_CHANGED)?.as_deref() == Some("1"))
    }

    pub fn set_me_profile_avatar_changed(&self, changed: bool) -> Result<(), DbError> {
        self.set_setting(ME_PROFILE_AVATAR_CHANGED, changed.then_some("1"))
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_utils::test_db;

    #[test]
    fn test_me_profile_pointer_roundtrip() {
        let db = test_db();
        assert_eq!(db.fetch_me_profile_id().expect("read"), None);
        db.set_me_profile_id(Some(12)).expect("set");
        assert_eq!(db.fetch_me_profile_id().expect("read"), Some(12));
        db.set_me_profile_id(None).expect("clear");
        assert_eq!(db.fetch_me_profile_id().expect("read"), None);
    }

    #[test]
    fn test_avatar_flag() {
        let db = test_db();
        assert!(!db.me_profile_avatar_changed().expect("read"));
        db.set_me_profile_avatar_changed(true).expect("set");
        assert!(db.me_profile_avatar_changed().expect("read"));
        db.set_me_profile_avatar_changed(false).expect("unset");
        assert!(!db.me_profile_avatar_changed().expect("read"));
    }
}
