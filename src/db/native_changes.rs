//! Change log of local mutations waiting to be written to the device
//! address book. Same coalescing rules as the server log, keyed by native
//! ids, and without group relations.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeChangeType {
    NewContact,
    DeleteContact,
    NewDetail,
    ModifyDetail,
    DeleteDetail,
}

impl NativeChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NativeChangeType::NewContact => "new_contact",
            NativeChangeType::DeleteContact => "delete_contact",
            NativeChangeType::NewDetail => "new_detail",
            NativeChangeType::ModifyDetail => "modify_detail",
            NativeChangeType::DeleteDetail => "delete_detail",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "new_contact" => NativeChangeType::NewContact,
            "delete_contact" => NativeChangeType::DeleteContact,
            "new_detail" => NativeChangeType::NewDetail,
            "modify_detail" => NativeChangeType::ModifyDetail,
            "delete_detail" => NativeChangeType::DeleteDetail,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum NativeChange {
    NewContact {
        local_contact_id: i64,
    },
    DeleteContact {
        local_contact_id: i64,
        native_contact_id: Option<i64>,
    },
    NewDetail {
        local_contact_id: i64,
        native_contact_id: Option<i64>,
        local_detail_id: i64,
        key: DetailKey,
    },
    ModifyDetail {
        local_contact_id: i64,
        native_contact_id: Option<i64>,
        local_detail_id: i64,
        native_detail_id: Option<i64>,
        key: DetailKey,
    },
    DeleteDetail {
        local_contact_id: i64,
        native_contact_id: Option<i64>,
        local_detail_id: i64,
        native_detail_id: Option<i64>,
        key: DetailKey,
    },
}

impl NativeChange {
    pub fn change_type(&self) -> NativeChangeType {
        match self {
            NativeChange::NewContact { .. } => NativeChangeType::NewContact,
            NativeChange::DeleteContact { .. } => NativeChangeType::DeleteContact,
            NativeChange::NewDetail { .. } => NativeChangeType::NewDetail,
            NativeChange::ModifyDetail { .. } => NativeChangeType::ModifyDetail,
            NativeChange::DeleteDetail { .. } => NativeChangeType::DeleteDetail,
        }
    }

    pub fn local_contact_id(&self) -> i64 {
        match self {
            NativeChange::NewContact { local_contact_id }
            | NativeChange::DeleteContact { local_contact_id, .. }
            | NativeChange::NewDetail { local_contact_id, .. }
            | NativeChange::ModifyDetail { local_contact_id, .. }
            | NativeChange::DeleteDetail { local_contact_id, .. } => *local_contact_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeChangeInfo {
    pub change_id: i64,
    pub change: NativeChange,
}

const SELECT_NATIVE_CHANGES: &str = "SELECT l.change_id, l.change_type, l.local_contact_id,
        COALESCE(l.native_contact_id, c.native_contact_id),
        l.local_detail_id, COALESCE(l.native_detail_id, d.native_detail_id), l.detail_key
     FROM native_change_log l
     LEFT JOIN contacts c ON c.local_contact_id = l.local_contact_id
     LEFT JOIN contact_details d ON d.local_detail_id = l.local_detail_id";

impl PeopleDb {
    fn pending_native_change(
        &self,
        column: NativeKeyColumn,
        id: i64,
        change_type: NativeChangeType,
    ) -> Result<Option<i64>, DbError> {
        let sql = match column {
            NativeKeyColumn::Contact => {
                "SELECT change_id FROM native_change_log
                 WHERE local_contact_id = ?1 AND change_type = ?2 LIMIT 1"
            }
            NativeKeyColumn::Detail => {
                "SELECT change_id FROM native_change_log
                 WHERE local_detail_id = ?1 AND change_type = ?2 LIMIT 1"
            }
        };
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt
            .query_row(params![id, change_type.as_str()], |row| row.get(0))
            .optional()?)
    }

    pub fn has_pending_native_delete(&self, local_contact_id: i64) -> Result<bool, DbError> {
        Ok(self
            .pending_native_change(
                NativeKeyColumn::Contact,
                local_contact_id,
                NativeChangeType::DeleteContact,
            )?
            .is_some())
    }

    fn insert_native_change(
        &self,
        change_type: NativeChangeType,
        local_contact_id: i64,
        native_contact_id: Option<i64>,
        detail: Option<&ContactDetail>,
    ) -> Result<i64, DbError> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO native_change_log (
                change_type, local_contact_id, native_contact_id, local_detail_id,
                native_detail_id, detail_key, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        stmt.execute(params![
            change_type.as_str(),
            local_contact_id,
            native_contact_id,
            detail.and_then(|d| d.local_detail_id),
            detail.and_then(|d| d.native_detail_id),
            detail.map(|d| d.key.as_str()),
            Utc::now().to_rfc3339(),
        ])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn add_new_native_contact_change(&self, local_contact_id: i64) -> Result<LogOutcome, DbError> {
        if self
            .pending_native_change(
                NativeKeyColumn::Contact,
                local_contact_id,
                NativeChangeType::NewContact,
            )?
            .is_some()
        {
            return Ok(LogOutcome::Coalesced);
        }
        let id = self.insert_native_change(NativeChangeType::NewContact, local_contact_id, None, None)?;
        Ok(LogOutcome::Logged(id))
    }

    /// Log removal of a contact from the address book. A contact never
    /// written there leaves nothing behind.
    pub fn add_deleted_native_contact_change(
        &self,
        local_contact_id: i64,
        native_contact_id: Option<i64>,
    ) -> Result<LogOutcome, DbError> {
        self.conn.execute(
            "DELETE FROM native_change_log WHERE local_contact_id = ?1 AND change_type != ?2",
            params![local_contact_id, NativeChangeType::DeleteContact.as_str()],
        )?;
        if native_contact_id.is_none() || self.has_pending_native_delete(local_contact_id)? {
            return Ok(LogOutcome::Coalesced);
        }
        let id = self.insert_native_change(
            NativeChangeType::DeleteContact,
            local_contact_id,
            native_contact_id,
            None,
        )?;
        Ok(LogOutcome::Logged(id))
    }

    fn native_detail_precheck(&self, local_contact_id: i64) -> Result<Option<LogOutcome>, DbError> {
        if self.has_pending_native_delete(local_contact_id)? {
            return Ok(Some(LogOutcome::Rejected(LogRejection::ContactDeleted)));
        }
        if self
            .pending_native_change(
                NativeKeyColumn::Contact,
                local_contact_id,
                NativeChangeType::NewContact,
            )?
            .is_some()
        {
            return Ok(Some(LogOutcome::Coalesced));
        }
        Ok(None)
    }

    pub fn add_new_native_detail_change(
        &self,
        detail: &ContactDetail,
        native_contact_id: Option<i64>,
    ) -> Result<LogOutcome, DbError> {
        let (contact_id, detail_id) = Self::detail_ids(detail)?;
        if let Some(outcome) = self.native_detail_precheck(contact_id)? {
            return Ok(outcome);
        }
        if self
            .pending_native_change(NativeKeyColumn::Detail, detail_id, NativeChangeType::NewDetail)?
            .is_some()
        {
            return Ok(LogOutcome::Coalesced);
        }
        let id = self.insert_native_change(
            NativeChangeType::NewDetail,
            contact_id,
            native_contact_id,
            Some(detail),
        )?;
        Ok(LogOutcome::Logged(id))
    }

    pub fn add_modified_native_detail_change(
        &self,
        detail: &ContactDetail,
        native_contact_id: Option<i64>,
    ) -> Result<LogOutcome, DbError> {
        let (contact_id, detail_id) = Self::detail_ids(detail)?;
        if let Some(outcome) = self.native_detail_precheck(contact_id)? {
            return Ok(outcome);
        }
        if detail.native_detail_id.is_none() {
            return self.add_new_native_detail_change(detail, native_contact_id);
        }
        for pending in [NativeChangeType::NewDetail, NativeChangeType::ModifyDetail] {
            if self
                .pending_native_change(NativeKeyColumn::Detail, detail_id, pending)?
                .is_some()
            {
                return Ok(LogOutcome::Coalesced);
            }
        }
        let id = self.insert_native_change(
            NativeChangeType::ModifyDetail,
            contact_id,
            native_contact_id,
            Some(detail),
        )?;
        Ok(LogOutcome::Logged(id))
    }

    pub fn add_deleted_native_detail_change(
        &self,
        detail: &ContactDetail,
        native_contact_id: Option<i64>,
    ) -> Result<LogOutcome, DbError> {
        let (contact_id, detail_id) = Self::detail_ids(detail)?;
        if self.has_pending_native_delete(contact_id)? {
            return Ok(LogOutcome::Rejected(LogRejection::ContactDeleted));
        }
        self.conn.execute(
            "DELETE FROM native_change_log
             WHERE local_detail_id = ?1 AND change_type IN (?2, ?3)",
            params![
                detail_id,
                NativeChangeType::NewDetail.as_str(),
                NativeChangeType::ModifyDetail.as_str()
            ],
        )?;
        let creation_pending = self
            .pending_native_change(
                NativeKeyColumn::Contact,
                contact_id,
                NativeChangeType::NewContact,
            )?
            .is_some();
        if creation_pending || detail.native_detail_id.is_none() {
            return Ok(LogOutcome::Coalesced);
        }
        if self
            .pending_native_change(NativeKeyColumn::Detail, detail_id, NativeChangeType::DeleteDetail)?
            .is_some()
        {
            return Ok(LogOutcome::Coalesced);
        }
        let id = self.insert_native_change(
            NativeChangeType::DeleteDetail,
            contact_id,
            native_contact_id,
            Some(detail),
        )?;
        Ok(LogOutcome::Logged(id))
    }

    pub fn drop_native_changes_for(&self, local_contact_id: i64) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "DELETE FROM native_change_log WHERE local_contact_id = ?1",
            params![local_contact_id],
        )?)
    }

    /// Remove rows the address book has acknowledged.
    pub fn delete_native_changes(&self, change_ids: &[i64]) -> Result<usize, DbError> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM native_change_log WHERE change_id = ?1")?;
        let mut removed = 0;
        for id in change_ids {
            removed += stmt.execute(params![id])?;
        }
        Ok(removed)
    }

    pub fn fetch_native_change_log(
        &self,
        change_type: Option<NativeChangeType>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<NativeChangeInfo>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE (?1 IS NULL OR l.change_type = ?1)
             ORDER BY l.change_id LIMIT ?2 OFFSET ?3",
            SELECT_NATIVE_CHANGES
        ))?;
        let rows = stmt.query_map(
            params![change_type.map(|t| t.as_str()), limit, offset],
            Self::map_native_change_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn fetch_all_native_changes(&self) -> Result<Vec<NativeChangeInfo>, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY l.change_id", SELECT_NATIVE_CHANGES))?;
        let rows = stmt.query_map([], Self::map_native_change_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_native_changes(&self, change_type: Option<NativeChangeType>) -> Result<i64, DbError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM native_change_log WHERE (?1 IS NULL OR change_type = ?1)",
            params![change_type.map(|t| t.as_str())],
            |row| row.get(0),
        )?)
    }

    fn map_native_change_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NativeChangeInfo> {
        let raw_type: String = row.get(1)?;
        let change_type = NativeChangeType::parse(&raw_type).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(1, raw_type.clone(), rusqlite::types::Type::Text)
        })?;
        let local_contact_id: i64 = row.get(2)?;
        let native_contact_id: Option<i64> = row.get(3)?;
        let local_detail_id = row.get::<_, Option<i64>>(4)?.unwrap_or_default();
        let native_detail_id: Option<i64> = row.get(5)?;
        let key = row
            .get::<_, Option<String>>(6)?
            .map(|k| DetailKey::from_str_lossy(&k))
            .unwrap_or_default();

        let change = match change_type {
            NativeChangeType::NewContact => NativeChange::NewContact { local_contact_id },
            NativeChangeType::DeleteContact => NativeChange::DeleteContact {
                local_contact_id,
                native_contact_id,
            },
            NativeChangeType::NewDetail => NativeChange::NewDetail {
                local_contact_id,
                native_contact_id,
                local_detail_id,
                key,
            },
            NativeChangeType::ModifyDetail => NativeChange::ModifyDetail {
                local_contact_id,
                native_contact_id,
                local_detail_id,
                native_detail_id,
                key,
            },
            NativeChangeType::DeleteDetail => NativeChange::DeleteDetail {
                local_contact_id,
                native_contact_id,
                local_detail_id,
                native_detail_id,
                key,
            },
        };
        Ok(NativeChangeInfo {
            change_id: row.get(0)?,
            change,
        })
    }
}

#[derive(Clone, Copy)]
enum NativeKeyColumn {
    Contact,
    Detail,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;

    fn native_detail(contact_id: i64, detail_id: i64, native_detail_id: Option<i64>) -> ContactDetail {
        ContactDetail {
            local_contact_id: Some(contact_id),
            local_detail_id: Some(detail_id),
            native_detail_id,
            ..ContactDetail::new(DetailKey::Email, "a@b.c")
        }
    }

    #[test]
    fn test_duplicate_native_delete_is_noop() {
        let db = test_db();
        db.add_deleted_native_contact_change(1, Some(9)).expect("first");
        assert_eq!(
            db.add_deleted_native_contact_change(1, Some(9)).expect("second"),
            LogOutcome::Coalesced
        );
        assert_eq!(db.count_native_changes(None).expect("count"), 1);
    }

    #[test]
    fn test_native_delete_supersedes_detail_rows() {
        let db = test_db();
        db.add_modified_native_detail_change(&native_detail(1, 10, Some(70)), Some(9))
            .expect("modify");
        db.add_deleted_native_contact_change(1, Some(9)).expect("delete");
        let changes = db.fetch_all_native_changes().expect("fetch");
        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes[0].change,
            NativeChange::DeleteContact {
                local_contact_id: 1,
                native_contact_id: Some(9)
            }
        );
        assert!(db
            .add_deleted_native_detail_change(&native_detail(1, 10, Some(70)), Some(9))
            .expect("detail delete")
            .is_rejected());
    }

    #[test]
    fn test_native_detail_rows_fold_into_pending_creation() {
        let db = test_db();
        db.add_new_native_contact_change(1).expect("new");
        assert_eq!(
            db.add_new_native_detail_change(&native_detail(1, 10, None), None)
                .expect("detail"),
            LogOutcome::Coalesced
        );
        db.add_deleted_native_contact_change(1, None).expect("delete");
        assert_eq!(db.count_native_changes(None).expect("count"), 0);
    }

    #[test]
    fn test_native_detail_delete_without_native_id_logs_nothing() {
        let db = test_db();
        let detail = native_detail(1, 10, None);
        db.add_new_native_detail_change(&detail, Some(9)).expect("new");
        db.add_deleted_native_detail_change(&detail, Some(9)).expect("delete");
        assert_eq!(db.count_native_changes(None).expect("count"), 0);
    }

    #[test]
    fn test_native_pagination_and_confirm() {
        let db = test_db();
        for id in 1..=5 {
            db.add_new_native_contact_change(id).expect("new");
        }
        let first = db.fetch_native_change_log(None, 0, 3).expect("page 1");
        let second = db.fetch_native_change_log(None, 3, 3).expect("page 2");
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 2);
        let ids: Vec<i64> = first.iter().map(|c| c.change_id).collect();
        assert_eq!(db.delete_native_changes(&ids).expect("confirm"), 3);
        assert_eq!(
            db.count_native_changes(Some(NativeChangeType::NewContact))
                .expect("count"),
            2
        );
    }
}
