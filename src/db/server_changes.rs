//! Change log of local mutations waiting to be pushed to the server.
//!
//! Rows are flattened in `server_change_log` and surfaced as the tagged
//! [`ServerChange`] union. At most one row exists per (contact or detail or
//! group pair, change type); a pending whole-contact delete or creation
//! absorbs finer-grained changes for the same contact.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerChangeType {
    NewContact,
    DeleteContact,
    NewDetail,
    ModifyDetail,
    DeleteDetail,
    AddGroupRel,
    DeleteGroupRel,
}

impl ServerChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerChangeType::NewContact => "new_contact",
            ServerChangeType::DeleteContact => "delete_contact",
            ServerChangeType::NewDetail => "new_detail",
            ServerChangeType::ModifyDetail => "modify_detail",
            ServerChangeType::DeleteDetail => "delete_detail",
            ServerChangeType::AddGroupRel => "add_group_rel",
            ServerChangeType::DeleteGroupRel => "delete_group_rel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "new_contact" => ServerChangeType::NewContact,
            "delete_contact" => ServerChangeType::DeleteContact,
            "new_detail" => ServerChangeType::NewDetail,
            "modify_detail" => ServerChangeType::ModifyDetail,
            "delete_detail" => ServerChangeType::DeleteDetail,
            "add_group_rel" => ServerChangeType::AddGroupRel,
            "delete_group_rel" => ServerChangeType::DeleteGroupRel,
            _ => return None,
        })
    }
}

/// One pending server change, carrying what is needed to build the request
/// without re-reading the entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerChange {
    NewContact {
        local_contact_id: i64,
    },
    DeleteContact {
        local_contact_id: i64,
        server_contact_id: Option<i64>,
    },
    NewDetail {
        local_contact_id: i64,
        server_contact_id: Option<i64>,
        local_detail_id: i64,
        key: DetailKey,
    },
    ModifyDetail {
        local_contact_id: i64,
        server_contact_id: Option<i64>,
        local_detail_id: i64,
        server_detail_id: Option<i64>,
        key: DetailKey,
    },
    DeleteDetail {
        local_contact_id: i64,
        server_contact_id: Option<i64>,
        local_detail_id: i64,
        server_detail_id: Option<i64>,
        key: DetailKey,
    },
    AddGroupRel {
        local_contact_id: i64,
        server_contact_id: Option<i64>,
        group_id: i64,
    },
    DeleteGroupRel {
        local_contact_id: i64,
        server_contact_id: Option<i64>,
        group_id: i64,
    },
}

impl ServerChange {
    pub fn change_type(&self) -> ServerChangeType {
        match self {
            ServerChange::NewContact { .. } => ServerChangeType::NewContact,
            ServerChange::DeleteContact { .. } => ServerChangeType::DeleteContact,
            ServerChange::NewDetail { .. } => ServerChangeType::NewDetail,
            ServerChange::ModifyDetail { .. } => ServerChangeType::ModifyDetail,
            ServerChange::DeleteDetail { .. } => ServerChangeType::DeleteDetail,
            ServerChange::AddGroupRel { .. } => ServerChangeType::AddGroupRel,
            ServerChange::DeleteGroupRel { .. } => ServerChangeType::DeleteGroupRel,
        }
    }

    pub fn local_contact_id(&self) -> i64 {
        match self {
            ServerChange::NewContact { local_contact_id }
            | ServerChange::DeleteContact { local_contact_id, .. }
            | ServerChange::NewDetail { local_contact_id, .. }
            | ServerChange::ModifyDetail { local_contact_id, .. }
            | ServerChange::DeleteDetail { local_contact_id, .. }
            | ServerChange::AddGroupRel { local_contact_id, .. }
            | ServerChange::DeleteGroupRel { local_contact_id, .. } => *local_contact_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactChangeInfo {
    pub change_id: i64,
    pub change: ServerChange,
}

/// Remote ids are resolved at read time so ids assigned after logging are reported.
const SELECT_CHANGES: &str = "SELECT l.change_id, l.change_type, l.local_contact_id,
        COALESCE(l.server_contact_id, c.server_contact_id),
        l.local_detail_id, COALESCE(l.server_detail_id, d.server_detail_id),
        l.detail_key, l.group_id
     FROM server_change_log l
     LEFT JOIN contacts c ON c.local_contact_id = l.local_contact_id
     LEFT JOIN contact_details d ON d.local_detail_id = l.local_detail_id";

impl PeopleDb {
    // =========================================================================
    // Server change log: lookups
    // =========================================================================

    fn pending_server_contact_change(
        &self,
        local_contact_id: i64,
        change_type: ServerChangeType,
    ) -> Result<Option<i64>, DbError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT change_id FROM server_change_log
             WHERE local_contact_id = ?1 AND change_type = ?2 LIMIT 1",
        )?;
        Ok(stmt
            .query_row(params![local_contact_id, change_type.as_str()], |row| row.get(0))
            .optional()?)
    }

    fn pending_server_detail_change(
        &self,
        local_detail_id: i64,
        change_type: ServerChangeType,
    ) -> Result<Option<i64>, DbError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT change_id FROM server_change_log
             WHERE local_detail_id = ?1 AND change_type = ?2 LIMIT 1",
        )?;
        Ok(stmt
            .query_row(params![local_detail_id, change_type.as_str()], |row| row.get(0))
            .optional()?)
    }

    fn pending_server_group_change(
        &self,
        local_contact_id: i64,
        group_id: i64,
        change_type: ServerChangeType,
    ) -> Result<Option<i64>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT change_id FROM server_change_log
                 WHERE local_contact_id = ?1 AND group_id = ?2 AND change_type = ?3 LIMIT 1",
                params![local_contact_id, group_id, change_type.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Whether a whole-contact server delete is waiting to be pushed.
    pub fn has_pending_contact_delete(&self, local_contact_id: i64) -> Result<bool, DbError> {
        Ok(self
            .pending_server_contact_change(local_contact_id, ServerChangeType::DeleteContact)?
            .is_some())
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_server_change(
        &self,
        change_type: ServerChangeType,
        local_contact_id: i64,
        server_contact_id: Option<i64>,
        local_detail_id: Option<i64>,
        server_detail_id: Option<i64>,
        key: Option<DetailKey>,
        group_id: Option<i64>,
    ) -> Result<i64, DbError> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO server_change_log (
                change_type, local_contact_id, server_contact_id, local_detail_id,
                server_detail_id, detail_key, group_id, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        stmt.execute(params![
            change_type.as_str(),
            local_contact_id,
            server_contact_id,
            local_detail_id,
            server_detail_id,
            key.map(|k| k.as_str()),
            group_id,
            Utc::now().to_rfc3339(),
        ])?;
        Ok(self.conn.last_insert_rowid())
    }

    // =========================================================================
    // Server change log: recording
    // =========================================================================

    /// Log creation of a contact. Its details ride along with the creation.
    pub fn add_new_contact_change(&self, local_contact_id: i64) -> Result<LogOutcome, DbError> {
        if self
            .pending_server_contact_change(local_contact_id, ServerChangeType::NewContact)?
            .is_some()
        {
            return Ok(LogOutcome::Coalesced);
        }
        let id = self.insert_server_change(
            ServerChangeType::NewContact,
            local_contact_id,
            None,
            None,
            None,
            None,
            None,
        )?;
        Ok(LogOutcome::Logged(id))
    }

    /// Log deletion of a contact, superseding every finer-grained pending row.
    ///
    /// A contact the server never saw leaves nothing behind. Re-logging a
    /// pending delete keeps the original row.
    pub fn add_deleted_contact_change(
        &self,
        local_contact_id: i64,
        server_contact_id: Option<i64>,
    ) -> Result<LogOutcome, DbError> {
        self.conn.execute(
            "DELETE FROM server_change_log WHERE local_contact_id = ?1 AND change_type != ?2",
            params![local_contact_id, ServerChangeType::DeleteContact.as_str()],
        )?;
        if server_contact_id.is_none() {
            log::debug!(
                "Contact {} never reached the server; dropped its pending changes",
                local_contact_id
            );
            return Ok(LogOutcome::Coalesced);
        }
        if self.has_pending_contact_delete(local_contact_id)? {
            return Ok(LogOutcome::Coalesced);
        }
        let id = self.insert_server_change(
            ServerChangeType::DeleteContact,
            local_contact_id,
            server_contact_id,
            None,
            None,
            None,
            None,
        )?;
        Ok(LogOutcome::Logged(id))
    }

    /// Shared preconditions for detail-level rows on a contact.
    fn server_detail_precheck(&self, local_contact_id: i64) -> Result<Option<LogOutcome>, DbError> {
        if self.has_pending_contact_delete(local_contact_id)? {
            return Ok(Some(LogOutcome::Rejected(LogRejection::ContactDeleted)));
        }
        if self
            .pending_server_contact_change(local_contact_id, ServerChangeType::NewContact)?
            .is_some()
        {
            return Ok(Some(LogOutcome::Coalesced));
        }
        Ok(None)
    }

    pub(crate) fn detail_ids(detail: &ContactDetail) -> Result<(i64, i64), DbError> {
        match (detail.local_contact_id, detail.local_detail_id) {
            (Some(c), Some(d)) => Ok((c, d)),
            _ => Err(DbError::NotFound("detail without local ids".into())),
        }
    }

    pub fn add_new_contact_detail_change(
        &self,
        detail: &ContactDetail,
        server_contact_id: Option<i64>,
    ) -> Result<LogOutcome, DbError> {
        let (contact_id, detail_id) = Self::detail_ids(detail)?;
        if let Some(outcome) = self.server_detail_precheck(contact_id)? {
            return Ok(outcome);
        }
        if self
            .pending_server_detail_change(detail_id, ServerChangeType::NewDetail)?
            .is_some()
        {
            return Ok(LogOutcome::Coalesced);
        }
        let id = self.insert_server_change(
            ServerChangeType::NewDetail,
            contact_id,
            server_contact_id,
            Some(detail_id),
            None,
            Some(detail.key),
            None,
        )?;
        Ok(LogOutcome::Logged(id))
    }

    /// Log a detail modification. A detail the server has never seen is
    /// logged as new instead.
    pub fn add_modified_contact_detail_change(
        &self,
        detail: &ContactDetail,
        server_contact_id: Option<i64>,
    ) -> Result<LogOutcome, DbError> {
        let (contact_id, detail_id) = Self::detail_ids(detail)?;
        if let Some(outcome) = self.server_detail_precheck(contact_id)? {
            return Ok(outcome);
        }
        if detail.server_detail_id.is_none() {
            return self.add_new_contact_detail_change(detail, server_contact_id);
        }
        for pending in [ServerChangeType::NewDetail, ServerChangeType::ModifyDetail] {
            if self.pending_server_detail_change(detail_id, pending)?.is_some() {
                return Ok(LogOutcome::Coalesced);
            }
        }
        let id = self.insert_server_change(
            ServerChangeType::ModifyDetail,
            contact_id,
            server_contact_id,
            Some(detail_id),
            detail.server_detail_id,
            Some(detail.key),
            None,
        )?;
        Ok(LogOutcome::Logged(id))
    }

    /// Log a detail deletion, cancelling any pending new/modify rows for it.
    pub fn add_deleted_contact_detail_change(
        &self,
        detail: &ContactDetail,
        server_contact_id: Option<i64>,
    ) -> Result<LogOutcome, DbError> {
        let (contact_id, detail_id) = Self::detail_ids(detail)?;
        if self.has_pending_contact_delete(contact_id)? {
            return Ok(LogOutcome::Rejected(LogRejection::ContactDeleted));
        }
        self.conn.execute(
            "DELETE FROM server_change_log
             WHERE local_detail_id = ?1 AND change_type IN (?2, ?3)",
            params![
                detail_id,
                ServerChangeType::NewDetail.as_str(),
                ServerChangeType::ModifyDetail.as_str()
            ],
        )?;
        let creation_pending = self
            .pending_server_contact_change(contact_id, ServerChangeType::NewContact)?
            .is_some();
        if creation_pending || detail.server_detail_id.is_none() {
            return Ok(LogOutcome::Coalesced);
        }
        if self
            .pending_server_detail_change(detail_id, ServerChangeType::DeleteDetail)?
            .is_some()
        {
            return Ok(LogOutcome::Coalesced);
        }
        let id = self.insert_server_change(
            ServerChangeType::DeleteDetail,
            contact_id,
            server_contact_id,
            Some(detail_id),
            detail.server_detail_id,
            Some(detail.key),
            None,
        )?;
        Ok(LogOutcome::Logged(id))
    }

    /// Log a new group membership. Cancels a pending removal of the same pair.
    pub fn add_group_rel_change(
        &self,
        local_contact_id: i64,
        server_contact_id: Option<i64>,
        group_id: i64,
    ) -> Result<LogOutcome, DbError> {
        if self.has_pending_contact_delete(local_contact_id)? {
            return Ok(LogOutcome::Rejected(LogRejection::ContactDeleted));
        }
        if let Some(pending) = self.pending_server_group_change(
            local_contact_id,
            group_id,
            ServerChangeType::DeleteGroupRel,
        )? {
            self.delete_contact_changes(&[pending])?;
            return Ok(LogOutcome::Coalesced);
        }
        if self
            .pending_server_group_change(local_contact_id, group_id, ServerChangeType::AddGroupRel)?
            .is_some()
        {
            return Ok(LogOutcome::Coalesced);
        }
        let id = self.insert_server_change(
            ServerChangeType::AddGroupRel,
            local_contact_id,
            server_contact_id,
            None,
            None,
            None,
            Some(group_id),
        )?;
        Ok(LogOutcome::Logged(id))
    }

    /// Log a removed group membership. Cancels a pending addition of the same
    /// pair; otherwise the parent must already exist on the server.
    pub fn delete_group_rel_change(
        &self,
        local_contact_id: i64,
        server_contact_id: Option<i64>,
        group_id: i64,
    ) -> Result<LogOutcome, DbError> {
        if self.has_pending_contact_delete(local_contact_id)? {
            return Ok(LogOutcome::Rejected(LogRejection::ContactDeleted));
        }
        if let Some(pending) = self.pending_server_group_change(
            local_contact_id,
            group_id,
            ServerChangeType::AddGroupRel,
        )? {
            self.delete_contact_changes(&[pending])?;
            return Ok(LogOutcome::Coalesced);
        }
        if server_contact_id.is_none() {
            return Ok(LogOutcome::Rejected(LogRejection::ParentNotSynced));
        }
        if self
            .pending_server_group_change(local_contact_id, group_id, ServerChangeType::DeleteGroupRel)?
            .is_some()
        {
            return Ok(LogOutcome::Coalesced);
        }
        let id = self.insert_server_change(
            ServerChangeType::DeleteGroupRel,
            local_contact_id,
            server_contact_id,
            None,
            None,
            None,
            Some(group_id),
        )?;
        Ok(LogOutcome::Logged(id))
    }

    /// Forget every pending server row for a contact. Used when the server
    /// already knows the outcome (inbound delete, duplicate merge).
    pub fn drop_contact_changes_for(&self, local_contact_id: i64) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "DELETE FROM server_change_log WHERE local_contact_id = ?1",
            params![local_contact_id],
        )?)
    }

    // =========================================================================
    // Server change log: confirmation and reads
    // =========================================================================

    /// Remove rows the server has acknowledged. Unknown ids are ignored.
    pub fn delete_contact_changes(&self, change_ids: &[i64]) -> Result<usize, DbError> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM server_change_log WHERE change_id = ?1")?;
        let mut removed = 0;
        for id in change_ids {
            removed += stmt.execute(params![id])?;
        }
        Ok(removed)
    }

    /// One page of pending changes in logging order, optionally of a single type.
    pub fn fetch_contact_change_log(
        &self,
        change_type: Option<ServerChangeType>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ContactChangeInfo>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE (?1 IS NULL OR l.change_type = ?1)
             ORDER BY l.change_id LIMIT ?2 OFFSET ?3",
            SELECT_CHANGES
        ))?;
        let rows = stmt.query_map(
            params![change_type.map(|t| t.as_str()), limit, offset],
            Self::map_server_change_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_contact_changes(&self, change_type: Option<ServerChangeType>) -> Result<i64, DbError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM server_change_log WHERE (?1 IS NULL OR change_type = ?1)",
            params![change_type.map(|t| t.as_str())],
            |row| row.get(0),
        )?)
    }

    pub fn fetch_all_contact_changes(&self) -> Result<Vec<ContactChangeInfo>, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY l.change_id", SELECT_CHANGES))?;
        let rows = stmt.query_map([], Self::map_server_change_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every pending change for one contact, in logging order.
    pub fn fetch_contact_changes_for(&self, local_contact_id: i64) -> Result<Vec<ContactChangeInfo>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE l.local_contact_id = ?1 ORDER BY l.change_id",
            SELECT_CHANGES
        ))?;
        let rows = stmt.query_map(params![local_contact_id], Self::map_server_change_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn map_server_change_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContactChangeInfo> {
        let raw_type: String = row.get(1)?;
        let change_type = ServerChangeType::parse(&raw_type).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(1, raw_type.clone(), rusqlite::types::Type::Text)
        })?;
        let local_contact_id: i64 = row.get(2)?;
        let server_contact_id: Option<i64> = row.get(3)?;
        let local_detail_id: Option<i64> = row.get(4)?;
        let server_detail_id: Option<i64> = row.get(5)?;
        let key = row
            .get::<_, Option<String>>(6)?
            .map(|k| DetailKey::from_str_lossy(&k))
            .unwrap_or_default();
        let group_id: Option<i64> = row.get(7)?;

        let change = match change_type {
            ServerChangeType::NewContact => ServerChange::NewContact { local_contact_id },
            ServerChangeType::DeleteContact => ServerChange::DeleteContact {
                local_contact_id,
                server_contact_id,
            },
            ServerChangeType::NewDetail => ServerChange::NewDetail {
                local_contact_id,
                server_contact_id,
                local_detail_id: local_detail_id.unwrap_or_default(),
                key,
            },
            ServerChangeType::ModifyDetail => ServerChange::ModifyDetail {
                local_contact_id,
                server_contact_id,
                local_detail_id: local_detail_id.unwrap_or_default(),
                server_detail_id,
                key,
            },
            ServerChangeType::DeleteDetail => ServerChange::DeleteDetail {
                local_contact_id,
                server_contact_id,
                local_detail_id: local_detail_id.unwrap_or_default(),
                server_detail_id,
                key,
            },
            ServerChangeType::AddGroupRel => ServerChange::AddGroupRel {
                local_contact_id,
                server_contact_id,
                group_id: group_id.unwrap_or_default(),
            },
            ServerChangeType::DeleteGroupRel => ServerChange::DeleteGroupRel {
                local_contact_id,
                server_contact_id,
                group_id: group_id.unwrap_or_default(),
            },
        };
        Ok(ContactChangeInfo {
            change_id: row.get(0)?,
            change,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;

    fn synced_detail(contact_id: i64, detail_id: i64, server_detail_id: Option<i64>) -> ContactDetail {
        ContactDetail {
            local_contact_id: Some(contact_id),
            local_detail_id: Some(detail_id),
            server_detail_id,
            ..ContactDetail::new(DetailKey::Phone, "555")
        }
    }

    fn types(db: &PeopleDb) -> Vec<ServerChangeType> {
        db.fetch_contact_change_log(None, 0, 100)
            .expect("fetch")
            .iter()
            .map(|c| c.change.change_type())
            .collect()
    }

    #[test]
    fn test_duplicate_delete_yields_one_row() {
        let db = test_db();
        assert!(matches!(
            db.add_deleted_contact_change(1, Some(100)).expect("first"),
            LogOutcome::Logged(_)
        ));
        assert_eq!(
            db.add_deleted_contact_change(1, Some(100)).expect("second"),
            LogOutcome::Coalesced
        );
        assert_eq!(db.count_contact_changes(None).expect("count"), 1);
    }

    #[test]
    fn test_delete_supersedes_finer_rows() {
        let db = test_db();
        db.add_modified_contact_detail_change(&synced_detail(1, 10, Some(500)), Some(100))
            .expect("modify");
        db.add_group_rel_change(1, Some(100), 7).expect("group");
        db.add_deleted_contact_change(1, Some(100)).expect("delete");
        assert_eq!(types(&db), vec![ServerChangeType::DeleteContact]);
    }

    #[test]
    fn test_delete_of_unsynced_contact_leaves_nothing() {
        let db = test_db();
        db.add_new_contact_change(1).expect("new");
        db.add_deleted_contact_change(1, None).expect("delete");
        assert_eq!(db.count_contact_changes(None).expect("count"), 0);
    }

    #[test]
    fn test_detail_delete_after_contact_delete_is_rejected() {
        let db = test_db();
        db.add_deleted_contact_change(1, Some(100)).expect("delete contact");
        let outcome = db
            .add_deleted_contact_detail_change(&synced_detail(1, 10, Some(500)), Some(100))
            .expect("delete detail");
        assert_eq!(outcome, LogOutcome::Rejected(LogRejection::ContactDeleted));
        let outcome = db
            .add_new_contact_detail_change(&synced_detail(1, 11, None), Some(100))
            .expect("new detail");
        assert!(outcome.is_rejected());
    }

    #[test]
    fn test_detail_changes_piggyback_on_pending_creation() {
        let db = test_db();
        db.add_new_contact_change(1).expect("new");
        assert_eq!(
            db.add_new_contact_detail_change(&synced_detail(1, 10, None), None)
                .expect("detail"),
            LogOutcome::Coalesced
        );
        assert_eq!(
            db.add_deleted_contact_detail_change(&synced_detail(1, 10, None), None)
                .expect("delete"),
            LogOutcome::Coalesced
        );
        assert_eq!(types(&db), vec![ServerChangeType::NewContact]);
        assert_eq!(db.add_new_contact_change(1).expect("again"), LogOutcome::Coalesced);
    }

    #[test]
    fn test_modify_coalesces_and_unsynced_modify_becomes_new() {
        let db = test_db();
        let synced = synced_detail(1, 10, Some(500));
        db.add_modified_contact_detail_change(&synced, Some(100)).expect("first");
        assert_eq!(
            db.add_modified_contact_detail_change(&synced, Some(100)).expect("second"),
            LogOutcome::Coalesced
        );

        db.add_modified_contact_detail_change(&synced_detail(1, 11, None), Some(100))
            .expect("unsynced");
        assert_eq!(
            types(&db),
            vec![ServerChangeType::ModifyDetail, ServerChangeType::NewDetail]
        );
    }

    #[test]
    fn test_delete_detail_cancels_pending_new_detail() {
        let db = test_db();
        let fresh = synced_detail(1, 10, None);
        db.add_new_contact_detail_change(&fresh, Some(100)).expect("new");
        assert_eq!(
            db.add_deleted_contact_detail_change(&fresh, Some(100)).expect("delete"),
            LogOutcome::Coalesced
        );
        assert_eq!(db.count_contact_changes(None).expect("count"), 0);

        let synced = synced_detail(1, 11, Some(501));
        db.add_modified_contact_detail_change(&synced, Some(100)).expect("modify");
        db.add_deleted_contact_detail_change(&synced, Some(100)).expect("delete");
        db.add_deleted_contact_detail_change(&synced, Some(100)).expect("delete again");
        assert_eq!(types(&db), vec![ServerChangeType::DeleteDetail]);
    }

    #[test]
    fn test_group_rel_add_and_remove_cancel() {
        let db = test_db();
        db.add_group_rel_change(1, None, 7).expect("add");
        assert_eq!(
            db.delete_group_rel_change(1, None, 7).expect("remove"),
            LogOutcome::Coalesced
        );
        assert_eq!(db.count_contact_changes(None).expect("count"), 0);

        assert_eq!(
            db.delete_group_rel_change(1, None, 8).expect("remove unsynced"),
            LogOutcome::Rejected(LogRejection::ParentNotSynced)
        );

        db.delete_group_rel_change(1, Some(100), 8).expect("remove synced");
        assert_eq!(
            db.add_group_rel_change(1, Some(100), 8).expect("re-add"),
            LogOutcome::Coalesced
        );
        assert_eq!(db.count_contact_changes(None).expect("count"), 0);
    }

    #[test]
    fn test_fetch_resolves_late_server_ids() {
        let db = test_db();
        let mut contact = Contact::default();
        let id = db.add_contact(&mut contact, IdStrip::KEEP).expect("add");
        db.add_group_rel_change(id, None, 3).expect("group");
        db.set_contact_server_id(id, Some(4242), None).expect("server id");

        let changes = db.fetch_contact_change_log(None, 0, 10).expect("fetch");
        assert_eq!(
            changes[0].change,
            ServerChange::AddGroupRel {
                local_contact_id: id,
                server_contact_id: Some(4242),
                group_id: 3
            }
        );
    }

    #[test]
    fn test_fetch_filters_and_confirms() {
        let db = test_db();
        db.add_new_contact_change(1).expect("new 1");
        db.add_new_contact_change(2).expect("new 2");
        db.add_deleted_contact_change(3, Some(300)).expect("delete 3");

        let deletes = db
            .fetch_contact_change_log(Some(ServerChangeType::DeleteContact), 0, 10)
            .expect("deletes");
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].change.local_contact_id(), 3);

        let ids: Vec<i64> = db
            .fetch_contact_change_log(Some(ServerChangeType::NewContact), 0, 10)
            .expect("new")
            .iter()
            .map(|c| c.change_id)
            .collect();
        assert_eq!(db.delete_contact_changes(&ids).expect("confirm"), 2);
        assert_eq!(db.delete_contact_changes(&ids).expect("confirm again"), 0);
        assert_eq!(db.count_contact_changes(None).expect("count"), 1);
    }

    #[test]
    fn test_change_serializes_as_tagged_union() {
        let change = ServerChange::DeleteContact {
            local_contact_id: 1,
            server_contact_id: Some(2),
        };
        let json = serde_json::to_value(&change).expect("serialize");
        assert_eq!(json["type"], "delete_contact");
        assert_eq!(json["serverContactId"], 2);
    }
}
