use rusqlite::{params, OptionalExtension};

use super::*;

const DETAIL_COLUMNS: &str = "local_detail_id, local_contact_id, server_detail_id, native_detail_id,
     native_contact_id, detail_key, key_type, value, alt, detail_order,
     native_val1, native_val2, native_val3";

/// Phone values are indexed in normalized form for number lookups.
fn normalized_value(detail: &ContactDetail) -> Option<String> {
    match detail.key {
        DetailKey::Phone => detail
            .value
            .as_deref()
            .map(normalize_phone)
            .filter(|v| !v.is_empty()),
        _ => None,
    }
}

impl PeopleDb {
    // =========================================================================
    // Contact details
    // =========================================================================

    /// Insert a detail for an existing contact and assign its local id.
    ///
    /// A second preferred detail for the same `(contact, key)` is demoted to
    /// [`ORDER_NORMAL`] instead of rejected; the demotion is written back into
    /// `detail`.
    pub fn add_contact_detail(&self, detail: &mut ContactDetail, strip: IdStrip) -> Result<i64, DbError> {
        let contact_id = detail
            .local_contact_id
            .ok_or_else(|| DbError::NotFound("detail without owning contact".into()))?;
        let owner = self.fetch_contact_row(contact_id)?;

        if strip.server {
            detail.server_detail_id = None;
        }
        if strip.native {
            detail.native_detail_id = None;
            detail.native_contact_id = None;
        }
        // Every detail of a linked contact carries the contact's native id
        if detail.native_contact_id.is_none() {
            detail.native_contact_id = owner.native_contact_id;
        }
        if detail.is_preferred() && self.has_preferred_detail(contact_id, detail.key, None)? {
            log::debug!(
                "Demoting second preferred {} detail on contact {}",
                detail.key.as_str(),
                contact_id
            );
            detail.order = ORDER_NORMAL;
        }

        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO contact_details (
                local_contact_id, server_detail_id, native_detail_id, native_contact_id,
                detail_key, key_type, value, alt, detail_order, normalized_value,
                native_val1, native_val2, native_val3
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )?;
        stmt.execute(params![
            contact_id,
            detail.server_detail_id,
            detail.native_detail_id,
            detail.native_contact_id,
            detail.key.as_str(),
            detail.key_type.as_str(),
            detail.value,
            detail.alt,
            detail.order,
            normalized_value(detail),
            detail.native_val1,
            detail.native_val2,
            detail.native_val3,
        ])?;
        let id = self.conn.last_insert_rowid();
        detail.local_detail_id = Some(id);
        Ok(id)
    }

    /// Overwrite the mutable fields of an existing detail. Owner and remote
    /// ids are left alone; the preferred rule applies as on insert.
    pub fn modify_contact_detail(&self, detail: &mut ContactDetail) -> Result<(), DbError> {
        let detail_id = detail
            .local_detail_id
            .ok_or_else(|| DbError::NotFound("detail without local id".into()))?;
        let stored = self.fetch_contact_detail(detail_id)?;
        let contact_id = stored.local_contact_id.unwrap_or_default();
        detail.local_contact_id = Some(contact_id);

        if detail.is_preferred()
            && self.has_preferred_detail(contact_id, detail.key, Some(detail_id))?
        {
            detail.order = ORDER_NORMAL;
        }

        self.conn.execute(
            "UPDATE contact_details SET detail_key = ?1, key_type = ?2, value = ?3, alt = ?4,
                detail_order = ?5, normalized_value = ?6,
                native_val1 = ?7, native_val2 = ?8, native_val3 = ?9
             WHERE local_detail_id = ?10",
            params![
                detail.key.as_str(),
                detail.key_type.as_str(),
                detail.value,
                detail.alt,
                detail.order,
                normalized_value(detail),
                detail.native_val1,
                detail.native_val2,
                detail.native_val3,
                detail_id,
            ],
        )?;
        Ok(())
    }

    pub fn delete_contact_detail(&self, local_detail_id: i64) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "DELETE FROM contact_details WHERE local_detail_id = ?1",
            params![local_detail_id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("detail {}", local_detail_id)));
        }
        Ok(())
    }

    pub fn delete_contact_details(&self, local_contact_id: i64) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "DELETE FROM contact_details WHERE local_contact_id = ?1",
            params![local_contact_id],
        )?)
    }

    pub fn fetch_contact_detail(&self, local_detail_id: i64) -> Result<ContactDetail, DbError> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM contact_details WHERE local_detail_id = ?1", DETAIL_COLUMNS),
                params![local_detail_id],
                Self::map_detail_row,
            )
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("detail {}", local_detail_id)))
    }

    /// Details of one contact grouped by key, preferred first within a key.
    pub fn fetch_contact_details(&self, local_contact_id: i64) -> Result<Vec<ContactDetail>, DbError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {} FROM contact_details WHERE local_contact_id = ?1
             ORDER BY detail_key, detail_order, local_detail_id",
            DETAIL_COLUMNS
        ))?;
        let rows = stmt.query_map(params![local_contact_id], Self::map_detail_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Owning contact of a detail, if the detail exists.
    pub fn detail_owner(&self, local_detail_id: i64) -> Result<Option<i64>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT local_contact_id FROM contact_details WHERE local_detail_id = ?1",
                params![local_detail_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// First detail of `key` on a contact whose value equals `value`.
    pub fn find_detail(
        &self,
        local_contact_id: i64,
        key: DetailKey,
        value: Option<&str>,
    ) -> Result<Option<ContactDetail>, DbError> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM contact_details
                     WHERE local_contact_id = ?1 AND detail_key = ?2 AND value IS ?3
                     ORDER BY local_detail_id LIMIT 1",
                    DETAIL_COLUMNS
                ),
                params![local_contact_id, key.as_str(), value],
                Self::map_detail_row,
            )
            .optional()?)
    }

    fn has_preferred_detail(
        &self,
        local_contact_id: i64,
        key: DetailKey,
        exclude: Option<i64>,
    ) -> Result<bool, DbError> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM contact_details
                 WHERE local_contact_id = ?1 AND detail_key = ?2 AND detail_order = ?3
                   AND local_detail_id IS NOT ?4)",
            params![local_contact_id, key.as_str(), ORDER_PREFERRED, exclude],
            |row| row.get(0),
        )?)
    }

    pub fn set_detail_server_id(&self, local_detail_id: i64, server_detail_id: Option<i64>) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "UPDATE contact_details SET server_detail_id = ?1 WHERE local_detail_id = ?2",
            params![server_detail_id, local_detail_id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("detail {}", local_detail_id)));
        }
        Ok(())
    }

    pub fn set_detail_native_ids(&self, info: &NativeDetailIdInfo) -> Result<(), DbError> {
        let mut stmt = self.conn.prepare_cached(
            "UPDATE contact_details SET native_detail_id = ?1,
                native_contact_id = COALESCE(?2, native_contact_id)
             WHERE local_detail_id = ?3",
        )?;
        let changed = stmt.execute(params![
            info.native_detail_id,
            info.native_contact_id,
            info.local_detail_id
        ])?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("detail {}", info.local_detail_id)));
        }
        Ok(())
    }

    /// Move a detail to another contact. Used when merging duplicates; the
    /// native ids are replaced because the new owner may live in another
    /// address-book record.
    pub fn reparent_detail(
        &self,
        local_detail_id: i64,
        new_contact_id: i64,
        native_contact_id: Option<i64>,
        native_detail_id: Option<i64>,
    ) -> Result<(), DbError> {
        let mut stmt = self.conn.prepare_cached(
            "UPDATE contact_details SET local_contact_id = ?1, native_contact_id = ?2,
                native_detail_id = ?3, server_detail_id = NULL
             WHERE local_detail_id = ?4",
        )?;
        let changed = stmt.execute(params![
            new_contact_id,
            native_contact_id,
            native_detail_id,
            local_detail_id
        ])?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("detail {}", local_detail_id)));
        }
        Ok(())
    }

    /// Contacts owning a phone detail equal to `number` after normalization.
    pub fn find_contacts_by_phone(&self, number: &str) -> Result<Vec<i64>, DbError> {
        let normalized = normalize_phone(number);
        if normalized.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT local_contact_id FROM contact_details
             WHERE detail_key = 'phone' AND normalized_value = ?1
             ORDER BY local_contact_id",
        )?;
        let rows = stmt.query_map(params![normalized], |row| row.get::<_, i64>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn map_detail_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContactDetail> {
        Ok(ContactDetail {
            local_detail_id: Some(row.get(0)?),
            local_contact_id: Some(row.get(1)?),
            server_detail_id: row.get(2)?,
            native_detail_id: row.get(3)?,
            native_contact_id: row.get(4)?,
            key: DetailKey::from_str_lossy(&row.get::<_, String>(5)?),
            key_type: DetailKeyType::from_str_lossy(&row.get::<_, String>(6)?),
            value: row.get(7)?,
            alt: row.get(8)?,
            order: row.get(9)?,
            native_val1: row.get(10)?,
            native_val2: row.get(11)?,
            native_val3: row.get(12)?,
        })
    }
}
