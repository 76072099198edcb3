use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::*;

const CONTACT_COLUMNS: &str = "local_contact_id, server_contact_id, native_contact_id, user_id,
     about_me, gender, friend_of_mine, synctophone, updated";

impl PeopleDb {
    // =========================================================================
    // Contacts
    // =========================================================================

    /// Insert a contact row and assign its local id.
    ///
    /// `strip` decides whether the server/native ids are nulled first, so the
    /// same primitive serves brand-new local contacts and records arriving
    /// from a remote side. Details, groups and sources are not written here.
    pub fn add_contact(&self, contact: &mut Contact, strip: IdStrip) -> Result<i64, DbError> {
        if strip.server {
            contact.server_contact_id = None;
        }
        if strip.native {
            contact.native_contact_id = None;
        }
        self.conn.execute(
            "INSERT INTO contacts (
                server_contact_id, native_contact_id, user_id, about_me, gender,
                friend_of_mine, synctophone, updated, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                contact.server_contact_id,
                contact.native_contact_id,
                contact.user_id,
                contact.about_me,
                contact.gender,
                contact.friend_of_mine as i32,
                contact.synctophone as i32,
                contact.updated,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        contact.local_contact_id = Some(id);
        Ok(id)
    }

    /// Update the scalar fields of an existing contact. Remote ids are only
    /// changed through [`Self::set_contact_server_id`] / [`Self::set_contact_native_id`].
    pub fn modify_contact(&self, contact: &Contact) -> Result<(), DbError> {
        let local_id = contact
            .local_contact_id
            .ok_or_else(|| DbError::NotFound("contact without local id".into()))?;
        let changed = self.conn.execute(
            "UPDATE contacts SET user_id = ?1, about_me = ?2, gender = ?3,
                friend_of_mine = ?4, synctophone = ?5, updated = ?6
             WHERE local_contact_id = ?7",
            params![
                contact.user_id,
                contact.about_me,
                contact.gender,
                contact.friend_of_mine as i32,
                contact.synctophone as i32,
                contact.updated,
                local_id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("contact {}", local_id)));
        }
        Ok(())
    }

    /// Remove a contact row together with its group and source relations.
    pub fn delete_contact(&self, local_id: i64) -> Result<(), DbError> {
        self.delete_contact_groups(local_id)?;
        self.delete_contact_sources(local_id)?;
        let changed = self.conn.execute(
            "DELETE FROM contacts WHERE local_contact_id = ?1",
            params![local_id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("contact {}", local_id)));
        }
        Ok(())
    }

    /// Fetch the contact row only (no details, groups or sources).
    pub fn fetch_contact_row(&self, local_id: i64) -> Result<Contact, DbError> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM contacts WHERE local_contact_id = ?1", CONTACT_COLUMNS),
                params![local_id],
                Self::map_contact_row,
            )
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("contact {}", local_id)))
    }

    /// Fetch a contact with its details, groups and sources.
    pub fn fetch_contact(&self, local_id: i64) -> Result<Contact, DbError> {
        let mut contact = self.fetch_contact_row(local_id)?;
        contact.details = self.fetch_contact_details(local_id)?;
        contact.groups = self.fetch_contact_groups(local_id)?;
        contact.sources = self.fetch_contact_sources(local_id)?;
        Ok(contact)
    }

    pub fn contact_exists(&self, local_id: i64) -> Result<bool, DbError> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM contacts WHERE local_contact_id = ?1)",
            params![local_id],
            |row| row.get(0),
        )?)
    }

    pub fn fetch_contact_by_server_id(&self, server_id: i64) -> Result<Option<Contact>, DbError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM contacts WHERE server_contact_id = ?1", CONTACT_COLUMNS),
                params![server_id],
                Self::map_contact_row,
            )
            .optional()?)
    }

    pub fn fetch_contact_by_native_id(&self, native_id: i64) -> Result<Option<Contact>, DbError> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM contacts WHERE native_contact_id = ?1
                     ORDER BY local_contact_id LIMIT 1",
                    CONTACT_COLUMNS
                ),
                params![native_id],
                Self::map_contact_row,
            )
            .optional()?)
    }

    /// All local contact ids, ascending.
    pub fn fetch_contact_ids(&self) -> Result<Vec<i64>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT local_contact_id FROM contacts ORDER BY local_contact_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_contacts(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))?)
    }

    /// Assign the server id (and account id) of a contact.
    pub fn set_contact_server_id(
        &self,
        local_id: i64,
        server_id: Option<i64>,
        user_id: Option<i64>,
    ) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "UPDATE contacts SET server_contact_id = ?1, user_id = COALESCE(?2, user_id)
             WHERE local_contact_id = ?3",
            params![server_id, user_id, local_id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("contact {}", local_id)));
        }
        Ok(())
    }

    /// Assign the native id of a contact and of every detail it owns.
    pub fn set_contact_native_id(&self, local_id: i64, native_id: Option<i64>) -> Result<(), DbError> {
        let mut stmt = self.conn.prepare_cached(
            "UPDATE contacts SET native_contact_id = ?1 WHERE local_contact_id = ?2",
        )?;
        let changed = stmt.execute(params![native_id, local_id])?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("contact {}", local_id)));
        }
        let mut stmt = self.conn.prepare_cached(
            "UPDATE contact_details SET native_contact_id = ?1 WHERE local_contact_id = ?2",
        )?;
        stmt.execute(params![native_id, local_id])?;
        Ok(())
    }

    /// Local id owning `server_id`, if any.
    pub fn local_id_for_server_id(&self, server_id: i64) -> Result<Option<i64>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT local_contact_id FROM contacts WHERE server_contact_id = ?1",
                params![server_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn map_contact_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
        Ok(Contact {
            local_contact_id: Some(row.get(0)?),
            server_contact_id: row.get(1)?,
            native_contact_id: row.get(2)?,
            user_id: row.get(3)?,
            about_me: row.get(4)?,
            gender: row.get(5)?,
            friend_of_mine: row.get::<_, i32>(6)? != 0,
            synctophone: row.get::<_, i32>(7)? != 0,
            updated: row.get(8)?,
            ..Contact::default()
        })
    }

    // =========================================================================
    // Group membership
    // =========================================================================

    /// Returns true if the relation was newly created.
    pub fn add_contact_group(&self, local_id: i64, group_id: i64) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO contact_groups (local_contact_id, group_id) VALUES (?1, ?2)",
            params![local_id, group_id],
        )?;
        Ok(changed > 0)
    }

    /// Returns true if a relation was removed.
    pub fn remove_contact_group(&self, local_id: i64, group_id: i64) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "DELETE FROM contact_groups WHERE local_contact_id = ?1 AND group_id = ?2",
            params![local_id, group_id],
        )?;
        Ok(changed > 0)
    }

    pub fn contact_in_group(&self, local_id: i64, group_id: i64) -> Result<bool, DbError> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM contact_groups WHERE local_contact_id = ?1 AND group_id = ?2)",
            params![local_id, group_id],
            |row| row.get(0),
        )?)
    }

    pub fn fetch_contact_groups(&self, local_id: i64) -> Result<BTreeSet<i64>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT group_id FROM contact_groups WHERE local_contact_id = ?1")?;
        let rows = stmt.query_map(params![local_id], |row| row.get::<_, i64>(0))?;
        Ok(rows.collect::<Result<BTreeSet<_>, _>>()?)
    }

    pub fn fetch_group_members(&self, group_id: i64) -> Result<Vec<i64>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT local_contact_id FROM contact_groups WHERE group_id = ?1 ORDER BY local_contact_id",
        )?;
        let rows = stmt.query_map(params![group_id], |row| row.get::<_, i64>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_contact_groups(&self, local_id: i64) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM contact_groups WHERE local_contact_id = ?1",
            params![local_id],
        )?;
        Ok(())
    }

    // =========================================================================
    // Source tags
    // =========================================================================

    pub fn add_contact_source(&self, local_id: i64, source: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO contact_sources (local_contact_id, source) VALUES (?1, ?2)",
            params![local_id, source],
        )?;
        Ok(())
    }

    pub fn fetch_contact_sources(&self, local_id: i64) -> Result<BTreeSet<String>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT source FROM contact_sources WHERE local_contact_id = ?1")?;
        let rows = stmt.query_map(params![local_id], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<BTreeSet<_>, _>>()?)
    }

    pub fn delete_contact_sources(&self, local_id: i64) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM contact_sources WHERE local_contact_id = ?1",
            params![local_id],
        )?;
        Ok(())
    }
}
