//! Denormalized `contact_summary` projection used for list rendering.
//!
//! Rows are derived from the entity tables and rebuilt by the orchestrator
//! after any write that can change the display name, subtitle or flags.

use rusqlite::{params, OptionalExtension};

use super::*;

/// Keys that can provide a display name, in precedence order.
const NAME_PRECEDENCE: &[DetailKey] = &[
    DetailKey::Name,
    DetailKey::Nickname,
    DetailKey::Org,
    DetailKey::Phone,
    DetailKey::Email,
    DetailKey::ImAddress,
    DetailKey::Url,
];

const SUMMARY_COLUMNS: &str = "local_contact_id, display_name, alt_value, alt_key, status_text,
     online_status, native_contact_id, server_synced, native_synced, friend_of_mine,
     synctophone, picture_loaded, is_me_profile";

/// Preferred detail of `key`, ties broken by the lowest local id.
fn pick(details: &[ContactDetail], key: DetailKey) -> Option<&ContactDetail> {
    details
        .iter()
        .filter(|d| d.key == key && d.trimmed_value().is_some())
        .min_by_key(|d| (d.order, d.local_detail_id.unwrap_or(i64::MAX)))
}

/// Render a vCard `N` value (`family;given;middle;prefix;suffix`) for display.
/// Values without separators are used verbatim.
pub fn format_name_value(value: &str) -> String {
    if !value.contains(';') {
        return value.trim().to_string();
    }
    let parts: Vec<&str> = value.split(';').map(str::trim).collect();
    let part = |i: usize| parts.get(i).copied().unwrap_or("");
    [part(3), part(1), part(2), part(0), part(4)]
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical display name for a detail set. Empty when nothing identifies
/// the contact.
pub fn compute_display_name(details: &[ContactDetail]) -> String {
    for key in NAME_PRECEDENCE {
        if let Some(detail) = pick(details, *key) {
            let raw = detail.trimmed_value().unwrap_or_default();
            let name = match key {
                DetailKey::Name => format_name_value(raw),
                _ => raw.to_string(),
            };
            if !name.is_empty() {
                return name;
            }
        }
    }
    String::new()
}

/// Subtitle shown under the name: first phone, else first email.
fn compute_alt(details: &[ContactDetail]) -> Option<(String, DetailKey)> {
    [DetailKey::Phone, DetailKey::Email].iter().find_map(|key| {
        pick(details, *key).and_then(|d| d.trimmed_value().map(|v| (v.to_string(), *key)))
    })
}

impl PeopleDb {
    /// Recompute the display name, subtitle and flags of one contact and
    /// upsert its summary row. Presence and picture state are preserved.
    ///
    /// Fails with `NotFound` when the contact cannot be read; callers abort
    /// the surrounding transaction on any error.
    pub fn update_contact_name_in_summary(
        &self,
        local_id: i64,
        is_me_profile: bool,
    ) -> Result<String, DbError> {
        let contact = self.fetch_contact_row(local_id)?;
        let details = self.fetch_contact_details(local_id)?;
        let name = compute_display_name(&details);
        let alt = compute_alt(&details);
        let status = pick(&details, DetailKey::PresenceText)
            .and_then(|d| d.trimmed_value().map(str::to_string));

        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO contact_summary (
                local_contact_id, display_name, alt_value, alt_key, status_text,
                native_contact_id, server_synced, native_synced, friend_of_mine,
                synctophone, is_me_profile
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(local_contact_id) DO UPDATE SET
                display_name = excluded.display_name,
                alt_value = excluded.alt_value,
                alt_key = excluded.alt_key,
                status_text = excluded.status_text,
                native_contact_id = excluded.native_contact_id,
                server_synced = excluded.server_synced,
                native_synced = excluded.native_synced,
                friend_of_mine = excluded.friend_of_mine,
                synctophone = excluded.synctophone,
                is_me_profile = excluded.is_me_profile",
        )?;
        stmt.execute(params![
            local_id,
            name,
            alt.as_ref().map(|(v, _)| v.as_str()),
            alt.as_ref().map(|(_, k)| k.as_str()),
            status,
            contact.native_contact_id,
            contact.server_contact_id.is_some() as i32,
            contact.native_contact_id.is_some() as i32,
            contact.friend_of_mine as i32,
            contact.synctophone as i32,
            is_me_profile as i32,
        ])?;
        Ok(name)
    }

    /// Update only the flag columns of an existing summary row.
    pub fn refresh_summary_flags(&self, local_id: i64) -> Result<(), DbError> {
        let contact = self.fetch_contact_row(local_id)?;
        self.conn.execute(
            "UPDATE contact_summary SET native_contact_id = ?1, server_synced = ?2,
                native_synced = ?3, friend_of_mine = ?4, synctophone = ?5
             WHERE local_contact_id = ?6",
            params![
                contact.native_contact_id,
                contact.server_contact_id.is_some() as i32,
                contact.native_contact_id.is_some() as i32,
                contact.friend_of_mine as i32,
                contact.synctophone as i32,
                local_id,
            ],
        )?;
        Ok(())
    }

    pub fn set_summary_picture_loaded(&self, local_id: i64, loaded: bool) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE contact_summary SET picture_loaded = ?1 WHERE local_contact_id = ?2",
            params![loaded as i32, local_id],
        )?;
        Ok(())
    }

    pub fn set_summary_online_status(&self, local_id: i64, status: OnlineStatus) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE contact_summary SET online_status = ?1 WHERE local_contact_id = ?2",
            params![status.as_i32(), local_id],
        )?;
        Ok(())
    }

    pub fn set_summary_me_profile(&self, local_id: i64, is_me_profile: bool) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE contact_summary SET is_me_profile = ?1 WHERE local_contact_id = ?2",
            params![is_me_profile as i32, local_id],
        )?;
        Ok(())
    }

    pub fn delete_summary(&self, local_id: i64) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM contact_summary WHERE local_contact_id = ?1",
            params![local_id],
        )?;
        Ok(())
    }

    pub fn fetch_summary_item(&self, local_id: i64) -> Result<Option<ContactSummary>, DbError> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM contact_summary WHERE local_contact_id = ?1",
                    SUMMARY_COLUMNS
                ),
                params![local_id],
                Self::map_summary_row,
            )
            .optional()?)
    }

    pub fn fetch_formatted_name(&self, local_id: i64) -> Result<Option<String>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT display_name FROM contact_summary WHERE local_contact_id = ?1",
                params![local_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// One page of the contact list, alphabetical, me profile excluded.
    pub fn fetch_summary_list(&self, offset: i64, limit: i64) -> Result<Vec<ContactSummary>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM contact_summary WHERE is_me_profile = 0
             ORDER BY display_name COLLATE NOCASE, local_contact_id
             LIMIT ?1 OFFSET ?2",
            SUMMARY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit, offset], Self::map_summary_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Contacts whose display name starts with `prefix` (case-insensitive).
    pub fn search_summary(&self, prefix: &str, limit: i64) -> Result<Vec<ContactSummary>, DbError> {
        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("{}%", escaped);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM contact_summary
             WHERE is_me_profile = 0 AND display_name LIKE ?1 ESCAPE '\\'
             ORDER BY display_name COLLATE NOCASE, local_contact_id
             LIMIT ?2",
            SUMMARY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![pattern, limit], Self::map_summary_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn summary_count(&self) -> Result<i64, DbError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM contact_summary WHERE is_me_profile = 0",
            [],
            |row| row.get(0),
        )?)
    }

    fn map_summary_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContactSummary> {
        Ok(ContactSummary {
            local_contact_id: row.get(0)?,
            display_name: row.get(1)?,
            alt_value: row.get(2)?,
            alt_key: row
                .get::<_, Option<String>>(3)?
                .map(|k| DetailKey::from_str_lossy(&k)),
            status_text: row.get(4)?,
            online_status: OnlineStatus::from_i32(row.get(5)?),
            native_contact_id: row.get(6)?,
            server_synced: row.get::<_, i32>(7)? != 0,
            native_synced: row.get::<_, i32>(8)? != 0,
            friend_of_mine: row.get::<_, i32>(9)? != 0,
            synctophone: row.get::<_, i32>(10)? != 0,
            picture_loaded: row.get::<_, i32>(11)? != 0,
            is_me_profile: row.get::<_, i32>(12)? != 0,
        })
    }
}
