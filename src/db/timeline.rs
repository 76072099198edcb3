//! Denormalized `timeline` projection of calls, messages and status events.
//!
//! Each row caches the contact name it is attributed to so the activity list
//! renders without joins. Phone-based rows are matched on the normalized
//! number.

use rusqlite::{params, OptionalExtension};

use super::*;

const TIMELINE_COLUMNS: &str = "timeline_id, local_contact_id, contact_name, contact_address,
     event_kind, description, timestamp";

fn is_phone_kind(kind: TimelineEventKind) -> bool {
    matches!(
        kind,
        TimelineEventKind::Call | TimelineEventKind::Sms | TimelineEventKind::Mms
    )
}

fn normalize_address(kind: TimelineEventKind, address: &str) -> String {
    if is_phone_kind(kind) {
        normalize_phone(address)
    } else {
        address.trim().to_lowercase()
    }
}

impl PeopleDb {
    /// Record an activity. An unattributed phone event is attached to the
    /// first contact owning that number.
    pub fn add_timeline_event(&self, event: &mut TimelineEvent) -> Result<i64, DbError> {
        let normalized = event
            .contact_address
            .as_deref()
            .map(|a| normalize_address(event.event_kind, a))
            .filter(|a| !a.is_empty());

        if event.local_contact_id.is_none() && is_phone_kind(event.event_kind) {
            if let Some(address) = event.contact_address.as_deref() {
                if let Some(owner) = self.find_contacts_by_phone(address)?.first().copied() {
                    event.local_contact_id = Some(owner);
                    if let Some(name) = self.fetch_formatted_name(owner)?.filter(|n| !n.is_empty()) {
                        event.contact_name = Some(name);
                    }
                }
            }
        }
        if event.contact_name.is_none() {
            event.contact_name = event.contact_address.clone();
        }

        self.conn.execute(
            "INSERT INTO timeline (
                local_contact_id, contact_name, contact_address, normalized_address,
                event_kind, description, timestamp
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.local_contact_id,
                event.contact_name,
                event.contact_address,
                normalized,
                event.event_kind.as_str(),
                event.description,
                event.timestamp,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        event.timeline_id = Some(id);
        Ok(id)
    }

    /// Propagate a new display name to every row attributed to a contact.
    pub fn update_timeline_names(&self, local_id: i64, name: &str) -> Result<usize, DbError> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE timeline SET contact_name = ?1 WHERE local_contact_id = ?2")?;
        Ok(stmt.execute(params![name, local_id])?)
    }

    /// Re-key phone-based rows after a contact's number changed.
    ///
    /// When the number was edited, the contact keeps its rows for
    /// `old_number`; they are re-keyed to `new_number` so later activity on
    /// the new number groups with them. When the number was removed, those
    /// rows go to another contact still owning it, or become unattributed.
    /// Unattributed rows for `new_number` are attached to the contact under
    /// `name` in both cases.
    pub fn relink_timeline_phone(
        &self,
        local_id: i64,
        old_number: Option<&str>,
        new_number: Option<&str>,
        name: &str,
    ) -> Result<(), DbError> {
        let old = old_number.map(normalize_phone).filter(|n| !n.is_empty());
        let new = new_number.map(normalize_phone).filter(|n| !n.is_empty());
        if old == new {
            return Ok(());
        }

        match (old.as_deref(), new.as_deref()) {
            (Some(old), Some(new)) => {
                let moved = self.conn.execute(
                    "UPDATE timeline SET normalized_address = ?1, contact_name = ?2
                     WHERE local_contact_id = ?3 AND normalized_address = ?4
                       AND event_kind IN ('call', 'sms', 'mms')",
                    params![new, name, local_id, old],
                )?;
                log::debug!("Re-keyed {} timeline row(s) of contact {}", moved, local_id);
            }
            (Some(old), None) => self.release_timeline_number(local_id, old)?,
            (None, _) => {}
        }

        if let Some(new) = new.as_deref() {
            self.conn.execute(
                "UPDATE timeline SET local_contact_id = ?1, contact_name = ?2
                 WHERE local_contact_id IS NULL AND normalized_address = ?3
                   AND event_kind IN ('call', 'sms', 'mms')",
                params![local_id, name, new],
            )?;
        }
        Ok(())
    }

    /// Hand a removed number's rows to another owner of it, or detach them.
    fn release_timeline_number(&self, local_id: i64, number: &str) -> Result<(), DbError> {
        let heir = self
            .find_contacts_by_phone(number)?
            .into_iter()
            .find(|id| *id != local_id);
        match heir {
            Some(heir) => {
                let heir_name = self.fetch_formatted_name(heir)?;
                self.conn.execute(
                    "UPDATE timeline SET local_contact_id = ?1,
                        contact_name = COALESCE(?2, contact_address)
                     WHERE local_contact_id = ?3 AND normalized_address = ?4
                       AND event_kind IN ('call', 'sms', 'mms')",
                    params![heir, heir_name, local_id, number],
                )?;
            }
            None => {
                self.conn.execute(
                    "UPDATE timeline SET local_contact_id = NULL, contact_name = contact_address
                     WHERE local_contact_id = ?1 AND normalized_address = ?2
                       AND event_kind IN ('call', 'sms', 'mms')",
                    params![local_id, number],
                )?;
            }
        }
        Ok(())
    }

    /// Detach every row from a deleted contact; the raw address becomes the name.
    pub fn unlink_timeline_contact(&self, local_id: i64) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "UPDATE timeline SET local_contact_id = NULL,
                contact_name = COALESCE(contact_address, contact_name)
             WHERE local_contact_id = ?1",
            params![local_id],
        )?)
    }

    /// Move every row from one contact to another (duplicate merge). A blank
    /// `name` falls back to the raw address.
    pub fn repoint_timeline_contact(&self, from: i64, to: i64, name: &str) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "UPDATE timeline SET local_contact_id = ?1,
                contact_name = COALESCE(NULLIF(?2, ''), contact_address, contact_name)
             WHERE local_contact_id = ?3",
            params![to, name, from],
        )?)
    }

    pub fn fetch_timeline_event(&self, timeline_id: i64) -> Result<Option<TimelineEvent>, DbError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM timeline WHERE timeline_id = ?1", TIMELINE_COLUMNS),
                params![timeline_id],
                Self::map_timeline_row,
            )
            .optional()?)
    }

    /// Newest first.
    pub fn fetch_timeline_for_contact(&self, local_id: i64) -> Result<Vec<TimelineEvent>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM timeline WHERE local_contact_id = ?1
             ORDER BY timestamp DESC, timeline_id DESC",
            TIMELINE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![local_id], Self::map_timeline_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Newest first.
    pub fn fetch_timeline_for_address(
        &self,
        kind: TimelineEventKind,
        address: &str,
    ) -> Result<Vec<TimelineEvent>, DbError> {
        let normalized = normalize_address(kind, address);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM timeline WHERE normalized_address = ?1
             ORDER BY timestamp DESC, timeline_id DESC",
            TIMELINE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![normalized], Self::map_timeline_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn map_timeline_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TimelineEvent> {
        Ok(TimelineEvent {
            timeline_id: Some(row.get(0)?),
            local_contact_id: row.get(1)?,
            contact_name: row.get(2)?,
            contact_address: row.get(3)?,
            event_kind: TimelineEventKind::from_str_lossy(&row.get::<_, String>(4)?),
            description: row.get(5)?,
            timestamp: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_utils::test_db;
    use crate::db::*;

    fn contact_with_phone(db: &PeopleDb, name: &str, phone: &str) -> i64 {
        let id = db
            .add_contact(&mut Contact::default(), IdStrip::KEEP)
            .expect("contact");
        for mut d in [
            ContactDetail::new(DetailKey::Name, name),
            ContactDetail::new(DetailKey::Phone, phone),
        ] {
            d.local_contact_id = Some(id);
            db.add_contact_detail(&mut d, IdStrip::KEEP).expect("detail");
        }
        db.update_contact_name_in_summary(id, false).expect("summary");
        id
    }

    fn call_from(number: &str, ts: i64) -> TimelineEvent {
        TimelineEvent {
            contact_address: Some(number.to_string()),
            event_kind: TimelineEventKind::Call,
            timestamp: ts,
            ..TimelineEvent::default()
        }
    }

    #[test]
    fn test_phone_event_is_attributed_to_owner() {
        let db = test_db();
        let jane = contact_with_phone(&db, "Jane Doe", "555-1234");
        let mut event = call_from("(555) 1234", 10);
        db.add_timeline_event(&mut event).expect("add");
        assert_eq!(event.local_contact_id, Some(jane));
        assert_eq!(event.contact_name.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn test_unknown_number_keeps_address_as_name() {
        let db = test_db();
        let mut event = call_from("999", 10);
        db.add_timeline_event(&mut event).expect("add");
        assert_eq!(event.local_contact_id, None);
        assert_eq!(event.contact_name.as_deref(), Some("999"));
    }

    #[test]
    fn test_update_timeline_names() {
        let db = test_db();
        let jane = contact_with_phone(&db, "Jane Doe", "555-1234");
        let mut event = call_from("5551234", 10);
        db.add_timeline_event(&mut event).expect("add");
        assert_eq!(db.update_timeline_names(jane, "Jane Smith").expect("rename"), 1);
        let stored = db
            .fetch_timeline_event(event.timeline_id.expect("id"))
            .expect("fetch")
            .expect("row");
        assert_eq!(stored.contact_name.as_deref(), Some("Jane Smith"));
    }

    #[test]
    fn test_relink_phone_keeps_old_rows_with_contact() {
        let db = test_db();
        let jane = contact_with_phone(&db, "Jane", "111");
        let mut old_call = call_from("111", 1);
        let mut new_call = call_from("222", 2);
        db.add_timeline_event(&mut old_call).expect("old");
        db.add_timeline_event(&mut new_call).expect("new");
        assert_eq!(old_call.local_contact_id, Some(jane));
        assert_eq!(new_call.local_contact_id, None);

        db.relink_timeline_phone(jane, Some("111"), Some("222"), "Jane B")
            .expect("relink");

        let rows = db.fetch_timeline_for_contact(jane).expect("rows");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.contact_name.as_deref() == Some("Jane B")));

        // Both calls now group under the new number
        let grouped = db
            .fetch_timeline_for_address(TimelineEventKind::Call, "222")
            .expect("grouped");
        assert_eq!(grouped.len(), 2);
        assert!(grouped.iter().all(|r| r.local_contact_id == Some(jane)));
        assert!(db
            .fetch_timeline_for_address(TimelineEventKind::Call, "111")
            .expect("old rows")
            .is_empty());
    }

    #[test]
    fn test_removed_phone_hands_rows_to_other_owner() {
        let db = test_db();
        let jane = contact_with_phone(&db, "Jane", "111");
        let mut call = call_from("111", 1);
        db.add_timeline_event(&mut call).expect("call");
        let john = contact_with_phone(&db, "John", "111");

        db.relink_timeline_phone(jane, Some("111"), None, "Jane")
            .expect("relink");

        let rows = db.fetch_timeline_for_contact(john).expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].contact_name.as_deref(), Some("John"));
        assert!(db.fetch_timeline_for_contact(jane).expect("rows").is_empty());
    }

    #[test]
    fn test_removed_phone_without_other_owner_detaches_rows() {
        let db = test_db();
        let jane = contact_with_phone(&db, "Jane", "111");
        let mut call = call_from("111", 1);
        db.add_timeline_event(&mut call).expect("call");

        db.relink_timeline_phone(jane, Some("111"), None, "Jane")
            .expect("relink");

        let rows = db
            .fetch_timeline_for_address(TimelineEventKind::Call, "111")
            .expect("rows");
        assert_eq!(rows[0].local_contact_id, None);
        assert_eq!(rows[0].contact_name.as_deref(), Some("111"));
    }

    #[test]
    fn test_unlink_and_repoint() {
        let db = test_db();
        let a = contact_with_phone(&db, "A", "1");
        let b = contact_with_phone(&db, "B", "2");
        let mut call = call_from("1", 1);
        db.add_timeline_event(&mut call).expect("call");

        assert_eq!(db.repoint_timeline_contact(a, b, "B").expect("repoint"), 1);
        assert_eq!(db.fetch_timeline_for_contact(b).expect("rows").len(), 1);

        assert_eq!(db.unlink_timeline_contact(b).expect("unlink"), 1);
        assert!(db.fetch_timeline_for_contact(b).expect("rows").is_empty());
        let stored = db
            .fetch_timeline_event(call.timeline_id.expect("id"))
            .expect("fetch")
            .expect("row");
        assert_eq!(stored.contact_name.as_deref(), Some("1"));
    }
}
