//! Shared type definitions for the storage layer.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

/// Order value marking the preferred detail of a key on one contact.
pub const ORDER_PREFERRED: i32 = 0;
/// Order value for every other detail.
pub const ORDER_NORMAL: i32 = 50;

/// The kind of attribute a [`ContactDetail`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailKey {
    Name,
    Nickname,
    Birthday,
    PresenceText,
    Photo,
    Phone,
    Email,
    Address,
    Url,
    Role,
    Title,
    Org,
    Note,
    Relation,
    ImAddress,
    SocialNetwork,
    #[default]
    Unknown,
}

impl DetailKey {
    /// String label for SQL storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailKey::Name => "name",
            DetailKey::Nickname => "nickname",
            DetailKey::Birthday => "birthday",
            DetailKey::PresenceText => "presence_text",
            DetailKey::Photo => "photo",
            DetailKey::Phone => "phone",
            DetailKey::Email => "email",
            DetailKey::Address => "address",
            DetailKey::Url => "url",
            DetailKey::Role => "role",
            DetailKey::Title => "title",
            DetailKey::Org => "org",
            DetailKey::Note => "note",
            DetailKey::Relation => "relation",
            DetailKey::ImAddress => "im_address",
            DetailKey::SocialNetwork => "social_network",
            DetailKey::Unknown => "unknown",
        }
    }

    /// Parse from SQL string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "name" => DetailKey::Name,
            "nickname" => DetailKey::Nickname,
            "birthday" => DetailKey::Birthday,
            "presence_text" => DetailKey::PresenceText,
            "photo" => DetailKey::Photo,
            "phone" => DetailKey::Phone,
            "email" => DetailKey::Email,
            "address" => DetailKey::Address,
            "url" => DetailKey::Url,
            "role" => DetailKey::Role,
            "title" => DetailKey::Title,
            "org" => DetailKey::Org,
            "note" => DetailKey::Note,
            "relation" => DetailKey::Relation,
            "im_address" => DetailKey::ImAddress,
            "social_network" => DetailKey::SocialNetwork,
            _ => DetailKey::Unknown,
        }
    }

    /// Whether a change to a detail of this key can alter the display name
    /// or list subtitle in the summary projection.
    pub fn affects_summary(&self) -> bool {
        matches!(
            self,
            DetailKey::Name
                | DetailKey::Nickname
                | DetailKey::Org
                | DetailKey::Phone
                | DetailKey::Email
                | DetailKey::ImAddress
                | DetailKey::Url
                | DetailKey::PresenceText
        )
    }
}

/// Sub-type of a detail (home phone, work email, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailKeyType {
    #[default]
    None,
    Home,
    Cell,
    Work,
    Fax,
    Birthday,
    Other,
}

impl DetailKeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailKeyType::None => "none",
            DetailKeyType::Home => "home",
            DetailKeyType::Cell => "cell",
            DetailKeyType::Work => "work",
            DetailKeyType::Fax => "fax",
            DetailKeyType::Birthday => "birthday",
            DetailKeyType::Other => "other",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "home" => DetailKeyType::Home,
            "cell" => DetailKeyType::Cell,
            "work" => DetailKeyType::Work,
            "fax" => DetailKeyType::Fax,
            "birthday" => DetailKeyType::Birthday,
            "other" => DetailKeyType::Other,
            _ => DetailKeyType::None,
        }
    }
}

/// One typed attribute of a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDetail {
    pub local_detail_id: Option<i64>,
    /// Back-reference to the owning contact.
    pub local_contact_id: Option<i64>,
    /// Detail id assigned by the server.
    pub server_detail_id: Option<i64>,
    pub native_detail_id: Option<i64>,
    pub native_contact_id: Option<i64>,
    pub key: DetailKey,
    pub key_type: DetailKeyType,
    pub value: Option<String>,
    pub alt: Option<String>,
    pub order: i32,
    /// Native-only metadata carried through untouched.
    pub native_val1: Option<String>,
    pub native_val2: Option<String>,
    pub native_val3: Option<String>,
}

impl Default for ContactDetail {
    fn default() -> Self {
        Self {
            local_detail_id: None,
            local_contact_id: None,
            server_detail_id: None,
            native_detail_id: None,
            native_contact_id: None,
            key: DetailKey::Unknown,
            key_type: DetailKeyType::None,
            value: None,
            alt: None,
            order: ORDER_NORMAL,
            native_val1: None,
            native_val2: None,
            native_val3: None,
        }
    }
}

impl ContactDetail {
    pub fn new(key: DetailKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn with_key_type(mut self, key_type: DetailKeyType) -> Self {
        self.key_type = key_type;
        self
    }

    pub fn preferred(mut self) -> Self {
        self.order = ORDER_PREFERRED;
        self
    }

    pub fn is_preferred(&self) -> bool {
        self.order == ORDER_PREFERRED
    }

    /// Value with surrounding whitespace removed, `None` when blank.
    pub fn trimmed_value(&self) -> Option<&str> {
        self.value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// A contact and everything it owns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub local_contact_id: Option<i64>,
    pub server_contact_id: Option<i64>,
    pub native_contact_id: Option<i64>,
    /// Account id on the server, distinct from `server_contact_id`.
    pub user_id: Option<i64>,
    pub about_me: Option<String>,
    pub gender: Option<i32>,
    pub friend_of_mine: bool,
    pub synctophone: bool,
    /// Server-side modification stamp.
    pub updated: Option<i64>,
    /// Set on inbound records the remote side reports as removed. Never persisted.
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub details: Vec<ContactDetail>,
    #[serde(default)]
    pub groups: BTreeSet<i64>,
    #[serde(default)]
    pub sources: BTreeSet<String>,
}

impl Contact {
    pub fn with_detail(mut self, detail: ContactDetail) -> Self {
        self.details.push(detail);
        self
    }

    /// Preferred-then-first detail of `key`.
    pub fn detail(&self, key: DetailKey) -> Option<&ContactDetail> {
        self.details
            .iter()
            .filter(|d| d.key == key)
            .min_by_key(|d| (d.order, d.local_detail_id.unwrap_or(i64::MAX)))
    }
}

/// Which remote-assigned ids to null out before an insert.
///
/// A record that must still be pushed to a side cannot carry that side's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdStrip {
    pub server: bool,
    pub native: bool,
}

impl IdStrip {
    pub const KEEP: IdStrip = IdStrip { server: false, native: false };

    pub fn new(server: bool, native: bool) -> Self {
        Self { server, native }
    }
}

/// Presence value cached in the summary projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnlineStatus {
    #[default]
    Offline,
    Idle,
    Online,
}

impl OnlineStatus {
    pub fn as_i32(&self) -> i32 {
        match self {
            OnlineStatus::Offline => 0,
            OnlineStatus::Idle => 1,
            OnlineStatus::Online => 2,
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => OnlineStatus::Idle,
            2 => OnlineStatus::Online,
            _ => OnlineStatus::Offline,
        }
    }
}

/// A row from `contact_summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSummary {
    pub local_contact_id: i64,
    pub display_name: String,
    pub alt_value: Option<String>,
    pub alt_key: Option<DetailKey>,
    pub status_text: Option<String>,
    pub online_status: OnlineStatus,
    pub native_contact_id: Option<i64>,
    pub server_synced: bool,
    pub native_synced: bool,
    pub friend_of_mine: bool,
    pub synctophone: bool,
    pub picture_loaded: bool,
    pub is_me_profile: bool,
}

/// Kind of activity recorded on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
    Call,
    Sms,
    Mms,
    Email,
    Status,
    #[default]
    Other,
}

impl TimelineEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimelineEventKind::Call => "call",
            TimelineEventKind::Sms => "sms",
            TimelineEventKind::Mms => "mms",
            TimelineEventKind::Email => "email",
            TimelineEventKind::Status => "status",
            TimelineEventKind::Other => "other",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "call" => TimelineEventKind::Call,
            "sms" => TimelineEventKind::Sms,
            "mms" => TimelineEventKind::Mms,
            "email" => TimelineEventKind::Email,
            "status" => TimelineEventKind::Status,
            _ => TimelineEventKind::Other,
        }
    }
}

/// A row from `timeline`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub timeline_id: Option<i64>,
    pub local_contact_id: Option<i64>,
    pub contact_name: Option<String>,
    /// Phone number or address the activity was exchanged with.
    pub contact_address: Option<String>,
    pub event_kind: TimelineEventKind,
    pub description: Option<String>,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// `local id -> server id` pairing used for bulk id assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerIdInfo {
    pub local_id: i64,
    pub server_id: i64,
    pub user_id: Option<i64>,
}

/// `local detail id -> server detail id` pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDetailIdInfo {
    pub local_detail_id: i64,
    pub server_detail_id: i64,
}

/// `local id -> native id` pairing used for bulk id assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeIdInfo {
    pub local_id: i64,
    pub native_id: i64,
}

/// Native ids for one detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeDetailIdInfo {
    pub local_detail_id: i64,
    pub native_detail_id: i64,
    pub native_contact_id: Option<i64>,
}

/// Why a change-log request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRejection {
    /// A whole-contact delete is already pending for the owning contact.
    ContactDeleted,
    /// The parent contact has no remote id yet, so the change cannot be expressed.
    ParentNotSynced,
}

/// Result of asking a change log to record a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    /// A new row was written.
    Logged(i64),
    /// Folded into, or cancelled against, pending rows. Nothing new written.
    Coalesced,
    Rejected(LogRejection),
}

impl LogOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, LogOutcome::Rejected(_))
    }
}

/// Keep digits and a leading `+`; used to compare phone numbers.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        if c.is_ascii_digit() || (c == '+' && i == 0) {
            out.push(c);
        }
    }
    out
}
