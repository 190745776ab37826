//! Data models for NoteCore.
//!
//! `Note` is the local record as held by the store, including the sync
//! bookkeeping that never leaves this device. `WireNote` is the record as it
//! travels to and from the remote server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A note as stored locally.
///
/// `id` is the local primary key. `remote_id` is the identifier assigned by
/// the remote server and is `None` until the note has been created there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Local identifier (assigned by the store)
    pub id: i64,
    /// Identifier on the remote server (None until created remotely)
    pub remote_id: Option<i64>,
    /// Owning user
    pub user_id: i64,
    pub title: String,
    pub content: String,
    /// Unordered, deduplicated tag names
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// When the note was last mutated
    pub updated_at: DateTime<Utc>,
    /// When the note last completed a sync (None if never synced)
    pub synced_at: Option<DateTime<Utc>>,
    /// Optimistic version, starts at 1
    pub version: i64,
    /// Soft delete marker
    pub is_deleted: bool,
}

impl Note {
    /// True if the note has changes the remote has not acknowledged
    pub fn is_unsynced(&self) -> bool {
        match self.synced_at {
            None => true,
            Some(synced_at) => self.updated_at > synced_at,
        }
    }

    /// Convert to the wire representation sent to the remote.
    pub fn to_wire(&self) -> WireNote {
        WireNote {
            id: self.remote_id,
            user_id: self.user_id,
            title: self.title.clone(),
            content: self.content.clone(),
            tags: self.tags.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
            is_deleted: self.is_deleted,
        }
    }
}

/// Partial update for a note. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl NoteUpdate {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.tags.is_none()
    }
}

/// A note as exchanged with the remote server.
///
/// `id` is the remote identifier; it is null for notes the remote has not
/// created yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireNote {
    #[serde(default)]
    pub id: Option<i64>,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(with = "wire_time")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "wire_time")]
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    #[serde(default)]
    pub is_deleted: bool,
}

/// Body of a 409 response: the remote's current record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictBody {
    pub note: WireNote,
}

/// ISO-8601 timestamps on the wire.
///
/// Emits RFC 3339 with microseconds. Accepts RFC 3339, or a timestamp without
/// offset (either `T` or space separated), which is taken as UTC.
pub mod wire_time {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    /// Parse a wire timestamp.
    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }
}
