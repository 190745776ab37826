//! Database operations for NoteCore.
//!
//! This module provides the local record store using SQLite. Every public
//! operation is a single statement or a single transaction, so a failure never
//! leaves a partial write behind.
//!
//! All timestamps are stored as Unix microseconds (INTEGER). Mutations always
//! set `updated_at` strictly after any existing `synced_at`, and marking a note
//! synced always sets `synced_at` at or after `updated_at`, so the unsynced
//! predicate does not depend on clock resolution.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::conflicts::conflict_copy_title;
use crate::error::{NoteError, NoteResult};
use crate::models::{Note, NoteUpdate, WireNote};
use crate::validation::{
    normalize_tags, validate_note_content, validate_search_query, validate_title, TAG_SEPARATOR,
};

const NOTE_COLUMNS: &str = "id, remote_id, user_id, title, content, tags, created_at, \
                            updated_at, synced_at, version, is_deleted";

/// Bumps the version and refreshes `updated_at` so the note reads as unsynced.
const TOUCH: &str = "version = version + 1, \
                     updated_at = MAX(?1, COALESCE(synced_at + 1, 0))";

fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

fn from_micros(value: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(value).unwrap_or_default()
}

/// Join tags into the stored column form.
fn join_tags(tags: &[String]) -> String {
    let sep = TAG_SEPARATOR.to_string();
    tags.join(&sep)
}

/// Split the stored column form back into tags.
fn split_tags(stored: &str) -> Vec<String> {
    stored
        .split(TAG_SEPARATOR)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Tags received from the other side are stored as-is where possible. Names
/// containing the separator are split rather than rejected.
fn join_foreign_tags(tags: &[String]) -> String {
    let mut seen: Vec<String> = Vec::new();
    for tag in tags.iter().flat_map(|t| split_tags(t)) {
        if !seen.contains(&tag) {
            seen.push(tag);
        }
    }
    join_tags(&seen)
}

/// Escape LIKE wildcards so the query is matched literally.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn row_to_note(row: &Row) -> rusqlite::Result<Note> {
    let tags: String = row.get(5)?;
    let created_at: i64 = row.get(6)?;
    let updated_at: i64 = row.get(7)?;
    let synced_at: Option<i64> = row.get(8)?;

    Ok(Note {
        id: row.get(0)?,
        remote_id: row.get(1)?,
        user_id: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        tags: split_tags(&tags),
        created_at: from_micros(created_at),
        updated_at: from_micros(updated_at),
        synced_at: synced_at.map(from_micros),
        version: row.get(9)?,
        is_deleted: row.get(10)?,
    })
}

fn fetch_note(conn: &Connection, note_id: i64) -> NoteResult<Option<Note>> {
    let note = conn
        .query_row(
            &format!("SELECT {} FROM notes WHERE id = ?", NOTE_COLUMNS),
            [note_id],
            row_to_note,
        )
        .optional()?;
    Ok(note)
}

/// Fetch a note the store has just written; absence means the write raced
/// with something it should not have.
fn fetch_written(conn: &Connection, note_id: i64) -> NoteResult<Note> {
    fetch_note(conn, note_id)?
        .ok_or_else(|| NoteError::database_op(format!("note {} vanished after write", note_id)))
}

fn insert_note(
    conn: &Connection,
    user_id: i64,
    remote_id: Option<i64>,
    title: &str,
    content: &str,
    tags: &str,
    created_at: i64,
    updated_at: i64,
    synced_at: Option<i64>,
    version: i64,
    is_deleted: bool,
) -> NoteResult<i64> {
    conn.execute(
        r#"
        INSERT INTO notes (remote_id, user_id, title, content, tags, created_at,
                           updated_at, synced_at, version, is_deleted)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            remote_id, user_id, title, content, tags, created_at, updated_at, synced_at,
            version, is_deleted
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Apply a validated partial update to a live note. Returns rows changed.
fn apply_update(
    conn: &Connection,
    note_id: i64,
    user_id: i64,
    update: &NoteUpdate,
    tags: Option<String>,
) -> NoteResult<usize> {
    let changed = conn.execute(
        &format!(
            r#"
            UPDATE notes
            SET title = COALESCE(?2, title),
                content = COALESCE(?3, content),
                tags = COALESCE(?4, tags),
                {}
            WHERE id = ?5 AND user_id = ?6 AND is_deleted = 0
            "#,
            TOUCH
        ),
        params![
            now_micros(),
            update.title.as_deref(),
            update.content.as_deref(),
            tags,
            note_id,
            user_id
        ],
    )?;
    Ok(changed)
}

/// Overwrite a note with a record from the remote, keeping the remote's
/// version, and mark it synced. Only applies if the note is still at
/// `expected_version`.
fn adopt_on(
    conn: &Connection,
    note_id: i64,
    expected_version: i64,
    remote: &WireNote,
) -> NoteResult<bool> {
    let updated_at = remote.updated_at.timestamp_micros();
    let changed = conn.execute(
        r#"
        UPDATE notes
        SET title = ?1,
            content = ?2,
            tags = ?3,
            version = ?4,
            is_deleted = ?5,
            remote_id = COALESCE(?6, remote_id),
            updated_at = ?7,
            synced_at = MAX(?8, ?7)
        WHERE id = ?9 AND version = ?10
        "#,
        params![
            remote.title,
            remote.content,
            join_foreign_tags(&remote.tags),
            remote.version,
            remote.is_deleted,
            remote.id,
            updated_at,
            now_micros(),
            note_id,
            expected_version
        ],
    )?;
    Ok(changed > 0)
}

/// Database wrapper for SQLite operations
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create a new database connection
    pub fn new<P: AsRef<Path>>(db_path: P) -> NoteResult<Self> {
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let db = Self { conn };
        db.init_database()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> NoteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_database()?;
        Ok(db)
    }

    /// Initialize database schema
    pub fn init_database(&self) -> NoteResult<()> {
        self.conn.execute_batch(
            r#"
            -- All timestamps are Unix microseconds (INTEGER)
            CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                remote_id INTEGER,
                user_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                synced_at INTEGER,
                version INTEGER NOT NULL DEFAULT 1,
                is_deleted INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_notes_user_updated ON notes(user_id, updated_at);
            CREATE INDEX IF NOT EXISTS idx_notes_synced_at ON notes(synced_at);
            -- A remote record maps to at most one local note per owner
            CREATE UNIQUE INDEX IF NOT EXISTS idx_notes_user_remote
                ON notes(user_id, remote_id) WHERE remote_id IS NOT NULL;
            "#,
        )?;
        Ok(())
    }

    /// Create a new note for `user_id`.
    ///
    /// The note starts at version 1 and has never been synced.
    pub fn create_note(
        &self,
        user_id: i64,
        title: &str,
        content: &str,
        tags: &[String],
    ) -> NoteResult<Note> {
        validate_title(title)?;
        validate_note_content(content)?;
        let tags = normalize_tags(tags)?;

        let now = now_micros();
        let note_id = insert_note(
            &self.conn,
            user_id,
            None,
            title,
            content,
            &join_tags(&tags),
            now,
            now,
            None,
            1,
            false,
        )?;
        fetch_written(&self.conn, note_id)
    }

    /// List live notes for a user, most recently updated first.
    ///
    /// With a non-blank `search`, only notes whose title, content or tags
    /// contain it (case-insensitive) are returned.
    pub fn list_notes(&self, user_id: i64, search: Option<&str>) -> NoteResult<Vec<Note>> {
        validate_search_query(search)?;

        let mut query = format!(
            "SELECT {} FROM notes WHERE user_id = ?1 AND is_deleted = 0",
            NOTE_COLUMNS
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id)];

        if let Some(text) = search {
            if !text.trim().is_empty() {
                query.push_str(
                    r#"
                    AND (LOWER(title) LIKE ?2 ESCAPE '\'
                         OR LOWER(content) LIKE ?2 ESCAPE '\'
                         OR LOWER(tags) LIKE ?2 ESCAPE '\')
                    "#,
                );
                params.push(Box::new(format!("%{}%", escape_like(&text.to_lowercase()))));
            }
        }

        query.push_str(" ORDER BY updated_at DESC, id DESC");

        let mut stmt = self.conn.prepare(&query)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let notes = stmt
            .query_map(params_refs.as_slice(), row_to_note)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// List every note for a user, optionally including soft-deleted ones.
    pub fn list_all_notes(&self, user_id: i64, include_deleted: bool) -> NoteResult<Vec<Note>> {
        let query = if include_deleted {
            format!(
                "SELECT {} FROM notes WHERE user_id = ? ORDER BY updated_at DESC, id DESC",
                NOTE_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM notes WHERE user_id = ? AND is_deleted = 0 \
                 ORDER BY updated_at DESC, id DESC",
                NOTE_COLUMNS
            )
        };
        let mut stmt = self.conn.prepare(&query)?;
        let notes = stmt
            .query_map([user_id], row_to_note)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// Get a live note by id, scoped to its owner.
    ///
    /// Returns `None` for deleted notes and for notes owned by someone else.
    pub fn get_note(&self, note_id: i64, user_id: i64) -> NoteResult<Option<Note>> {
        let note = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM notes WHERE id = ? AND user_id = ? AND is_deleted = 0",
                    NOTE_COLUMNS
                ),
                params![note_id, user_id],
                row_to_note,
            )
            .optional()?;
        Ok(note)
    }

    /// Get a note by id and owner, including soft-deleted notes.
    pub fn get_note_any(&self, note_id: i64, user_id: i64) -> NoteResult<Option<Note>> {
        let note = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM notes WHERE id = ? AND user_id = ?",
                    NOTE_COLUMNS
                ),
                params![note_id, user_id],
                row_to_note,
            )
            .optional()?;
        Ok(note)
    }

    /// Get a note by id regardless of owner or deleted state (for sync).
    pub fn get_note_raw(&self, note_id: i64) -> NoteResult<Option<Note>> {
        fetch_note(&self.conn, note_id)
    }

    /// Find the local note mirroring a remote record, including deleted notes.
    pub fn get_note_by_remote_id(&self, user_id: i64, remote_id: i64) -> NoteResult<Option<Note>> {
        let note = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM notes WHERE user_id = ? AND remote_id = ?",
                    NOTE_COLUMNS
                ),
                params![user_id, remote_id],
                row_to_note,
            )
            .optional()?;
        Ok(note)
    }

    /// Update a live note. Fields that are `None` are left unchanged.
    ///
    /// Returns `None` if the note does not exist for this owner or is deleted.
    pub fn update_note(
        &self,
        note_id: i64,
        user_id: i64,
        update: &NoteUpdate,
    ) -> NoteResult<Option<Note>> {
        let tags = Self::validate_update(update)?;

        if apply_update(&self.conn, note_id, user_id, update, tags)? == 0 {
            return Ok(None);
        }
        fetch_note(&self.conn, note_id)
    }

    /// Update a live note only if it is still at `expected_version`.
    ///
    /// A stale version fails with `NoteError::Conflict` carrying the current
    /// record, and nothing is written.
    pub fn update_note_checked(
        &self,
        note_id: i64,
        user_id: i64,
        expected_version: i64,
        update: &NoteUpdate,
    ) -> NoteResult<Option<Note>> {
        let tags = Self::validate_update(update)?;

        let tx = self.conn.unchecked_transaction()?;
        let current = match self.get_note(note_id, user_id)? {
            Some(note) => note,
            None => return Ok(None),
        };
        if current.version != expected_version {
            return Err(NoteError::Conflict {
                current: Box::new(current),
            });
        }

        apply_update(&tx, note_id, user_id, update, tags)?;
        let note = fetch_written(&tx, note_id)?;
        tx.commit()?;
        Ok(Some(note))
    }

    fn validate_update(update: &NoteUpdate) -> NoteResult<Option<String>> {
        if let Some(title) = &update.title {
            validate_title(title)?;
        }
        if let Some(content) = &update.content {
            validate_note_content(content)?;
        }
        update
            .tags
            .as_ref()
            .map(|tags| normalize_tags(tags).map(|t| join_tags(&t)))
            .transpose()
    }

    /// Soft-delete a note.
    ///
    /// Returns false if no live note matches (id, owner). Deleting an
    /// already deleted note is a no-op and also returns false.
    pub fn delete_note(&self, note_id: i64, user_id: i64) -> NoteResult<bool> {
        let deleted = self.conn.execute(
            &format!(
                "UPDATE notes SET is_deleted = 1, {} \
                 WHERE id = ?2 AND user_id = ?3 AND is_deleted = 0",
                TOUCH
            ),
            params![now_micros(), note_id, user_id],
        )?;
        Ok(deleted > 0)
    }

    /// Notes (deleted included) whose latest change the remote has not
    /// acknowledged, oldest change first.
    pub fn list_unsynced(&self, user_id: i64) -> NoteResult<Vec<Note>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM notes
            WHERE user_id = ? AND (synced_at IS NULL OR updated_at > synced_at)
            ORDER BY updated_at ASC, id ASC
            "#,
            NOTE_COLUMNS
        ))?;
        let notes = stmt
            .query_map([user_id], row_to_note)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// Mark a note as synced now. Does nothing if the note does not exist.
    pub fn mark_synced(&self, note_id: i64) -> NoteResult<()> {
        self.conn.execute(
            "UPDATE notes SET synced_at = MAX(?, updated_at) WHERE id = ?",
            params![now_micros(), note_id],
        )?;
        Ok(())
    }

    /// Record that the remote accepted the note at `expected_version`.
    ///
    /// Binds `remote_id` when given, whatever the current version, since the
    /// remote now holds the record under that id. Returns false (and leaves
    /// the note unsynced) if the note changed since it was sent.
    pub fn mark_pushed(
        &self,
        note_id: i64,
        expected_version: i64,
        remote_id: Option<i64>,
    ) -> NoteResult<bool> {
        let tx = self.conn.unchecked_transaction()?;
        if remote_id.is_some() {
            tx.execute(
                "UPDATE notes SET remote_id = ? WHERE id = ?",
                params![remote_id, note_id],
            )?;
        }
        let changed = tx.execute(
            "UPDATE notes SET synced_at = MAX(?, updated_at) WHERE id = ? AND version = ?",
            params![now_micros(), note_id, expected_version],
        )?;
        tx.commit()?;
        Ok(changed > 0)
    }

    /// Replace a note's fields with the remote record and mark it synced.
    ///
    /// Returns false if the note changed since `expected_version` was read.
    pub fn adopt_remote(
        &self,
        note_id: i64,
        expected_version: i64,
        remote: &WireNote,
    ) -> NoteResult<bool> {
        adopt_on(&self.conn, note_id, expected_version, remote)
    }

    /// Preserve a concurrent local edit as a conflict copy, then adopt the
    /// remote record into the original note. Both happen in one transaction.
    ///
    /// Returns the new copy, or `None` if the note changed since
    /// `expected_version` was read (nothing is written in that case).
    pub fn fork_conflict(
        &self,
        note_id: i64,
        expected_version: i64,
        remote: &WireNote,
    ) -> NoteResult<Option<Note>> {
        let tx = self.conn.unchecked_transaction()?;

        let local = match fetch_note(&tx, note_id)? {
            Some(note) if note.version == expected_version => note,
            _ => return Ok(None),
        };

        let now = now_micros();
        let copy_id = insert_note(
            &tx,
            local.user_id,
            None,
            &conflict_copy_title(&local.title),
            &local.content,
            &join_tags(&local.tags),
            now,
            now,
            None,
            1,
            false,
        )?;

        if !adopt_on(&tx, note_id, expected_version, remote)? {
            return Ok(None);
        }

        let copy = fetch_written(&tx, copy_id)?;
        tx.commit()?;
        Ok(Some(copy))
    }

    /// Store a record received from the other side as a new, synced note.
    ///
    /// Keeps the record's version, timestamps and deleted flag. The owner is
    /// always `user_id`, whatever the record claims.
    pub fn insert_replica(
        &self,
        user_id: i64,
        remote: &WireNote,
        remote_id: Option<i64>,
    ) -> NoteResult<Note> {
        let updated_at = remote.updated_at.timestamp_micros();
        let note_id = insert_note(
            &self.conn,
            user_id,
            remote_id,
            &remote.title,
            &remote.content,
            &join_foreign_tags(&remote.tags),
            remote.created_at.timestamp_micros(),
            updated_at,
            Some(now_micros().max(updated_at)),
            remote.version.max(1),
            remote.is_deleted,
        )?;
        fetch_written(&self.conn, note_id)
    }

    /// Authoritatively overwrite a note (deleted or not) with an incoming
    /// record, taking its version. Used by the server side.
    pub fn overwrite_from_wire(
        &self,
        note_id: i64,
        user_id: i64,
        incoming: &WireNote,
    ) -> NoteResult<Option<Note>> {
        validate_title(&incoming.title)?;
        validate_note_content(&incoming.content)?;
        let tags = normalize_tags(&incoming.tags)?;

        let now = now_micros();
        let changed = self.conn.execute(
            r#"
            UPDATE notes
            SET title = ?1, content = ?2, tags = ?3, version = ?4, is_deleted = ?5,
                updated_at = ?6, synced_at = ?6
            WHERE id = ?7 AND user_id = ?8
            "#,
            params![
                incoming.title,
                incoming.content,
                join_tags(&tags),
                incoming.version,
                incoming.is_deleted,
                now,
                note_id,
                user_id
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        fetch_note(&self.conn, note_id)
    }

    /// Close the database connection
    pub fn close(self) -> NoteResult<()> {
        self.conn
            .close()
            .map_err(|(_, e)| NoteError::Database(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflicts::CONFLICT_COPY_SUFFIX;
    use crate::validation::MAX_TITLE_LENGTH;
    use chrono::TimeZone;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn wire(id: Option<i64>, title: &str, content: &str, version: i64) -> WireNote {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        WireNote {
            id,
            user_id: 1,
            title: title.to_string(),
            content: content.to_string(),
            tags: tags(&["remote"]),
            created_at: ts,
            updated_at: ts,
            version,
            is_deleted: false,
        }
    }

    #[test]
    fn test_create_and_get_note() {
        let db = Database::new_in_memory().unwrap();
        let note = db.create_note(1, "T", "C", &tags(&["a", "b"])).unwrap();

        let fetched = db.get_note(note.id, 1).unwrap().unwrap();
        assert_eq!(fetched.title, "T");
        assert_eq!(fetched.content, "C");
        assert_eq!(fetched.tags, tags(&["a", "b"]));
        assert_eq!(fetched.version, 1);
        assert!(fetched.synced_at.is_none());
        assert!(fetched.remote_id.is_none());
        assert!(!fetched.is_deleted);
    }

    #[test]
    fn test_create_rejects_empty_fields() {
        let db = Database::new_in_memory().unwrap();
        let err = db.create_note(1, "", "content", &[]).unwrap_err();
        assert!(matches!(err, NoteError::Validation { ref field, .. } if field == "title"));
        let err = db.create_note(1, "title", "  ", &[]).unwrap_err();
        assert!(matches!(err, NoteError::Validation { ref field, .. } if field == "content"));

        assert!(db.list_all_notes(1, true).unwrap().is_empty());
    }

    #[test]
    fn test_get_is_owner_scoped() {
        let db = Database::new_in_memory().unwrap();
        let note = db.create_note(1, "Mine", "secret", &[]).unwrap();

        assert!(db.get_note(note.id, 2).unwrap().is_none());
        assert!(db.update_note(note.id, 2, &NoteUpdate::default().title("x")).unwrap().is_none());
        assert!(!db.delete_note(note.id, 2).unwrap());

        // Owner's note untouched by the cross-owner attempts
        let note = db.get_note(note.id, 1).unwrap().unwrap();
        assert_eq!(note.title, "Mine");
        assert_eq!(note.version, 1);
    }

    #[test]
    fn test_update_bumps_version_and_keeps_absent_fields() {
        let db = Database::new_in_memory().unwrap();
        let note = db.create_note(1, "Title", "Body", &tags(&["x"])).unwrap();

        let updated = db
            .update_note(note.id, 1, &NoteUpdate::default().content("New body"))
            .unwrap()
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.title, "Title");
        assert_eq!(updated.content, "New body");
        assert_eq!(updated.tags, tags(&["x"]));
        assert!(updated.updated_at >= note.updated_at);

        let updated = db
            .update_note(note.id, 1, &NoteUpdate::default().tags(vec![]))
            .unwrap()
            .unwrap();
        assert_eq!(updated.version, 3);
        assert!(updated.tags.is_empty());
    }

    #[test]
    fn test_update_validation_happens_before_write() {
        let db = Database::new_in_memory().unwrap();
        let note = db.create_note(1, "Title", "Body", &[]).unwrap();

        assert!(db
            .update_note(note.id, 1, &NoteUpdate::default().title(""))
            .is_err());
        assert_eq!(db.get_note(note.id, 1).unwrap().unwrap().version, 1);
    }

    #[test]
    fn test_update_deleted_note_returns_none() {
        let db = Database::new_in_memory().unwrap();
        let note = db.create_note(1, "Title", "Body", &[]).unwrap();
        assert!(db.delete_note(note.id, 1).unwrap());
        assert!(db
            .update_note(note.id, 1, &NoteUpdate::default().title("x"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_update_checked_conflict() {
        let db = Database::new_in_memory().unwrap();
        let note = db.create_note(1, "Title", "Body", &[]).unwrap();
        db.update_note(note.id, 1, &NoteUpdate::default().content("v2"))
            .unwrap();

        let err = db
            .update_note_checked(note.id, 1, 1, &NoteUpdate::default().content("stale"))
            .unwrap_err();
        match err {
            NoteError::Conflict { current } => {
                assert_eq!(current.version, 2);
                assert_eq!(current.content, "v2");
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(db.get_note(note.id, 1).unwrap().unwrap().content, "v2");

        let ok = db
            .update_note_checked(note.id, 1, 2, &NoteUpdate::default().content("fresh"))
            .unwrap()
            .unwrap();
        assert_eq!(ok.version, 3);
        assert_eq!(ok.content, "fresh");
    }

    #[test]
    fn test_delete_is_soft_and_bumps_version() {
        let db = Database::new_in_memory().unwrap();
        let note = db.create_note(1, "Title", "Body", &[]).unwrap();

        assert!(db.delete_note(note.id, 1).unwrap());
        assert!(db.get_note(note.id, 1).unwrap().is_none());
        assert!(db.list_notes(1, None).unwrap().is_empty());

        let raw = db.get_note_raw(note.id).unwrap().unwrap();
        assert!(raw.is_deleted);
        assert_eq!(raw.version, 2);

        // Deleting again reports false and leaves the version alone
        assert!(!db.delete_note(note.id, 1).unwrap());
        assert_eq!(db.get_note_raw(note.id).unwrap().unwrap().version, 2);

        assert!(!db.delete_note(9999, 1).unwrap());
    }

    #[test]
    fn test_list_orders_by_updated_desc() {
        let db = Database::new_in_memory().unwrap();
        let first = db.create_note(1, "First", "a", &[]).unwrap();
        let second = db.create_note(1, "Second", "b", &[]).unwrap();
        db.create_note(2, "Other owner", "c", &[]).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(2));
        db.update_note(first.id, 1, &NoteUpdate::default().content("touched"))
            .unwrap();

        let notes = db.list_notes(1, None).unwrap();
        let ids: Vec<i64> = notes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_search_is_case_insensitive_across_fields() {
        let db = Database::new_in_memory().unwrap();
        let grocery = db.create_note(1, "Grocery List", "milk", &[]).unwrap();
        let recipe = db
            .create_note(1, "Pancakes", "Needs MILK and eggs", &tags(&["breakfast"]))
            .unwrap();
        let tagged = db
            .create_note(1, "Weekend", "hike", &tags(&["Outdoors"]))
            .unwrap();

        let results = db.list_notes(1, Some("grocery")).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, grocery.id);

        let results = db.list_notes(1, Some("milk")).unwrap();
        let ids: Vec<i64> = results.iter().map(|n| n.id).collect();
        assert!(ids.contains(&grocery.id));
        assert!(ids.contains(&recipe.id));

        let results = db.list_notes(1, Some("outdoor")).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, tagged.id);

        // Blank search means no filter
        assert_eq!(db.list_notes(1, Some("  ")).unwrap().len(), 3);
    }

    #[test]
    fn test_search_wildcards_are_literal() {
        let db = Database::new_in_memory().unwrap();
        db.create_note(1, "Discount", "50% off", &[]).unwrap();
        db.create_note(1, "Plain", "nothing here", &[]).unwrap();

        let results = db.list_notes(1, Some("%")).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Discount");
        assert!(db.list_notes(1, Some("_")).unwrap().is_empty());
    }

    #[test]
    fn test_unsynced_lifecycle() {
        let db = Database::new_in_memory().unwrap();
        let note = db.create_note(1, "T", "C", &[]).unwrap();

        let unsynced = db.list_unsynced(1).unwrap();
        assert!(unsynced.iter().any(|n| n.id == note.id));

        db.mark_synced(note.id).unwrap();
        assert!(db.list_unsynced(1).unwrap().is_empty());
        assert!(!db.get_note(note.id, 1).unwrap().unwrap().is_unsynced());

        // An edit right after syncing is unsynced again, however fast
        db.update_note(note.id, 1, &NoteUpdate::default().content("C2"))
            .unwrap();
        assert_eq!(db.list_unsynced(1).unwrap().len(), 1);

        db.mark_synced(note.id).unwrap();
        db.delete_note(note.id, 1).unwrap();
        let unsynced = db.list_unsynced(1).unwrap();
        assert_eq!(unsynced.len(), 1);
        assert!(unsynced[0].is_deleted);
    }

    #[test]
    fn test_mark_synced_missing_is_noop() {
        let db = Database::new_in_memory().unwrap();
        assert!(db.mark_synced(12345).is_ok());
    }

    #[test]
    fn test_mark_pushed_requires_unchanged_version() {
        let db = Database::new_in_memory().unwrap();
        let note = db.create_note(1, "T", "C", &[]).unwrap();

        // Edited while the push was in flight
        db.update_note(note.id, 1, &NoteUpdate::default().content("newer"))
            .unwrap();
        assert!(!db.mark_pushed(note.id, 1, Some(77)).unwrap());
        let current = db.get_note(note.id, 1).unwrap().unwrap();
        assert!(current.is_unsynced());
        assert_eq!(current.remote_id, Some(77));

        assert!(db.mark_pushed(note.id, 2, Some(77)).unwrap());
        let current = db.get_note(note.id, 1).unwrap().unwrap();
        assert!(!current.is_unsynced());
        assert_eq!(current.remote_id, Some(77));
        assert_eq!(
            db.get_note_by_remote_id(1, 77).unwrap().map(|n| n.id),
            Some(note.id)
        );
    }

    #[test]
    fn test_adopt_remote_overwrites_and_marks_synced() {
        let db = Database::new_in_memory().unwrap();
        let note = db.create_note(1, "Local", "local body", &[]).unwrap();

        let remote = wire(Some(9), "Remote", "remote body", 5);
        assert!(db.adopt_remote(note.id, 1, &remote).unwrap());

        let adopted = db.get_note(note.id, 1).unwrap().unwrap();
        assert_eq!(adopted.title, "Remote");
        assert_eq!(adopted.content, "remote body");
        assert_eq!(adopted.tags, tags(&["remote"]));
        assert_eq!(adopted.version, 5);
        assert_eq!(adopted.remote_id, Some(9));
        assert!(!adopted.is_unsynced());

        // Stale expected version is refused
        assert!(!db.adopt_remote(note.id, 1, &remote).unwrap());
    }

    #[test]
    fn test_fork_conflict_creates_copy_and_adopts_remote() {
        let db = Database::new_in_memory().unwrap();
        let note = db.create_note(1, "X", "A", &tags(&["mine"])).unwrap();
        db.mark_pushed(note.id, 1, Some(4)).unwrap();
        let note = db
            .update_note(note.id, 1, &NoteUpdate::default().content("A"))
            .unwrap()
            .unwrap();

        let remote = wire(Some(4), "X", "B", note.version);
        let copy = db.fork_conflict(note.id, note.version, &remote).unwrap().unwrap();

        assert_eq!(copy.title, "X (Conflict Copy)");
        assert_eq!(copy.content, "A");
        assert_eq!(copy.tags, tags(&["mine"]));
        assert_eq!(copy.version, 1);
        assert!(copy.remote_id.is_none());
        assert!(copy.is_unsynced());

        let original = db.get_note(note.id, 1).unwrap().unwrap();
        assert_eq!(original.content, "B");
        assert_eq!(original.remote_id, Some(4));
        assert!(!original.is_unsynced());

        assert_eq!(db.list_notes(1, None).unwrap().len(), 2);
    }

    #[test]
    fn test_fork_conflict_with_longest_title_is_valid() {
        let db = Database::new_in_memory().unwrap();
        let title = "x".repeat(MAX_TITLE_LENGTH);
        let note = db.create_note(1, &title, "A", &[]).unwrap();
        let remote = wire(Some(4), &title, "B", note.version);

        let copy = db.fork_conflict(note.id, note.version, &remote).unwrap().unwrap();
        assert!(validate_title(&copy.title).is_ok());
        assert!(copy.title.ends_with(CONFLICT_COPY_SUFFIX));

        // The copy can be saved again with its own title
        let saved = db
            .update_note(copy.id, 1, &NoteUpdate::default().title(copy.title.clone()))
            .unwrap();
        assert!(saved.is_some());
    }

    #[test]
    fn test_fork_conflict_stale_version_writes_nothing() {
        let db = Database::new_in_memory().unwrap();
        let note = db.create_note(1, "X", "A", &[]).unwrap();
        let remote = wire(Some(4), "X", "B", 1);

        assert!(db.fork_conflict(note.id, 7, &remote).unwrap().is_none());
        assert_eq!(db.list_all_notes(1, true).unwrap().len(), 1);
        assert_eq!(db.get_note(note.id, 1).unwrap().unwrap().content, "A");
    }

    #[test]
    fn test_insert_replica_is_synced_and_owner_scoped() {
        let db = Database::new_in_memory().unwrap();
        let mut remote = wire(Some(11), "Pulled", "from server", 3);
        remote.user_id = 99;
        remote.tags = vec!["a,b".to_string(), "a".to_string()];

        let note = db.insert_replica(1, &remote, remote.id).unwrap();
        assert_eq!(note.user_id, 1);
        assert_eq!(note.remote_id, Some(11));
        assert_eq!(note.version, 3);
        assert_eq!(note.tags, tags(&["a", "b"]));
        assert!(!note.is_unsynced());
        assert!(db.list_unsynced(1).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_remote_id_is_rejected() {
        let db = Database::new_in_memory().unwrap();
        let remote = wire(Some(11), "Pulled", "from server", 1);
        db.insert_replica(1, &remote, remote.id).unwrap();

        let err = db.insert_replica(1, &remote, remote.id).unwrap_err();
        assert!(err.is_store_error());
        // Another owner may hold the same remote id
        assert!(db.insert_replica(2, &remote, remote.id).is_ok());
    }

    #[test]
    fn test_overwrite_from_wire_takes_incoming_version() {
        let db = Database::new_in_memory().unwrap();
        let note = db.create_note(1, "Old", "old", &[]).unwrap();
        db.delete_note(note.id, 1).unwrap();

        let mut incoming = wire(Some(note.id), "New", "new", 6);
        incoming.is_deleted = false;
        let stored = db.overwrite_from_wire(note.id, 1, &incoming).unwrap().unwrap();
        assert_eq!(stored.version, 6);
        assert_eq!(stored.title, "New");
        assert!(!stored.is_deleted);

        assert!(db.overwrite_from_wire(note.id, 2, &incoming).unwrap().is_none());
    }

    #[test]
    fn test_file_database_persists() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.db");

        let id = {
            let db = Database::new(&path).unwrap();
            db.create_note(1, "Persisted", "body", &[]).unwrap().id
        };

        let db = Database::new(&path).unwrap();
        assert_eq!(db.get_note(id, 1).unwrap().unwrap().title, "Persisted");
    }
}
