//! Input validation for NoteCore.
//!
//! This module provides validation functions for all user inputs.
//! All validators return NoteError::Validation on failure.

use crate::error::{NoteError, NoteResult};

pub const MAX_TITLE_LENGTH: usize = 200;
pub const MAX_NOTE_CONTENT_LENGTH: usize = 100_000; // 100KB of text
pub const MAX_TAG_NAME_LENGTH: usize = 100;
/// Limit on the comma-joined tag column
pub const MAX_TAGS_LENGTH: usize = 500;
pub const MAX_SEARCH_QUERY_LENGTH: usize = 500;

/// Separator used to store tags in a single column
pub const TAG_SEPARATOR: char = ',';

/// Validate a note title.
///
/// Titles must be non-empty after stripping whitespace and no longer than
/// MAX_TITLE_LENGTH characters.
pub fn validate_title(title: &str) -> NoteResult<()> {
    if title.trim().is_empty() {
        return Err(NoteError::validation(
            "title",
            "cannot be empty or whitespace only",
        ));
    }

    let len = title.chars().count();
    if len > MAX_TITLE_LENGTH {
        return Err(NoteError::validation(
            "title",
            format!("cannot exceed {} characters (got {})", MAX_TITLE_LENGTH, len),
        ));
    }

    Ok(())
}

/// Validate note content.
///
/// Note content must be:
/// - Non-empty after stripping whitespace
/// - No longer than MAX_NOTE_CONTENT_LENGTH bytes
pub fn validate_note_content(content: &str) -> NoteResult<()> {
    if content.trim().is_empty() {
        return Err(NoteError::validation(
            "content",
            "cannot be empty or whitespace only",
        ));
    }

    if content.len() > MAX_NOTE_CONTENT_LENGTH {
        return Err(NoteError::validation(
            "content",
            format!(
                "cannot exceed {} characters (got {})",
                MAX_NOTE_CONTENT_LENGTH,
                content.len()
            ),
        ));
    }

    Ok(())
}

/// Validate a single tag name.
///
/// A tag must:
/// - Be non-empty after stripping whitespace
/// - Not contain the storage separator (,)
/// - Be no longer than MAX_TAG_NAME_LENGTH characters
pub fn validate_tag_name(name: &str) -> NoteResult<()> {
    let stripped = name.trim();

    if stripped.is_empty() {
        return Err(NoteError::validation(
            "tags",
            "tag cannot be empty or whitespace only",
        ));
    }

    if stripped.contains(TAG_SEPARATOR) {
        return Err(NoteError::validation(
            "tags",
            format!("tag '{}' cannot contain '{}'", stripped, TAG_SEPARATOR),
        ));
    }

    if stripped.chars().count() > MAX_TAG_NAME_LENGTH {
        return Err(NoteError::validation(
            "tags",
            format!("tag cannot exceed {} characters", MAX_TAG_NAME_LENGTH),
        ));
    }

    Ok(())
}

/// Validate and normalize a tag list.
///
/// Tags are a set: names are trimmed, duplicates dropped (first occurrence
/// wins), and the joined form must fit MAX_TAGS_LENGTH.
pub fn normalize_tags(tags: &[String]) -> NoteResult<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        validate_tag_name(tag)?;
        let tag = tag.trim();
        if !normalized.iter().any(|t| t == tag) {
            normalized.push(tag.to_string());
        }
    }

    let joined_len: usize = normalized.iter().map(|t| t.len()).sum::<usize>()
        + normalized.len().saturating_sub(1);
    if joined_len > MAX_TAGS_LENGTH {
        return Err(NoteError::validation(
            "tags",
            format!("combined tags cannot exceed {} characters", MAX_TAGS_LENGTH),
        ));
    }

    Ok(normalized)
}

/// Validate a search query.
///
/// Search queries can be None/empty (meaning no text filter).
/// If provided, must not exceed MAX_SEARCH_QUERY_LENGTH.
pub fn validate_search_query(query: Option<&str>) -> NoteResult<()> {
    if let Some(q) = query {
        if q.len() > MAX_SEARCH_QUERY_LENGTH {
            return Err(NoteError::validation(
                "search_query",
                format!(
                    "cannot exceed {} characters (got {})",
                    MAX_SEARCH_QUERY_LENGTH,
                    q.len()
                ),
            ));
        }
    }
    Ok(())
}

/// Validate a sync server URL.
pub fn validate_server_url(url: &str) -> NoteResult<()> {
    let url = url.trim();
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| {
            NoteError::validation("server_url", "must start with http:// or https://")
        })?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(NoteError::validation("server_url", "missing host"));
    }
    Ok(())
}
