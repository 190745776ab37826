//! Conflict resolution for NoteCore sync.
//!
//! When the remote refuses a push because its copy is at the same or a newer
//! version, the local and remote records are compared here:
//! - Remote strictly newer: the remote wins
//! - Local strictly newer: the local record is pushed again
//! - Same version, different contents: both edits are kept by forking the
//!   local one into a new "conflict copy" note

use std::collections::BTreeSet;

use crate::models::{Note, WireNote};
use crate::validation::MAX_TITLE_LENGTH;

/// Appended to the title of a forked conflict copy
pub const CONFLICT_COPY_SUFFIX: &str = " (Conflict Copy)";

/// Outcome of comparing a local record with the remote's current record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Overwrite the local record with the remote one and mark it synced
    AdoptRemote,
    /// Send the local record to the remote again
    RepushLocal,
    /// Keep the local edit as a new note, then adopt the remote record
    Fork,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::AdoptRemote => "adopt_remote",
            Resolution::RepushLocal => "repush_local",
            Resolution::Fork => "fork",
        }
    }
}

/// Decide how to reconcile `local` with the remote's current record.
///
/// Equal versions with identical contents are already converged, which is
/// reported as `AdoptRemote` so the local record simply becomes synced.
pub fn resolve(local: &Note, remote: &WireNote) -> Resolution {
    if remote.version > local.version {
        Resolution::AdoptRemote
    } else if local.version > remote.version {
        Resolution::RepushLocal
    } else if contents_differ(local, remote) {
        Resolution::Fork
    } else {
        Resolution::AdoptRemote
    }
}

/// True if the user-visible contents of the two records differ.
///
/// Tags compare as a set; timestamps and identifiers are ignored.
pub fn contents_differ(local: &Note, remote: &WireNote) -> bool {
    let local_tags: BTreeSet<&str> = local.tags.iter().map(|t| t.trim()).collect();
    let remote_tags: BTreeSet<&str> = remote.tags.iter().map(|t| t.trim()).collect();

    local.title != remote.title
        || local.content != remote.content
        || local.is_deleted != remote.is_deleted
        || local_tags != remote_tags
}

/// Title for the note holding the losing side of a same-version conflict.
///
/// The base title is cut on a character boundary so the result never
/// exceeds MAX_TITLE_LENGTH characters.
pub fn conflict_copy_title(title: &str) -> String {
    let room = MAX_TITLE_LENGTH - CONFLICT_COPY_SUFFIX.chars().count();
    let base = match title.char_indices().nth(room) {
        Some((cut, _)) => &title[..cut],
        None => title,
    };
    format!("{}{}", base, CONFLICT_COPY_SUFFIX)
}
