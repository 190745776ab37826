//! NoteCore - offline-first notes with background sync.
//!
//! This library provides:
//! - Data models (Note, WireNote)
//! - Database operations (SQLite), scoped per owner
//! - Connectivity probing and a background sync engine
//! - Conflict resolution by version
//! - A sync server implementing the endpoints the engine talks to
//! - Configuration management
//!
//! # Feature Flags
//!
//! - `server`: Include the HTTP sync server (axum). Not needed by clients.
//! - `desktop`: Include desktop-specific features (config dir detection).

pub mod config;
pub mod conflicts;
pub mod connectivity;
pub mod database;
pub mod error;
pub mod models;
pub mod sync_client;
pub mod sync_engine;
#[cfg(feature = "server")]
pub mod sync_server;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use conflicts::Resolution;
pub use database::Database;
pub use error::{NoteError, NoteResult};
pub use models::{Note, NoteUpdate, WireNote};
pub use sync_engine::{ConnectivityState, Credential, SyncEngine, SyncResult, SyncSettings};
