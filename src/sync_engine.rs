//! Background synchronization with the sync server.
//!
//! A `SyncEngine` owns the sync loop for one owner. Each tick it probes the
//! server; while the server is reachable it runs a sync cycle:
//! 1. Push every unsynced local note (create or overwrite on the server)
//! 2. Resolve conflicts reported by the server
//! 3. Pull server notes this device has not seen, and newer versions of notes
//!    it has already synced
//!
//! Failures are isolated per note: a note that fails to push stays unsynced
//! and is retried next cycle.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::conflicts::{resolve, Resolution};
use crate::connectivity::probe;
use crate::database::Database;
use crate::error::{NoteError, NoteResult};
use crate::models::{Note, WireNote};
use crate::sync_client::{PushOutcome, RemoteClient};
use crate::validation::validate_server_url;

/// Default time between sync ticks
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
/// Default reachability probe timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default timeout for each sync request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on waiting for the loop to stop
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for a sync engine.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Base URL of the sync server (e.g. `http://localhost:5000/api`)
    pub server_url: String,
    /// Time between ticks
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl SyncSettings {
    /// Settings for `server_url` with default timings.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            interval: DEFAULT_SYNC_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Identity the engine syncs as.
#[derive(Clone)]
pub struct Credential {
    pub owner_id: i64,
    /// Bearer token sent with every request
    pub token: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("owner_id", &self.owner_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Whether the sync server was reachable at the last probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Offline,
    Online,
}

impl ConnectivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityState::Offline => "offline",
            ConnectivityState::Online => "online",
        }
    }
}

/// Result of a sync cycle
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub success: bool,
    /// Notes the server accepted
    pub pushed: i64,
    /// Server notes stored or adopted locally
    pub pulled: i64,
    /// Conflict responses received
    pub conflicts: i64,
    /// Conflict copies created
    pub forks: i64,
    pub errors: Vec<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncResult {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![error.into()],
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }
}

/// Snapshot of the engine's state
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub state: ConnectivityState,
    /// True while the background loop is alive
    pub running: bool,
    pub last_result: Option<SyncResult>,
}

/// Offline-first sync engine for one owner.
///
/// Share it as `Arc<SyncEngine>`; `start` needs the `Arc` to hand a clone to
/// the background task.
pub struct SyncEngine {
    db: Arc<Mutex<Database>>,
    settings: SyncSettings,
    remote: RemoteClient,
    credential: OnceLock<Credential>,
    state: Mutex<ConnectivityState>,
    last_result: Mutex<Option<SyncResult>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
    /// Serializes cycles between the loop and `sync_now`
    cycle_lock: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    /// Create an engine. The server URL and interval are validated here;
    /// nothing is contacted until `start` or `sync_now`.
    pub fn new(db: Arc<Mutex<Database>>, settings: SyncSettings) -> NoteResult<Self> {
        validate_server_url(&settings.server_url)?;
        if settings.interval.is_zero() {
            return Err(NoteError::validation("interval", "must be greater than zero"));
        }
        let remote = RemoteClient::new(&settings.server_url, settings.request_timeout)?;
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            db,
            settings,
            remote,
            credential: OnceLock::new(),
            state: Mutex::new(ConnectivityState::Offline),
            last_result: Mutex::new(None),
            worker: Mutex::new(None),
            stop_tx,
            cycle_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Set the identity to sync as. Can only be set once.
    pub fn set_credential(&self, credential: Credential) -> NoteResult<()> {
        let owner_id = credential.owner_id;
        self.credential
            .set(credential)
            .map_err(|_| NoteError::Other("Sync credential is already set".to_string()))?;
        tracing::debug!("Sync credential set for owner {}", owner_id);
        Ok(())
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.get()
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            state: self.state(),
            running: self.is_running(),
            last_result: self
                .last_result
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Start the background loop on the current tokio runtime.
    ///
    /// Returns false if the loop is already running.
    pub fn start(self: &Arc<Self>) -> NoteResult<bool> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| NoteError::Other(format!("No tokio runtime to start sync on: {}", e)))?;

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!("Sync loop already running");
            return Ok(false);
        }

        self.stop_tx.send_replace(false);
        let stop_rx = self.stop_tx.subscribe();
        let engine = Arc::clone(self);
        *worker = Some(runtime.spawn(engine.run_loop(stop_rx)));

        tracing::info!(
            "Sync started against {} (every {:?})",
            self.remote.base_url(),
            self.settings.interval
        );
        Ok(true)
    }

    /// Stop the background loop.
    ///
    /// Waits for the current iteration up to the shutdown timeout, then
    /// aborts it. Notes that were not acknowledged stay unsynced.
    pub async fn stop(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut handle) = handle else {
            return;
        };

        self.stop_tx.send_replace(true);
        match tokio::time::timeout(self.settings.shutdown_timeout, &mut handle).await {
            Ok(_) => tracing::info!("Sync stopped"),
            Err(_) => {
                tracing::warn!(
                    "Sync loop did not stop within {:?}, aborting",
                    self.settings.shutdown_timeout
                );
                handle.abort();
            }
        }
    }

    /// Probe the server and run one cycle if it is reachable.
    pub async fn sync_now(&self) -> SyncResult {
        if !self.check_connectivity().await {
            return SyncResult::failure("Sync server unreachable");
        }
        self.run_cycle().await
    }

    async fn run_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        tracing::debug!("Sync loop running");

        while !*stop_rx.borrow() {
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Sync loop exited");
    }

    async fn tick(&self) {
        let was_online = self.state() == ConnectivityState::Online;
        if !self.check_connectivity().await {
            return;
        }
        if !was_online {
            // Catch up right away after an offline period
            self.run_cycle().await;
        }
        self.run_cycle().await;
    }

    /// Probe the server and record the transition. Returns true if online.
    async fn check_connectivity(&self) -> bool {
        let online = probe(
            self.remote.http(),
            self.remote.base_url(),
            self.settings.probe_timeout,
        )
        .await;
        let next = if online {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        };

        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, next)
        };
        if previous != next {
            tracing::info!("Sync server is now {}", next.as_str());
        }
        online
    }

    fn stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> NoteResult<T>) -> NoteResult<T> {
        let db = self
            .db
            .lock()
            .map_err(|_| NoteError::database_op("Database lock poisoned"))?;
        f(&db)
    }

    /// Run one push/resolve/pull cycle without probing first.
    pub async fn run_cycle(&self) -> SyncResult {
        let _cycle = self.cycle_lock.lock().await;

        let Some(credential) = self.credential.get() else {
            tracing::debug!("No sync credential set, skipping cycle");
            return SyncResult::failure("No sync credential set");
        };

        let unsynced = match self.with_db(|db| db.list_unsynced(credential.owner_id)) {
            Ok(notes) => notes,
            Err(e) => {
                tracing::error!("Failed to read unsynced notes: {}", e);
                return self.finish(SyncResult::failure(format!(
                    "Failed to read unsynced notes: {}",
                    e
                )));
            }
        };

        tracing::debug!("Sync cycle: {} unsynced notes", unsynced.len());
        let mut result = SyncResult::success();

        for note in &unsynced {
            if self.stop_requested() {
                tracing::debug!("Stop requested, ending cycle early");
                break;
            }
            if let Err(e) = self.push_note(credential, note, &mut result).await {
                if e.is_store_error() {
                    tracing::error!("Store failure while syncing note {}: {}", note.id, e);
                } else {
                    tracing::warn!("Failed to sync note {}: {}", note.id, e);
                }
                result.errors.push(format!("Note {}: {}", note.id, e));
            }
        }

        if !self.stop_requested() {
            if let Err(e) = self.pull(credential, &mut result).await {
                tracing::warn!("Pull failed: {}", e);
                result.errors.push(format!("Pull failed: {}", e));
            }
        }

        result.success = result.errors.is_empty();
        tracing::debug!(
            "Sync cycle done: pushed={} pulled={} conflicts={} forks={} errors={}",
            result.pushed,
            result.pulled,
            result.conflicts,
            result.forks,
            result.errors.len()
        );
        self.finish(result)
    }

    fn finish(&self, mut result: SyncResult) -> SyncResult {
        result.finished_at = Some(Utc::now());
        *self
            .last_result
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
        result
    }

    async fn push_note(
        &self,
        credential: &Credential,
        note: &Note,
        result: &mut SyncResult,
    ) -> NoteResult<()> {
        let wire = note.to_wire();
        let outcome = match note.remote_id {
            None => self.remote.create_note(&credential.token, &wire).await?,
            Some(remote_id) => {
                self.remote
                    .update_note(&credential.token, remote_id, &wire)
                    .await?
            }
        };

        match outcome {
            PushOutcome::Accepted(stored) => {
                let remote_id = stored.and_then(|n| n.id);
                self.record_push(note, remote_id, result)
            }
            PushOutcome::Conflict(remote) => {
                result.conflicts += 1;
                self.resolve_conflict(credential, note, remote, result).await
            }
        }
    }

    fn record_push(
        &self,
        note: &Note,
        remote_id: Option<i64>,
        result: &mut SyncResult,
    ) -> NoteResult<()> {
        if self.with_db(|db| db.mark_pushed(note.id, note.version, remote_id))? {
            result.pushed += 1;
        } else {
            tracing::debug!("Note {} changed during push, leaving it unsynced", note.id);
        }
        Ok(())
    }

    async fn resolve_conflict(
        &self,
        credential: &Credential,
        note: &Note,
        remote: WireNote,
        result: &mut SyncResult,
    ) -> NoteResult<()> {
        let resolution = resolve(note, &remote);
        tracing::debug!(
            "Conflict on note {} (local v{}, remote v{}): {}",
            note.id,
            note.version,
            remote.version,
            resolution.as_str()
        );

        match resolution {
            Resolution::AdoptRemote => {
                if !self.with_db(|db| db.adopt_remote(note.id, note.version, &remote))? {
                    tracing::debug!("Note {} changed during sync, not adopting", note.id);
                }
            }
            Resolution::Fork => {
                match self.with_db(|db| db.fork_conflict(note.id, note.version, &remote))? {
                    Some(copy) => {
                        result.forks += 1;
                        tracing::info!(
                            "Kept conflicting edit of note {} as note {}",
                            note.id,
                            copy.id
                        );
                    }
                    None => {
                        tracing::debug!("Note {} changed during sync, not forking", note.id)
                    }
                }
            }
            Resolution::RepushLocal => {
                let remote_id = remote.id.or(note.remote_id).ok_or_else(|| {
                    NoteError::transport("Conflict response did not identify the note")
                })?;
                let mut wire = note.to_wire();
                wire.id = Some(remote_id);

                match self
                    .remote
                    .update_note(&credential.token, remote_id, &wire)
                    .await?
                {
                    PushOutcome::Accepted(stored) => {
                        let bound = stored.and_then(|n| n.id).or(Some(remote_id));
                        self.record_push(note, bound, result)?;
                    }
                    PushOutcome::Conflict(_) => {
                        tracing::warn!(
                            "Note {} conflicted again on re-push, retrying next cycle",
                            note.id
                        );
                    }
                }
            }
        }
        Ok(())
    }

    async fn pull(&self, credential: &Credential, result: &mut SyncResult) -> NoteResult<()> {
        let remote_notes = self.remote.list_notes(&credential.token).await?;
        let owner_id = credential.owner_id;

        for remote in &remote_notes {
            let Some(remote_id) = remote.id else {
                continue;
            };

            let applied = self.with_db(|db| match db.get_note_by_remote_id(owner_id, remote_id)? {
                None if remote.is_deleted => Ok(false),
                None => db.insert_replica(owner_id, remote, Some(remote_id)).map(|_| true),
                Some(local) if !local.is_unsynced() && remote.version > local.version => {
                    db.adopt_remote(local.id, local.version, remote)
                }
                Some(_) => Ok(false),
            });

            match applied {
                Ok(true) => result.pulled += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Failed to apply remote note {}: {}", remote_id, e);
                    result
                        .errors
                        .push(format!("Remote note {}: {}", remote_id, e));
                }
            }
        }
        Ok(())
    }
}
