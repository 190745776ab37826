//! Sync server implementation using Axum.
//!
//! This is the remote side of sync, backed by the same note store:
//! - GET /health - Reachability probe
//! - GET /notes - List the caller's notes (`?search=`, `?include_deleted=true`)
//! - POST /notes - Create a note
//! - GET /notes/:id - Fetch one note
//! - PUT /notes/:id - Overwrite a note (409 with the current note if stale)
//! - DELETE /notes/:id - Soft delete a note
//!
//! Callers authenticate with `Authorization: Bearer <token>`; tokens map to
//! owner ids through a static table.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::conflicts::contents_differ;
use crate::database::Database;
use crate::error::{NoteError, NoteResult};
use crate::models::{ConflictBody, Note, WireNote};
use crate::validation::{normalize_tags, validate_note_content, validate_title};

/// Server shutdown handle for `start_server`
static SHUTDOWN_TX: Mutex<Option<oneshot::Sender<()>>> = Mutex::new(None);

/// Shared server state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Database>>,
    tokens: Arc<HashMap<String, i64>>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    search: Option<String>,
    #[serde(default)]
    include_deleted: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// An error answered with a status code and a JSON `{error}` body
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(note_id: i64) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("Note {} not found", note_id))
    }
}

impl From<NoteError> for ApiError {
    fn from(err: NoteError) -> Self {
        let status = match &err {
            NoteError::Validation { .. } => StatusCode::BAD_REQUEST,
            NoteError::Conflict { .. } => StatusCode::CONFLICT,
            _ => {
                tracing::error!("Request failed: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// The server's view of a note: its own id is the wire id.
fn served(note: &Note) -> WireNote {
    WireNote {
        id: Some(note.id),
        ..note.to_wire()
    }
}

fn lock_db(state: &AppState) -> ApiResult<MutexGuard<'_, Database>> {
    state
        .db
        .lock()
        .map_err(|_| ApiError::from(NoteError::database_op("Database lock poisoned")))
}

/// Resolve the bearer token to an owner id.
fn authenticate(state: &AppState, headers: &HeaderMap) -> ApiResult<i64> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Missing bearer token"))?;

    state
        .tokens
        .get(token)
        .copied()
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Unknown token"))
}

fn validate_incoming(note: &WireNote) -> NoteResult<()> {
    validate_title(&note.title)?;
    validate_note_content(&note.content)?;
    normalize_tags(&note.tags)?;
    if note.version < 1 {
        return Err(NoteError::validation("version", "must be at least 1"));
    }
    Ok(())
}

// Route handlers

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn list_notes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<WireNote>>> {
    let owner_id = authenticate(&state, &headers)?;
    tracing::debug!(
        "GET /notes owner={} search={:?} include_deleted={}",
        owner_id,
        query.search,
        query.include_deleted
    );

    let db = lock_db(&state)?;
    let notes = match query.search.as_deref() {
        Some(search) if !search.trim().is_empty() => db.list_notes(owner_id, Some(search))?,
        _ => db.list_all_notes(owner_id, query.include_deleted)?,
    };
    Ok(Json(notes.iter().map(served).collect()))
}

async fn create_note(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(incoming): Json<WireNote>,
) -> ApiResult<(StatusCode, Json<WireNote>)> {
    let owner_id = authenticate(&state, &headers)?;
    validate_incoming(&incoming)?;

    let note = lock_db(&state)?.insert_replica(owner_id, &incoming, None)?;
    tracing::debug!("POST /notes owner={} created note {}", owner_id, note.id);
    Ok((StatusCode::CREATED, Json(served(&note))))
}

async fn get_note(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(note_id): Path<i64>,
) -> ApiResult<Json<WireNote>> {
    let owner_id = authenticate(&state, &headers)?;

    let note = lock_db(&state)?
        .get_note(note_id, owner_id)?
        .ok_or_else(|| ApiError::not_found(note_id))?;
    Ok(Json(served(&note)))
}

async fn update_note(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(note_id): Path<i64>,
    Json(incoming): Json<WireNote>,
) -> ApiResult<Response> {
    let owner_id = authenticate(&state, &headers)?;
    validate_incoming(&incoming)?;

    let db = lock_db(&state)?;
    let current = db
        .get_note_any(note_id, owner_id)?
        .ok_or_else(|| ApiError::not_found(note_id))?;

    if incoming.version <= current.version {
        if contents_differ(&current, &incoming) {
            tracing::debug!(
                "PUT /notes/{} conflict: incoming v{} vs stored v{}",
                note_id,
                incoming.version,
                current.version
            );
            let body = ConflictBody {
                note: served(&current),
            };
            return Ok((StatusCode::CONFLICT, Json(body)).into_response());
        }
        // Already holds this content
        return Ok(Json(served(&current)).into_response());
    }

    let note = db
        .overwrite_from_wire(note_id, owner_id, &incoming)?
        .ok_or_else(|| ApiError::not_found(note_id))?;
    tracing::debug!("PUT /notes/{} stored v{}", note_id, note.version);
    Ok(Json(served(&note)).into_response())
}

async fn delete_note(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(note_id): Path<i64>,
) -> ApiResult<Json<WireNote>> {
    let owner_id = authenticate(&state, &headers)?;

    let db = lock_db(&state)?;
    if !db.delete_note(note_id, owner_id)? {
        return Err(ApiError::not_found(note_id));
    }
    let note = db
        .get_note_any(note_id, owner_id)?
        .ok_or_else(|| ApiError::not_found(note_id))?;
    tracing::debug!("DELETE /notes/{} now v{}", note_id, note.version);
    Ok(Json(served(&note)))
}

/// Create the sync server router
pub fn create_router(db: Arc<Mutex<Database>>, tokens: HashMap<String, i64>) -> Router {
    let state = AppState {
        db,
        tokens: Arc::new(tokens),
    };

    Router::new()
        .route("/health", get(health))
        .route("/notes", get(list_notes).post(create_note))
        .route(
            "/notes/:id",
            get(get_note).put(update_note).delete(delete_note),
        )
        .with_state(state)
}

async fn serve_until<F>(listener: TcpListener, router: Router, shutdown: F) -> NoteResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| NoteError::transport(e.to_string()))
}

/// A server running in the background
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<NoteResult<()>>,
}

impl ServerHandle {
    /// The address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for clients of this server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) -> NoteResult<()> {
        let _ = self.shutdown_tx.send(());
        self.task
            .await
            .map_err(|e| NoteError::Other(format!("Server task failed: {}", e)))?
    }
}

/// Bind `addr` and serve in a background task.
pub async fn spawn_server(
    db: Arc<Mutex<Database>>,
    tokens: HashMap<String, i64>,
    addr: SocketAddr,
) -> NoteResult<ServerHandle> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| NoteError::transport(e.to_string()))?;
    let addr = listener.local_addr()?;
    let router = create_router(db, tokens);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(serve_until(listener, router, async move {
        shutdown_rx.await.ok();
    }));

    tracing::info!("Sync server listening on {}", addr);
    Ok(ServerHandle {
        addr,
        shutdown_tx,
        task,
    })
}

/// Start the sync server on all interfaces and serve until `stop_server`.
pub async fn start_server(
    db: Arc<Mutex<Database>>,
    tokens: HashMap<String, i64>,
    port: u16,
) -> NoteResult<()> {
    let router = create_router(db, tokens);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let (tx, rx) = oneshot::channel::<()>();
    if let Ok(mut guard) = SHUTDOWN_TX.lock() {
        *guard = Some(tx);
    }

    tracing::info!("Starting sync server on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| NoteError::transport(e.to_string()))?;

    serve_until(listener, router, async move {
        rx.await.ok();
    })
    .await
}

/// Stop the server started by `start_server`
pub fn stop_server() {
    if let Ok(mut guard) = SHUTDOWN_TX.lock() {
        if let Some(tx) = guard.take() {
            let _ = tx.send(());
        }
    }
}
