//! HTTP client for the sync server.
//!
//! This module provides typed calls for the endpoints the sync engine uses:
//! - Listing the remote's notes (tombstones included)
//! - Creating a note the remote has never seen
//! - Overwriting a note the remote already has
//!
//! Every request carries the owner's bearer token.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};

use crate::error::{NoteError, NoteResult};
use crate::models::{ConflictBody, WireNote};

/// What the remote did with a pushed note
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored. Carries the remote's copy when the response had one.
    Accepted(Option<WireNote>),
    /// Refused because the remote holds a conflicting version.
    Conflict(WireNote),
}

/// Client for a single sync server
#[derive(Debug, Clone)]
pub struct RemoteClient {
    client: Client,
    base_url: String,
}

impl RemoteClient {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, request_timeout: Duration) -> NoteResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| NoteError::transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The underlying HTTP client (shared with the connectivity probe)
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Fetch every note the remote holds for the token's owner.
    pub async fn list_notes(&self, token: &str) -> NoteResult<Vec<WireNote>> {
        let response = self
            .authorized(
                self.client
                    .get(format!("{}/notes", self.base_url))
                    .query(&[("include_deleted", "true")]),
                token,
            )
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NoteError::transport(format!(
                "Listing notes failed with status {}",
                response.status()
            )));
        }

        response
            .json::<Vec<WireNote>>()
            .await
            .map_err(|e| NoteError::transport(format!("Failed to parse note list: {}", e)))
    }

    /// Create a note on the remote (`POST /notes`).
    pub async fn create_note(&self, token: &str, note: &WireNote) -> NoteResult<PushOutcome> {
        let response = self
            .authorized(
                self.client.post(format!("{}/notes", self.base_url)),
                token,
            )
            .json(note)
            .send()
            .await?;

        Self::push_outcome(response).await
    }

    /// Overwrite a note on the remote (`PUT /notes/{remote_id}`).
    pub async fn update_note(
        &self,
        token: &str,
        remote_id: i64,
        note: &WireNote,
    ) -> NoteResult<PushOutcome> {
        let response = self
            .authorized(
                self.client
                    .put(format!("{}/notes/{}", self.base_url, remote_id)),
                token,
            )
            .json(note)
            .send()
            .await?;

        Self::push_outcome(response).await
    }

    fn authorized(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        request.bearer_auth(token)
    }

    async fn push_outcome(response: Response) -> NoteResult<PushOutcome> {
        let status = response.status();

        if status == StatusCode::CONFLICT {
            let body: ConflictBody = response.json().await.map_err(|e| {
                NoteError::transport(format!("Failed to parse conflict response: {}", e))
            })?;
            return Ok(PushOutcome::Conflict(body.note));
        }

        if !status.is_success() {
            return Err(NoteError::transport(format!(
                "Push failed with status {}",
                status
            )));
        }

        // A body that is not a note is still an acceptance
        Ok(PushOutcome::Accepted(response.json::<WireNote>().await.ok()))
    }
}

#[cfg(all(test, feature = "server"))]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use chrono::{TimeZone, Utc};

    fn wire(id: Option<i64>, content: &str, version: i64) -> WireNote {
        let ts = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        WireNote {
            id,
            user_id: 1,
            title: "T".to_string(),
            content: content.to_string(),
            tags: vec![],
            created_at: ts,
            updated_at: ts,
            version,
            is_deleted: false,
        }
    }

    async fn serve(router: Router) -> RemoteClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        RemoteClient::new(&format!("http://{}/", addr), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_create_accepted_with_body() {
        let router = Router::new().route(
            "/notes",
            post(|headers: HeaderMap, Json(mut note): Json<WireNote>| async move {
                assert_eq!(headers["authorization"], "Bearer secret");
                note.id = Some(41);
                (AxumStatus::CREATED, Json(note))
            }),
        );
        let client = serve(router).await;

        let outcome = client.create_note("secret", &wire(None, "C", 1)).await.unwrap();
        match outcome {
            PushOutcome::Accepted(Some(note)) => assert_eq!(note.id, Some(41)),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_accepted_without_body() {
        let router = Router::new().route(
            "/notes/:id",
            put(|Path(id): Path<i64>| async move {
                assert_eq!(id, 7);
                AxumStatus::NO_CONTENT
            }),
        );
        let client = serve(router).await;

        let outcome = client.update_note("t", 7, &wire(Some(7), "C", 2)).await.unwrap();
        assert_eq!(outcome, PushOutcome::Accepted(None));
    }

    #[tokio::test]
    async fn test_conflict_carries_remote_note() {
        let router = Router::new().route(
            "/notes/:id",
            put(|| async {
                (
                    AxumStatus::CONFLICT,
                    Json(ConflictBody {
                        note: wire(Some(7), "remote", 5),
                    }),
                )
            }),
        );
        let client = serve(router).await;

        let outcome = client.update_note("t", 7, &wire(Some(7), "local", 3)).await.unwrap();
        match outcome {
            PushOutcome::Conflict(note) => {
                assert_eq!(note.version, 5);
                assert_eq!(note.content, "remote");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_transport_error() {
        let router = Router::new().route(
            "/notes",
            post(|| async { AxumStatus::INTERNAL_SERVER_ERROR }),
        );
        let client = serve(router).await;

        let err = client.create_note("t", &wire(None, "C", 1)).await.unwrap_err();
        assert!(matches!(err, NoteError::Transport(_)));
    }

    #[tokio::test]
    async fn test_list_requests_tombstones() {
        let router = Router::new().route(
            "/notes",
            get(
                |axum::extract::Query(q): axum::extract::Query<
                    std::collections::HashMap<String, String>,
                >| async move {
                    assert_eq!(q.get("include_deleted").map(String::as_str), Some("true"));
                    Json(vec![wire(Some(1), "a", 1), wire(Some(2), "b", 3)])
                },
            ),
        );
        let client = serve(router).await;

        let notes = client.list_notes("t").await.unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[1].version, 3);
    }
}
