//! HTTP API Server
//!
//! Sync endpoints guarded by the auth gate, plus the public
//! fetch-by-token read path.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::crypto::{AuthGate, SyncCipher};
use crate::error::{Error, Result};
use crate::replication::protocol::{
    self, EntryBatch, UpdatesRequest, UpdatesResponse, APPLY_PATH, FETCH_PATH, HEALTH_PATH,
    UPDATES_PATH,
};
use crate::store::{EntryStore, NodeState, Pid, TokenLookup};

/// Status used when a token resolves to a deleted entry
const DELETED_STATUS: u16 = 419;

/// Shared application state
pub struct AppState {
    /// Local entry store
    pub store: Arc<EntryStore>,
    /// Cipher for sync payloads
    pub cipher: SyncCipher,
    /// Bearer check for sync routes
    pub gate: AuthGate,
    /// Pid reported by the health route
    pub pid: Pid,
}

/// HTTP API server
pub struct HttpServer {
    bind_address: String,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server for `store` using the key material in `node`
    pub fn new(bind_address: impl Into<String>, store: Arc<EntryStore>, node: &NodeState) -> Self {
        let state = Arc::new(AppState {
            store,
            cipher: SyncCipher::new(&node.encryption_key),
            gate: AuthGate::new(&node.encryption_key),
            pid: node.pid,
        });

        Self {
            bind_address: bind_address.into(),
            state,
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            // Sync operations
            .route(UPDATES_PATH, post(handle_updates))
            .route(APPLY_PATH, post(handle_apply))
            // Public reads
            .route(FETCH_PATH, get(handle_fetch))
            .route(HEALTH_PATH, get(handle_health))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;
        tracing::info!("Server started and listening on {}", self.bind_address);
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: tokio::net::TcpListener) -> Result<()> {
        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Request/Response Types ============

/// Query of the fetch route
#[derive(Debug, Deserialize)]
pub struct FetchParams {
    pub token: Option<String>,
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub pid: Pid,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============ Handlers ============

/// Returns the entries changed after the requested log position; read-only
async fn handle_updates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        authorize(&state, &headers)?;
        let request: UpdatesRequest = protocol::open(&state.cipher, &body)?;
        let changes = state.store.changes_since(request.since).await?;
        tracing::debug!(
            "Serving {} updates since {} (cursor {})",
            changes.entries.len(),
            request.since,
            changes.cursor
        );
        let response = UpdatesResponse {
            entries: changes.entries,
            cursor: changes.cursor,
        };
        protocol::seal(&state.cipher, &response)
    }
    .await;

    match result {
        Ok(payload) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            payload,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Merges the posted batch
async fn handle_apply(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        authorize(&state, &headers)?;
        let batch: EntryBatch = protocol::open(&state.cipher, &body)?;
        protocol::check_batch(&batch)?;
        let received = batch.len();
        let mut applied = 0;
        for entry in batch {
            if state.store.apply_remote(entry).await? {
                applied += 1;
            }
        }
        tracing::debug!("Applied {}/{} incoming entries", applied, received);
        Ok::<_, Error>(())
    }
    .await;

    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_fetch(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FetchParams>,
) -> Response {
    let token = match params.token.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "Please specify a token".to_string(),
                    code: "MISSING_TOKEN".to_string(),
                }),
            )
                .into_response()
        }
    };

    match state.store.lookup_by_token(&token).await {
        Ok(TokenLookup::Found(entry)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type_for(&entry.key))],
            entry.value,
        )
            .into_response(),
        Ok(TokenLookup::Gone(key)) => {
            tracing::debug!("Token for deleted key {} requested", key);
            let status = StatusCode::from_u16(DELETED_STATUS).unwrap_or(StatusCode::GONE);
            (
                status,
                Json(ErrorResponse {
                    error: "Entry was deleted".to_string(),
                    code: "DELETED".to_string(),
                }),
            )
                .into_response()
        }
        Ok(TokenLookup::Unknown) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Unknown token".to_string(),
                code: "NOT_FOUND".to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        pid: state.pid,
    })
}

// ============ Helpers ============

/// Reject the request before its body is looked at
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    state.gate.check(presented)
}

fn error_response(err: Error) -> Response {
    let (status, code) = match &err {
        Error::Auth(_) => (StatusCode::BAD_REQUEST, "UNAUTHORIZED"),
        Error::Codec(_) => (StatusCode::BAD_REQUEST, "BAD_PAYLOAD"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
    };

    if err.is_client_error() {
        tracing::warn!("Rejected sync request: {}", err);
    } else {
        tracing::error!("Sync request failed: {}", err);
    }

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: code.to_string(),
        }),
    )
        .into_response()
}

/// Content type hinted by the key suffix
fn content_type_for(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "txt" | "md" => "text/plain; charset=utf-8",
        "json" => "application/json",
        "css" => "text/css",
        "js" => "text/javascript",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::bearer_token;
    use crate::store::Entry;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn server() -> (HttpServer, Arc<EntryStore>, NodeState) {
        let store = Arc::new(EntryStore::open_in_memory().unwrap());
        let node = store.node_state().await;
        let server = HttpServer::new("127.0.0.1:0", Arc::clone(&store), &node);
        (server, store, node)
    }

    fn sync_request(path: &str, token: Option<&str>, body: Vec<u8>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn read_body(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn error_code(response: Response) -> String {
        let body = read_body(response).await;
        serde_json::from_slice::<ErrorResponse>(&body).unwrap().code
    }

    #[tokio::test]
    async fn test_updates_returns_newer_entries() {
        let (server, store, node) = server().await;
        store.put("a", b"1".to_vec()).await.unwrap();
        store.put("b", b"2".to_vec()).await.unwrap();

        let cipher = SyncCipher::new(&node.encryption_key);
        let body = protocol::seal(&cipher, &UpdatesRequest { since: 1 }).unwrap();
        let token = bearer_token(&node.encryption_key);

        let response = server
            .router()
            .oneshot(sync_request(UPDATES_PATH, Some(&token), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let updates: UpdatesResponse =
            protocol::open(&cipher, &read_body(response).await).unwrap();
        assert_eq!(updates.entries.len(), 1);
        assert_eq!(updates.entries[0].key, "b");
        assert_eq!(updates.cursor, 2);
    }

    #[tokio::test]
    async fn test_apply_rejects_unstorable_version_whole_batch() {
        let (server, store, node) = server().await;
        let cipher = SyncCipher::new(&node.encryption_key);
        let token = bearer_token(&node.encryption_key);

        let batch = vec![
            Entry::live("ok", b"1".to_vec(), 1, 1, "t1"),
            Entry::live("x", b"x".to_vec(), crate::store::MAX_VERSION + 5, 1, "t2"),
        ];
        let body = protocol::seal(&cipher, &batch).unwrap();
        let response = server
            .router()
            .oneshot(sync_request(APPLY_PATH, Some(&token), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "BAD_PAYLOAD");

        assert!(store.get("ok").await.unwrap().is_none());
        assert!(store.get("x").await.unwrap().is_none());
        assert_eq!(store.clock().await, 0);
    }

    #[tokio::test]
    async fn test_apply_merges_batch() {
        let (server, store, node) = server().await;
        let cipher = SyncCipher::new(&node.encryption_key);
        let token = bearer_token(&node.encryption_key);

        let batch = vec![
            Entry::live("x", b"1".to_vec(), 1, 1, "tx"),
            Entry::tombstone("y", 2, 1, "ty"),
        ];
        let body = protocol::seal(&cipher, &batch).unwrap();
        let response = server
            .router()
            .oneshot(sync_request(APPLY_PATH, Some(&token), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(read_body(response).await.is_empty());

        assert_eq!(store.get("x").await.unwrap().unwrap(), batch[0]);
        assert!(store.get("y").await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn test_auth_checked_before_decrypt() {
        let (server, store, node) = server().await;
        let cipher = SyncCipher::new(&node.encryption_key);
        let valid_body =
            protocol::seal(&cipher, &vec![Entry::live("x", b"1".to_vec(), 1, 1, "t")]).unwrap();

        // well-formed payload, missing token
        let response = server
            .router()
            .oneshot(sync_request(APPLY_PATH, None, valid_body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "UNAUTHORIZED");

        // garbage payload, wrong token: auth is reported, not the payload
        let response = server
            .router()
            .oneshot(sync_request(UPDATES_PATH, Some("wrong"), b"garbage".to_vec()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "UNAUTHORIZED");

        assert!(store.get("x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_payload_rejected() {
        let (server, store, node) = server().await;
        let token = bearer_token(&node.encryption_key);

        let mut tampered = protocol::seal(
            &SyncCipher::new(&node.encryption_key),
            &vec![Entry::live("x", b"1".to_vec(), 1, 1, "t")],
        )
        .unwrap();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x80;

        let response = server
            .router()
            .oneshot(sync_request(APPLY_PATH, Some(&token), tampered))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "BAD_PAYLOAD");
        assert!(store.get("x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_by_token_lifecycle() {
        let (server, store, _) = server().await;
        let entry = store.put("z.html", b"<b>z</b>".to_vec()).await.unwrap();
        let uri = format!("{}?token={}", FETCH_PATH, entry.url_token);

        let response = server
            .router()
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
        assert_eq!(read_body(response).await, b"<b>z</b>");

        store.delete("z.html").await.unwrap();
        let response = server
            .router()
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 419);

        let response = server
            .router()
            .oneshot(
                Request::get(format!("{}?token=nope", FETCH_PATH))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = server
            .router()
            .oneshot(Request::get(FETCH_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("notes.TXT"), "text/plain; charset=utf-8");
        assert_eq!(content_type_for("photo.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("archive"), "application/octet-stream");
    }
}
