//! HTTP gateway.
//!
//! Every request that is not `/health` or `/debug/events` is a smart-HTTP
//! git request. It passes, in order, the virtual-owner rewrite, access
//! logging, authentication, the read-only push gate and the repository
//! existence gate before being delegated to the transport backend.

use crate::auth::{self, AuthenticatedUser, Credentials};
use crate::observability::{access_log, virtual_owner};
use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, Query, Request, State},
    http::{request::Parts, Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use futures_util::{StreamExt, TryStreamExt};
use lgh_events::{Event, EventContext, EventType};
use lgh_git::{
    diff_refs, is_bare_repo, is_push_request, parse_repo_path, push_payload, tag_payload,
    GitError, RefSnapshot, TransportBackend, TransportRequest, DEFAULT_REMOTE_USER,
};
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

/// Overall request timeout; generous for large pushes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Largest accepted body on the debug injection endpoint (1 MiB).
pub const MAX_DEBUG_BODY: usize = 1024 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Event pipeline.
    pub events: EventContext,
    /// Executes validated git requests.
    pub backend: Arc<dyn TransportBackend>,
    /// Root holding the bare repositories.
    pub repos_dir: PathBuf,
    /// Reject pushes.
    pub read_only: bool,
    /// Credentials, when authentication is enabled.
    pub auth: Option<Arc<Credentials>>,
}

/// Gateway error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid repository path")]
    InvalidRepoPath,
    #[error("Repository is read-only. Push operations are not allowed.")]
    ReadOnly,
    #[error("Repository not found: {0}")]
    RepoNotFound(String),
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Forbidden")]
    Forbidden,
    #[error("Forbidden: Localhost only")]
    LocalhostOnly,
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Request body too large")]
    PayloadTooLarge,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("git backend error: {0}")]
    Backend(#[from] GitError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRepoPath | ApiError::InvalidJson => StatusCode::BAD_REQUEST,
            ApiError::ReadOnly | ApiError::Forbidden | ApiError::LocalhostOnly => {
                StatusCode::FORBIDDEN
            }
            ApiError::RepoNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Unauthorized = self {
            return auth::unauthorized();
        }
        if let ApiError::Backend(e) = &self {
            warn!(error = %e, "transport backend failed");
        }
        // Plain text, so git clients can show the message.
        (self.status(), format!("{}\n", self)).into_response()
    }
}

/// Creates the gateway router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/debug/events", any(inject_event))
        .fallback(git_transport)
        .layer(middleware::from_fn_with_state(state.clone(), auth::basic_auth))
        .layer(middleware::from_fn(access_log))
        .layer(middleware::from_fn(virtual_owner))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

/// Peer address from `ConnectInfo`, when the server provides it.
async fn peer_addr(parts: &mut Parts) -> Option<SocketAddr> {
    ConnectInfo::<SocketAddr>::from_request_parts(parts, &())
        .await
        .ok()
        .map(|ConnectInfo(addr)| addr)
}

/// Re-inject an event into live subscribers. Loopback callers only.
///
/// The event is tagged with `_replayed` and broadcast straight to the
/// broker, so it never reaches the persistent log.
async fn inject_event(State(state): State<AppState>, request: Request) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();

    if parts.method != Method::POST {
        return Err(ApiError::MethodNotAllowed);
    }

    let peer = peer_addr(&mut parts).await.ok_or(ApiError::Forbidden)?;
    if !peer.ip().is_loopback() {
        warn!(remote_addr = %peer, "blocked non-local access to /debug/events");
        return Err(ApiError::LocalhostOnly);
    }

    let bytes = axum::body::to_bytes(body, MAX_DEBUG_BODY)
        .await
        .map_err(|_| ApiError::PayloadTooLarge)?;
    let mut event: Event = serde_json::from_slice(&bytes).map_err(|_| ApiError::InvalidJson)?;

    event.mark_replayed();
    let delivered = state.events.broadcast(&event);
    debug!(
        event_id = %event.id(),
        event_type = %event.event_type(),
        delivered,
        "injected replayed event"
    );

    Ok(Json(json!({"status": "ok"})).into_response())
}

/// Validate a smart-HTTP request and hand it to the transport backend.
async fn git_transport(State(state): State<AppState>, request: Request) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();

    let path = urlencoding::decode(parts.uri.path())
        .map_err(|_| ApiError::InvalidRepoPath)?
        .into_owned();
    let (repo, git_path) = parse_repo_path(&path).ok_or(ApiError::InvalidRepoPath)?;

    let service = service_param(&parts.uri);
    let push = is_push_request(&parts.method, git_path, service.as_deref());
    if push && state.read_only {
        return Err(ApiError::ReadOnly);
    }

    let repo_path = state.repos_dir.join(repo);
    if !is_bare_repo(&repo_path) {
        return Err(ApiError::RepoNotFound(repo.to_string()));
    }

    let refs_before = if push {
        match state.backend.refs(&repo_path).await {
            Ok(refs) => Some(refs),
            Err(e) => {
                warn!(repo = %repo, error = %e, "cannot snapshot refs; push will not be announced");
                None
            }
        }
    } else {
        None
    };

    let remote_user = parts
        .extensions
        .get::<AuthenticatedUser>()
        .map(|user| user.0.clone())
        .unwrap_or_else(|| DEFAULT_REMOTE_USER.to_string());

    let transport_request = TransportRequest {
        repo: repo.to_string(),
        git_path: git_path.to_string(),
        method: parts.method.clone(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers.clone(),
        remote_addr: peer_addr(&mut parts).await,
        remote_user,
        body: body
            .into_data_stream()
            .map_err(std::io::Error::other)
            .boxed(),
    };

    let response = state.backend.serve(transport_request).await?;

    if let Some(before) = refs_before {
        if response.status.is_success() {
            tokio::spawn(announce_push(
                state.clone(),
                repo_display_name(repo).to_string(),
                repo_path,
                before,
                response.completion,
            ));
        }
    }

    let mut builder = Response::builder().status(response.status);
    if let Some(headers) = builder.headers_mut() {
        headers.extend(response.headers);
    }
    builder
        .body(Body::from_stream(response.body))
        .map_err(|e| ApiError::Backend(GitError::Cgi(e.to_string())))
}

/// First `service` query parameter, decoded.
fn service_param(uri: &Uri) -> Option<String> {
    let Query(params) = Query::<Vec<(String, String)>>::try_from_uri(uri).ok()?;
    params
        .into_iter()
        .find(|(key, _)| key == "service")
        .map(|(_, value)| value)
}

/// `demo.git` is announced as `demo`.
fn repo_display_name(repo: &str) -> &str {
    repo.strip_suffix(".git").unwrap_or(repo)
}

/// Publish `git.push` (and `git.tag`) once the backend finished successfully.
async fn announce_push(
    state: AppState,
    repo: String,
    repo_path: PathBuf,
    before: RefSnapshot,
    completion: oneshot::Receiver<bool>,
) {
    if !matches!(completion.await, Ok(true)) {
        debug!(repo = %repo, "push did not complete; nothing announced");
        return;
    }

    let after = match state.backend.refs(&repo_path).await {
        Ok(refs) => refs,
        Err(e) => {
            warn!(repo = %repo, error = %e, "cannot snapshot refs after push");
            return;
        }
    };

    let changes = diff_refs(&before, &after);
    if changes.is_empty() {
        debug!(repo = %repo, "push changed no refs");
        return;
    }

    info!(repo = %repo, refs = changes.len(), "push received");
    state
        .events
        .publish(EventType::GitPush, repo.as_str(), Some(push_payload(&changes)));
    for change in changes.iter().filter(|c| c.is_tag()) {
        state
            .events
            .publish(EventType::GitTag, repo.as_str(), Some(tag_payload(change)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_display_name() {
        assert_eq!(repo_display_name("demo.git"), "demo");
        assert_eq!(repo_display_name("my.project.git"), "my.project");
    }

    #[test]
    fn test_service_param_is_decoded() {
        let uri: Uri = "/demo.git/info/refs?service=git%2Dreceive%2Dpack"
            .parse()
            .unwrap();
        assert_eq!(service_param(&uri).as_deref(), Some("git-receive-pack"));

        let uri: Uri = "/demo.git/info/refs?a=1&service=x&service=y".parse().unwrap();
        assert_eq!(service_param(&uri).as_deref(), Some("x"));

        let uri: Uri = "/demo.git/info/refs".parse().unwrap();
        assert_eq!(service_param(&uri), None);
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ApiError::InvalidRepoPath.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::ReadOnly.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::RepoNotFound("x.git".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::MethodNotAllowed.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(ApiError::LocalhostOnly.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::InvalidJson.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unauthorized_carries_challenge() {
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response
            .headers()
            .contains_key(axum::http::header::WWW_AUTHENTICATE));
    }
}
