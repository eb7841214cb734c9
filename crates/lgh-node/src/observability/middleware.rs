//! Request middleware: virtual-owner rewrite and access logging.

use axum::{
    extract::{ConnectInfo, Request},
    http::Uri,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;

/// The only owner segment the gateway strips.
pub const VIRTUAL_OWNER: &str = "lgh";

/// Map `/lgh/<repo>.git/<rest>` to `/<repo>.git/<rest>`.
///
/// Returns `None` when the path is left untouched: the first `.git` segment
/// must sit directly below the sentinel owner. Segments are compared
/// percent-decoded but copied through as received.
pub fn rewrite_virtual_owner(path: &str) -> Option<String> {
    let parts: Vec<&str> = path.strip_prefix('/').unwrap_or(path).split('/').collect();
    let decoded = |segment: &str| {
        urlencoding::decode(segment)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| segment.to_string())
    };
    let git_idx = parts.iter().position(|p| decoded(p).ends_with(".git"))?;
    if git_idx == 1 && decoded(parts[0]) == VIRTUAL_OWNER {
        Some(format!("/{}", parts[1..].join("/")))
    } else {
        None
    }
}

/// Rewrite virtual-owner paths before anything else sees the request.
pub async fn virtual_owner(mut request: Request, next: Next) -> Response {
    if let Some(path) = rewrite_virtual_owner(request.uri().path()) {
        let rewritten = match request.uri().query() {
            Some(query) => format!("{}?{}", path, query),
            None => path,
        };
        if let Ok(uri) = rewritten.parse::<Uri>() {
            tracing::trace!(from = %request.uri(), to = %uri, "virtual owner rewrite");
            *request.uri_mut() = uri;
        }
    }
    next.run(request).await
}

/// Log method, path, status, duration and peer of every non-health request.
pub async fn access_log(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().clone();
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = %format!("{:.2}", duration * 1000.0),
        remote_addr = %remote_addr,
        "request completed"
    );

    response
}
