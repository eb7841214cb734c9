//! HTTP Basic authentication.
//!
//! Stored password hashes have the form `salt:hash`, where `hash` is the hex
//! HMAC-SHA256 of the password keyed by the salt string. A stored value
//! without `:` is a legacy unsalted SHA-256 hex digest.

use crate::api::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use ring::hmac;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Realm announced in the authentication challenge.
pub const REALM: &str = "LGH Repository Access";

/// Minimum accepted length for new passwords.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Paths that never require credentials.
const PUBLIC_PATHS: &[&str] = &["/health", "/debug/events"];

const SALT_LEN: usize = 16;

/// Configured credentials.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password_hash: String,
}

impl Credentials {
    /// Create credentials from a username and stored hash.
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
        }
    }

    /// Username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Check a username/password pair. Both comparisons always run.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let user_ok = constant_time_eq(username.as_bytes(), self.username.as_bytes());
        let pass_ok = verify_password(password, &self.password_hash);
        user_ok & pass_ok
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}

/// The user a request was authenticated as.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

/// Hash a password into the `salt:hash` form with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = hex::encode(salt);
    let hash = hash_with_salt(password, &salt);
    format!("{}:{}", salt, hash)
}

/// Verify a password against a stored hash in either supported form.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once(':') {
        Some((salt, expected)) => {
            constant_time_eq(expected.as_bytes(), hash_with_salt(password, salt).as_bytes())
        }
        None => constant_time_eq(stored.as_bytes(), sha256_hex(password).as_bytes()),
    }
}

fn hash_with_salt(password: &str, salt: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, salt.as_bytes());
    hex::encode(hmac::sign(&key, password.as_bytes()).as_ref())
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Decode an `Authorization: Basic ...` header value.
fn parse_basic(value: &HeaderValue) -> Option<(String, String)> {
    let value = value.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// 401 with a Basic challenge.
pub fn unauthorized() -> Response {
    let challenge = format!("Basic realm=\"{}\", charset=\"UTF-8\"", REALM);
    let mut response = (StatusCode::UNAUTHORIZED, "Unauthorized\n").into_response();
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

/// Basic-auth middleware. A no-op when authentication is disabled.
pub async fn basic_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let Some(credentials) = state.auth.as_ref() else {
        return next.run(request).await;
    };
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let supplied = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(parse_basic);

    match supplied {
        Some((user, pass)) if credentials.verify(&user, &pass) => {
            request
                .extensions_mut()
                .insert(AuthenticatedUser(credentials.username().to_string()));
            next.run(request).await
        }
        _ => {
            debug!(path = %request.uri().path(), "rejected request without valid credentials");
            unauthorized()
        }
    }
}
