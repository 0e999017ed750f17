//! Authorization of upgrade requests.
//!
//! The relay itself only needs "who is this connection?". Two
//! [`Authorizer`]s are provided:
//! - [`OpenAuthorizer`]: trusts the `displayName` query parameter.
//! - [`SessionAuthorizer`]: session cookie plus CSRF token, checked against
//!   a [`SessionStore`].
//!
//! The CSRF token is read from the `X-CSRF-Token` header, or from the
//! `csrf_token` query parameter since browsers cannot set headers on a
//! WebSocket handshake.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, error, warn};

use relay_core::ANONYMOUS;

pub const SESSION_COOKIE: &str = "session_token";
pub const CSRF_COOKIE: &str = "csrf_token";
pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_QUERY_PARAM: &str = "csrf_token";
pub const DISPLAY_NAME_PARAM: &str = "displayName";

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing session token")]
    MissingSessionToken,

    #[error("missing CSRF token")]
    MissingCsrfToken,

    #[error("unknown or expired session")]
    UnknownSession,

    #[error("CSRF token mismatch")]
    CsrfMismatch,

    #[error("session store unavailable")]
    SessionStoreUnavailable,
}

/// The parts of an HTTP request an authorizer may look at.
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
}

impl ConnectRequest {
    pub fn new(headers: HeaderMap, query: HashMap<String, String>) -> Self {
        ConnectRequest { headers, query }
    }

    fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    }
}

/// Who an authorized connection belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub display_name: String,
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, req: &ConnectRequest) -> Result<Identity, AuthError>;
}

/// Accepts everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAuthorizer;

#[async_trait]
impl Authorizer for OpenAuthorizer {
    async fn authorize(&self, req: &ConnectRequest) -> Result<Identity, AuthError> {
        let display_name = req
            .query_param(DISPLAY_NAME_PARAM)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(ANONYMOUS);

        Ok(Identity {
            display_name: display_name.to_string(),
        })
    }
}

/// What a session store knows about a logged-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub username: String,
    pub csrf_token: String,
}

/// Lookup side of wherever sessions live.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_session(&self, session_token: &str) -> Option<SessionRecord>;
}

pub struct SessionAuthorizer<S> {
    sessions: S,
}

impl<S: SessionStore> SessionAuthorizer<S> {
    pub fn new(sessions: S) -> Self {
        SessionAuthorizer { sessions }
    }
}

#[async_trait]
impl<S: SessionStore> Authorizer for SessionAuthorizer<S> {
    async fn authorize(&self, req: &ConnectRequest) -> Result<Identity, AuthError> {
        let jar = CookieJar::from_headers(&req.headers);
        let session_token = jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingSessionToken)?;

        let csrf_token = req
            .header(CSRF_HEADER)
            .or_else(|| req.query_param(CSRF_QUERY_PARAM))
            .ok_or(AuthError::MissingCsrfToken)?;

        let record = self
            .sessions
            .find_session(&session_token)
            .await
            .ok_or(AuthError::UnknownSession)?;

        if record.csrf_token != csrf_token {
            warn!(username = %record.username, "CSRF token mismatch");
            return Err(AuthError::CsrfMismatch);
        }

        debug!(username = %record.username, "session authorized");
        Ok(Identity {
            display_name: record.username,
        })
    }
}

/// Tokens handed to a client at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub session_token: String,
    pub csrf_token: String,
}

/// Process-local session table.
#[derive(Debug, Default)]
pub struct InMemorySessions {
    by_token: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session for `username` with fresh random tokens.
    ///
    /// Fails only if the table was poisoned by a panicking writer; tokens
    /// are never handed out unless they were stored.
    pub fn issue(&self, username: &str) -> Result<SessionTokens, AuthError> {
        let tokens = SessionTokens {
            session_token: generate_token(),
            csrf_token: generate_token(),
        };

        let mut guard = self.by_token.write().map_err(|_| {
            error!(username = %username, "session table poisoned; not issuing session");
            AuthError::SessionStoreUnavailable
        })?;
        guard.insert(
            tokens.session_token.clone(),
            SessionRecord {
                username: username.to_string(),
                csrf_token: tokens.csrf_token.clone(),
            },
        );
        Ok(tokens)
    }

    /// End a session. Returns whether it existed.
    pub fn revoke(&self, session_token: &str) -> bool {
        self.by_token
            .write()
            .map(|mut guard| guard.remove(session_token).is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl SessionStore for InMemorySessions {
    async fn find_session(&self, session_token: &str) -> Option<SessionRecord> {
        self.by_token.read().ok()?.get(session_token).cloned()
    }
}

#[async_trait]
impl<S: SessionStore + ?Sized> SessionStore for std::sync::Arc<S> {
    async fn find_session(&self, session_token: &str) -> Option<SessionRecord> {
        (**self).find_session(session_token).await
    }
}

/// 32 random bytes, URL-safe base64 without padding.
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
