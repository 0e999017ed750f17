//! Username/password accounts behind the session login flow.
//!
//! Registration stores an Argon2 hash; login checks it and issues a session
//! from the shared [`InMemorySessions`] table, the same one the
//! [`SessionAuthorizer`](crate::auth::SessionAuthorizer) reads from.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::auth::{AuthError, InMemorySessions, SessionTokens};

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    #[error("username must not be empty and password must be at least 8 characters")]
    InvalidCredentials,

    #[error("user already exists")]
    AlreadyExists,

    #[error("invalid username or password")]
    BadCredentials,

    #[error("password hashing failed")]
    Hashing,

    #[error("account store unavailable")]
    Unavailable,
}

impl From<AuthError> for AccountError {
    fn from(_: AuthError) -> Self {
        AccountError::Unavailable
    }
}

/// Process-local user directory.
#[derive(Debug)]
pub struct Accounts {
    users: RwLock<HashMap<String, String>>,
    sessions: Arc<InMemorySessions>,
}

impl Accounts {
    pub fn new(sessions: Arc<InMemorySessions>) -> Self {
        Accounts {
            users: RwLock::new(HashMap::new()),
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<InMemorySessions> {
        &self.sessions
    }

    /// Create an account. The username is used as-is (after trimming) as the
    /// chat display name once logged in.
    pub async fn register(&self, username: &str, password: &str) -> Result<(), AccountError> {
        let username = username.trim();
        if username.is_empty() || password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AccountError::InvalidCredentials);
        }
        if self.password_hash(username)?.is_some() {
            return Err(AccountError::AlreadyExists);
        }

        let password = password.to_string();
        let hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| {
                error!(error = %e, "password hashing task failed");
                AccountError::Hashing
            })??;

        // Checked again: two registrations may have raced through the hash.
        let mut users = self.users.write().map_err(|_| AccountError::Unavailable)?;
        if users.contains_key(username) {
            return Err(AccountError::AlreadyExists);
        }
        users.insert(username.to_string(), hash);
        info!(username = %username, "account registered");
        Ok(())
    }

    /// Check a password and start a session.
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionTokens, AccountError> {
        let username = username.trim();
        let hash = self
            .password_hash(username)?
            .ok_or(AccountError::BadCredentials)?;

        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| {
                error!(error = %e, "password verification task failed");
                AccountError::Hashing
            })?;
        if !matches {
            debug!(username = %username, "login refused");
            return Err(AccountError::BadCredentials);
        }

        let tokens = self.sessions.issue(username)?;
        info!(username = %username, "user logged in");
        Ok(tokens)
    }

    /// End the session behind `session_token`. Returns whether it existed.
    pub fn logout(&self, session_token: &str) -> bool {
        self.sessions.revoke(session_token)
    }

    fn password_hash(&self, username: &str) -> Result<Option<String>, AccountError> {
        let users = self.users.read().map_err(|_| AccountError::Unavailable)?;
        Ok(users.get(username).cloned())
    }
}

fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AccountError::Hashing)
}

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
