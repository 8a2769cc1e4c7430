//! Admin session guard: credential checks, opaque session tokens and login throttling.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use metrics::{counter, gauge};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::EntityKind;

const TOKEN_PREFIX: &str = "vs";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing or unknown session")]
    Unauthorized,
    #[error("session expired")]
    SessionExpired,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("too many failed logins; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Issued on successful login. The raw token is only ever held by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminPrincipal {
    pub username: String,
    pub expires_at: OffsetDateTime,
}

/// What an authorized call is about to do; carried into logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read(EntityKind),
    Write(EntityKind),
    Dashboard,
    Revisions,
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Read(kind) => write!(f, "read:{kind}"),
            Operation::Write(kind) => write!(f, "write:{kind}"),
            Operation::Dashboard => f.write_str("dashboard"),
            Operation::Revisions => f.write_str("revisions"),
        }
    }
}

/// The single configured admin account.
#[derive(Clone)]
pub struct AdminAccount {
    username: String,
    password_digest: Vec<u8>,
}

impl AdminAccount {
    /// `password_sha256` is the hex SHA-256 digest of the password.
    pub fn from_hex_digest(
        username: impl Into<String>,
        password_sha256: &str,
    ) -> Result<Self, hex::FromHexError> {
        Ok(Self {
            username: username.into(),
            password_digest: hex::decode(password_sha256.trim())?,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn verify(&self, credentials: &Credentials) -> bool {
        let user_ok = self
            .username
            .as_bytes()
            .ct_eq(credentials.username.as_bytes());
        let password_ok = self
            .password_digest
            .as_slice()
            .ct_eq(&digest(credentials.password.as_bytes()));
        bool::from(user_ok & password_ok)
    }
}

impl std::fmt::Debug for AdminAccount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAccount")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub ttl: Duration,
    pub login_window: Duration,
    pub login_max_failures: u32,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    username: String,
    expires_at: OffsetDateTime,
}

/// Sliding-window counter of failed logins per username.
#[derive(Debug, Clone)]
pub struct LoginThrottle {
    window: Duration,
    max_failures: u32,
    failures: Arc<DashMap<String, Vec<Instant>>>,
}

impl LoginThrottle {
    pub fn new(window: Duration, max_failures: u32) -> Self {
        Self {
            window,
            max_failures,
            failures: Arc::new(DashMap::new()),
        }
    }

    pub fn check(&self, username: &str) -> Result<(), AuthError> {
        let now = Instant::now();
        let window = self.window;
        let Some(mut entry) = self.failures.get_mut(username) else {
            return Ok(());
        };
        entry.retain(|instant| now.duration_since(*instant) < window);
        if entry.is_empty() {
            drop(entry);
            self.failures.remove_if(username, |_, failures| failures.is_empty());
            return Ok(());
        }

        if entry.len() as u32 >= self.max_failures {
            let oldest = entry.first().copied().unwrap_or(now);
            let retry_after = window.saturating_sub(now.duration_since(oldest));
            return Err(AuthError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }
        Ok(())
    }

    pub fn record_failure(&self, username: &str) {
        self.failures
            .entry(username.to_string())
            .or_default()
            .push(Instant::now());
    }

    pub fn reset(&self, username: &str) {
        self.failures.remove(username);
    }

    /// Forget failures older than the window. Returns how many usernames were dropped.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let window = self.window;
        let before = self.failures.len();
        self.failures.retain(|_, failures| {
            failures.retain(|instant| now.duration_since(*instant) < window);
            !failures.is_empty()
        });
        before.saturating_sub(self.failures.len())
    }

    pub fn tracked_usernames(&self) -> usize {
        self.failures.len()
    }
}

/// Issues and checks admin sessions. Only SHA-256 digests of tokens are kept.
#[derive(Clone)]
pub struct AdminSessionGuard {
    account: AdminAccount,
    ttl: time::Duration,
    sessions: Arc<DashMap<String, SessionEntry>>,
    throttle: LoginThrottle,
}

impl AdminSessionGuard {
    pub fn new(account: AdminAccount, policy: SessionPolicy) -> Self {
        let ttl = time::Duration::try_from(policy.ttl).unwrap_or(time::Duration::DAY);
        Self {
            account,
            ttl,
            sessions: Arc::new(DashMap::new()),
            throttle: LoginThrottle::new(policy.login_window, policy.login_max_failures),
        }
    }

    pub fn authenticate(&self, credentials: &Credentials) -> Result<SessionToken, AuthError> {
        self.throttle.check(&credentials.username)?;
        self.purge_expired();

        if !self.account.verify(credentials) {
            self.throttle.record_failure(&credentials.username);
            counter!("verdant_login_failure_total").increment(1);
            warn!(username = %credentials.username, "admin login rejected");
            return Err(AuthError::InvalidCredentials);
        }
        self.throttle.reset(&credentials.username);

        let token = generate_token();
        let expires_at = OffsetDateTime::now_utc() + self.ttl;
        self.sessions.insert(
            token_key(&token),
            SessionEntry {
                username: self.account.username.clone(),
                expires_at,
            },
        );

        gauge!("verdant_admin_sessions").set(self.sessions.len() as f64);
        info!(username = %self.account.username, %expires_at, "admin session issued");
        Ok(SessionToken { token, expires_at })
    }

    /// Check a presented token. Expired sessions are removed on sight.
    pub fn authorize(
        &self,
        token: Option<&str>,
        operation: Operation,
    ) -> Result<AdminPrincipal, AuthError> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::Unauthorized)?;
        let key = token_key(token);

        let entry = self
            .sessions
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or(AuthError::Unauthorized)?;

        if entry.expires_at <= OffsetDateTime::now_utc() {
            self.sessions.remove(&key);
            debug!(username = %entry.username, %operation, "admin session expired");
            return Err(AuthError::SessionExpired);
        }

        debug!(username = %entry.username, %operation, "admin call authorized");
        Ok(AdminPrincipal {
            username: entry.username,
            expires_at: entry.expires_at,
        })
    }

    /// Drop a session. Unknown tokens are ignored.
    pub fn revoke(&self, token: &str) -> bool {
        let removed = self.sessions.remove(&token_key(token.trim())).is_some();
        if removed {
            info!("admin session revoked");
        }
        removed
    }

    pub fn purge_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.expires_at > now);
        let forgotten = self.throttle.prune();
        if forgotten > 0 {
            debug!(forgotten, "stale login failures pruned");
        }
        before.saturating_sub(self.sessions.len())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

/// Hex SHA-256 digest in the form stored under `admin.password_sha256`.
pub fn hash_password(password: &str) -> String {
    hex::encode(digest(password.as_bytes()))
}

fn digest(bytes: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().to_vec()
}

fn token_key(token: &str) -> String {
    hex::encode(digest(token.as_bytes()))
}

fn generate_token() -> String {
    format!(
        "{TOKEN_PREFIX}_{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}
