//! Shared-password login sessions.
//!
//! A successful login mints a random token that the HTTP layer hands out as a
//! cookie. Tokens live in memory only and expire after a fixed lifetime.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Clone)]
pub struct SessionStore {
    password: Arc<str>,
    ttl: Duration,
    tokens: Arc<DashMap<String, DateTime<Utc>>>,
}

impl SessionStore {
    pub fn new(password: impl Into<Arc<str>>, ttl_secs: u64) -> Self {
        Self {
            password: password.into(),
            ttl: Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64),
            tokens: Arc::new(DashMap::new()),
        }
    }

    /// Mint a session token if `password` matches the shared secret.
    pub fn login(&self, password: &str) -> Option<String> {
        if !constant_time_eq(password.as_bytes(), self.password.as_bytes()) {
            info!("rejected login attempt with wrong password");
            return None;
        }
        let token = Uuid::new_v4().simple().to_string();
        self.tokens.insert(token.clone(), Utc::now() + self.ttl);
        debug!("issued session token");
        Some(token)
    }

    /// Whether `token` belongs to a live session. Expired tokens are dropped.
    pub fn is_valid(&self, token: &str) -> bool {
        let now = Utc::now();
        let expired = match self.tokens.get(token) {
            Some(expires_at) if *expires_at > now => return true,
            Some(_) => true,
            None => false,
        };
        if expired {
            self.tokens.remove(token);
        }
        false
    }

    pub fn logout(&self, token: &str) {
        self.tokens.remove(token);
    }

    /// Drop every expired session and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.tokens.len())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
