/// Token claims
///
/// The payload carried inside every signed token. `sub` and `exp` drive
/// authorization; `kind` keeps refresh tokens from being presented as access
/// tokens, and `jti` makes every issued token distinct.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AccessClaims {
    /// Subject (the user's handle)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Random token id
    pub jti: String,
    pub kind: TokenKind,
}

impl AccessClaims {
    /// Create claims for `subject` expiring `ttl` from now
    pub fn new(subject: impl Into<String>, kind: TokenKind, ttl: Duration) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: subject.into(),
            exp: now + ttl.num_seconds(),
            iat: now,
            jti: Uuid::new_v4().to_string(),
            kind,
        }
    }

    pub fn subject(&self) -> &str {
        &self.sub
    }
}
