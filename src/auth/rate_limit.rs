/// Login rate limiting
///
/// Counts admissions per key inside a fixed window that opens on the first
/// admission and restarts once it has fully elapsed. The count is checked and
/// incremented while holding one lock, so racing callers cannot overshoot the
/// budget. Denied calls leave the count untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::auth::service::LoginAttempt;
use crate::configuration::RateLimitKeyKind;

/// Stale windows are swept once the map grows past this many keys
const PURGE_THRESHOLD: usize = 1024;
/// Hard cap on tracked keys; at the cap a new key evicts the oldest window
const DEFAULT_MAX_KEYS: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { retry_after: Duration },
}

#[derive(Debug)]
struct Window {
    count: u32,
    started: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    max_attempts: u32,
    window: Duration,
    max_keys: usize,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self::with_max_keys(max_attempts, window, DEFAULT_MAX_KEYS)
    }

    /// Bound the number of keys tracked at once
    ///
    /// The oldest window is closest to expiring anyway, so it is the one
    /// dropped when a new key arrives at the cap.
    pub fn with_max_keys(max_attempts: u32, window: Duration, max_keys: usize) -> Self {
        Self {
            max_attempts,
            window,
            max_keys: max_keys.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub async fn admit(&self, key: &str) -> Admission {
        self.admit_at(key, Instant::now()).await
    }

    /// Same as [`admit`](Self::admit) with an explicit clock reading
    pub async fn admit_at(&self, key: &str, now: Instant) -> Admission {
        let mut windows = self.windows.lock().await;

        if windows.len() >= PURGE_THRESHOLD {
            let span = self.window;
            windows.retain(|_, w| now.saturating_duration_since(w.started) < span);
        }

        if windows.len() >= self.max_keys && !windows.contains_key(key) {
            let oldest = windows
                .iter()
                .min_by_key(|(_, w)| w.started)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                tracing::warn!(
                    tracked = windows.len(),
                    "Rate limiter at capacity, evicting oldest window"
                );
                windows.remove(&oldest);
            }
        }

        let window = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.saturating_duration_since(window.started) >= self.window {
            window.count = 0;
            window.started = now;
        }

        if window.count >= self.max_attempts {
            let elapsed = now.saturating_duration_since(window.started);
            return Admission::Denied {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }

        window.count += 1;
        Admission::Allowed
    }
}

/// Chooses which budget a login attempt is charged against
pub trait RateLimitKey: Send + Sync {
    fn key_for(&self, attempt: &LoginAttempt) -> String;
}

/// A single budget shared by every caller of the login endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalKey;

impl RateLimitKey for GlobalKey {
    fn key_for(&self, _attempt: &LoginAttempt) -> String {
        "login".to_string()
    }
}

/// One budget per submitted handle
#[derive(Debug, Clone, Copy, Default)]
pub struct PerHandleKey;

impl RateLimitKey for PerHandleKey {
    fn key_for(&self, attempt: &LoginAttempt) -> String {
        format!("login:handle:{}", attempt.handle())
    }
}

/// One budget per client address; callers without one share the global budget
#[derive(Debug, Clone, Copy, Default)]
pub struct PerClientKey;

impl RateLimitKey for PerClientKey {
    fn key_for(&self, attempt: &LoginAttempt) -> String {
        match attempt.client_ip() {
            Some(ip) => format!("login:ip:{}", ip),
            None => GlobalKey.key_for(attempt),
        }
    }
}

pub fn key_strategy(kind: RateLimitKeyKind) -> Arc<dyn RateLimitKey> {
    match kind {
        RateLimitKeyKind::Global => Arc::new(GlobalKey),
        RateLimitKeyKind::Handle => Arc::new(PerHandleKey),
        RateLimitKeyKind::ClientIp => Arc::new(PerClientKey),
    }
}
