//! Per-session submission throttling.
//!
//! Limits are keyed by the anonymous session id carried in the session
//! cookie. A client that drops the cookie, or never sends it back, is handed
//! a fresh session on its next form fetch and with it a fresh allowance, so
//! these limits slow down cooperating browsers and casual floods only. There
//! is no network identity to fall back on behind the onion service.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

/// Sliding window in-memory rate limiter (process local).
///
/// Keys are anonymous session ids, never network addresses.
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// Records a hit and returns `Ok(())`, or returns how long until the
    /// oldest hit in the window expires.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> Result<(), Duration> {
        self.check_at(key, limit, window, Instant::now())
    }

    fn check_at(&self, key: &str, limit: usize, window: Duration, now: Instant) -> Result<(), Duration> {
        if !self.enabled { return Ok(()); }
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window { entry.pop_front(); } else { break; }
        }
        if entry.len() < limit {
            entry.push_back(now);
            Ok(())
        } else {
            let retry = entry.front().map(|oldest| window.saturating_sub(now.duration_since(*oldest))).unwrap_or(window);
            Err(retry)
        }
    }

    /// Takes back the newest hit for `key`. Used when an admitted action
    /// fails afterwards and should not count against the caller.
    pub fn refund(&self, key: &str) {
        if !self.enabled { return; }
        if let Some(mut hits) = self.store.get_mut(key) {
            hits.pop_back();
        }
    }

    /// Drops keys whose newest hit is older than `max_age`.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let before = self.store.len();
        self.store.retain(|_, hits| hits.back().is_some_and(|newest| now.duration_since(*newest) < max_age));
        before.saturating_sub(self.store.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}

/// Per-action limits derived from env.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub thread_limit: usize,
    pub thread_window: Duration,
    pub comment_limit: usize,
    pub comment_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            thread_limit: 1,
            thread_window: Duration::from_secs(300),
            comment_limit: 10,
            comment_window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: Duration) -> Duration { std::env::var(name).ok().and_then(|v| v.parse().ok()).map(Duration::from_secs).unwrap_or(default) }
        fn bool_env(name: &str, default: bool) -> bool { std::env::var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(default) }
        let d = Self::default();
        Self {
            enabled: bool_env("RL_ENABLED", d.enabled),
            thread_limit: usize_env("RL_THREAD_LIMIT", d.thread_limit),
            thread_window: dur_env("RL_THREAD_WINDOW", d.thread_window),
            comment_limit: usize_env("RL_COMMENT_LIMIT", d.comment_limit),
            comment_window: dur_env("RL_COMMENT_WINDOW", d.comment_window),
        }
    }

    /// Longest window; keys idle for longer carry no state worth keeping.
    pub fn longest_window(&self) -> Duration {
        self.thread_window.max(self.comment_window)
    }
}

/// High level guard used by the submission pipeline.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn from_config(cfg: RateLimitConfig) -> Self { Self::new(InMemoryRateLimiter::new(cfg.enabled), cfg) }
    pub fn allow_thread(&self, session: &str) -> Result<(), Duration> { self.limiter.check(&format!("thread:{session}"), self.cfg.thread_limit, self.cfg.thread_window) }
    pub fn allow_comment(&self, session: &str) -> Result<(), Duration> { self.limiter.check(&format!("comment:{session}"), self.cfg.comment_limit, self.cfg.comment_window) }
    pub fn refund_thread(&self, session: &str) { self.limiter.refund(&format!("thread:{session}")) }
    pub fn refund_comment(&self, session: &str) { self.limiter.refund(&format!("comment:{session}")) }
}
