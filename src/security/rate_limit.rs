//! In-process fixed-window rate limiting keyed by client identity.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_REQUESTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitEntry {
    /// An entry whose window has passed is dead even if not yet swept.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.reset_at < now
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limited: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Fixed-window counter per identity.
///
/// Each identity's read-check-increment runs under its map shard's lock, so
/// two concurrent requests can never both be admitted at `count == limit`.
/// Capacity is inclusive: the `max_requests`th request in a window passes.
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    fn window(&self) -> TimeDelta {
        TimeDelta::from_std(self.config.window).unwrap_or_else(|_| TimeDelta::seconds(60))
    }

    pub fn admit(&self, identity: &str) -> RateLimitDecision {
        self.admit_at(identity, Utc::now())
    }

    /// Record one request from `identity` at `now` and decide whether it may
    /// proceed.
    pub fn admit_at(&self, identity: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let limit = self.config.max_requests;
        let fresh = || RateLimitEntry {
            count: 0,
            reset_at: now + self.window(),
        };

        let mut entry = self
            .entries
            .entry(identity.to_string())
            .or_insert_with(fresh);

        if entry.is_expired(now) {
            *entry = fresh();
        }

        entry.count = entry.count.saturating_add(1);

        if entry.count > limit {
            return RateLimitDecision {
                limited: true,
                limit,
                remaining: 0,
                reset_at: entry.reset_at,
            };
        }

        RateLimitDecision {
            limited: false,
            limit,
            remaining: limit - entry.count,
            reset_at: entry.reset_at,
        }
    }

    /// Drop entries whose window ended before `now`. Returns how many were
    /// removed. Live entries are never touched.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn tracked_identities(&self) -> usize {
        self.entries.len()
    }

    /// Run `sweep` once per window for as long as the process lives.
    /// The window must be non-zero.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(limiter.config.window);
            // The first tick completes immediately; nothing can be stale yet.
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = limiter.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "swept expired rate limit entries");
                }
            }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
