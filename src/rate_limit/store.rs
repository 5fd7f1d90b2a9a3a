//! Counter storage for the fixed-window rate limiter.
//!
//! The trait boundary exists so that multi-instance deployments can plug in a
//! shared backing store (anything offering the same atomic-increment
//! contract). The in-memory implementation shipped here is correct for a
//! single process only: counters are not shared across instances, so a
//! horizontally scaled deployment would effectively multiply every limit by
//! the instance count.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::SecurityError;

/// One counter record per composite key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    /// Requests observed in the current window.
    pub count: u32,
    /// Wall-clock instant at which the window resets.
    pub window_reset_at: DateTime<Utc>,
}

impl RateLimitRecord {
    /// Whether the record's window has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.window_reset_at
    }
}

/// Concurrency-safe counter store with fixed-window reset.
///
/// Implementations must make `increment` atomic per key with respect to
/// concurrent increments and to `cleanup`. If a cleanup sweep races an
/// increment, the increment wins by recreating the key.
pub trait RateLimitStore: Send + Sync {
    /// Atomically increment the counter for `key`, starting a fresh window
    /// when the previous one has elapsed. Returns the post-increment count
    /// and the window's reset time.
    fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<(u32, DateTime<Utc>), SecurityError>;

    /// Fetch the current record for `key`, if any.
    fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, SecurityError>;

    /// Delete expired records. Returns how many were removed.
    fn cleanup(&self) -> Result<usize, SecurityError>;
}

/// Single-process counter store over a mutex-guarded map.
///
/// The global lock is held only for the few map operations per call, which is
/// cheap relative to request handling; per-key locking is unnecessary at this
/// scale.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl InMemoryRateLimitStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records (expired or not). Used by tests and the sweep.
    pub fn len(&self) -> usize {
        self.records.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, RateLimitRecord>>, SecurityError> {
        self.records
            .lock()
            .map_err(|_| SecurityError::Store("rate limit store lock poisoned".to_string()))
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<(u32, DateTime<Utc>), SecurityError> {
        let now = Utc::now();
        let window = chrono::Duration::from_std(window)
            .map_err(|e| SecurityError::Store(format!("invalid window duration: {e}")))?;

        let mut records = self.lock()?;
        let record = records
            .entry(key.to_string())
            .and_modify(|r| {
                if r.is_expired(now) {
                    // Window elapsed: reset wholesale
                    r.count = 1;
                    r.window_reset_at = now + window;
                } else {
                    r.count = r.count.saturating_add(1);
                }
            })
            .or_insert_with(|| RateLimitRecord {
                count: 1,
                window_reset_at: now + window,
            });

        Ok((record.count, record.window_reset_at))
    }

    fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, SecurityError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn cleanup(&self) -> Result<usize, SecurityError> {
        let now = Utc::now();
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        Ok(before - records.len())
    }
}
