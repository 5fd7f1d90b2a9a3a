//! Fixed-window rate limiting keyed by client fingerprint, route, and class.
//!
//! # Algorithm
//!
//! Fixed-window counting: one counter per composite key, reset wholesale when
//! the window elapses. Chosen for O(1) space per key and simplicity over
//! sliding-window or token-bucket schemes.
//!
//! **Known tradeoff**: a client can issue up to `2 × max_requests` across a
//! window boundary (`max` at the end of one window, `max` at the start of the
//! next). This is inherent to fixed windows and is deliberately preserved —
//! "fixing" it would change behavior into a sliding-window scheme.
//!
//! # Limit Classes
//!
//! Each class (`auth`, `api`, `payment`, `upload`, `admin`) carries an
//! independent `(window, max)` pair; see [`crate::config::RateLimitConfig`]
//! for the defaults and environment overrides.
//!
//! # Failure Semantics
//!
//! Store errors fail **open**: the request is allowed, the error is logged,
//! and a metric is recorded. Product availability must not hinge on rate
//! limiter uptime, but silent failures must stay observable.

pub mod classes;
pub mod store;

pub use classes::{LimitClass, LimitPolicy, RateLimitDecision};
pub use store::{InMemoryRateLimitStore, RateLimitRecord, RateLimitStore};

use std::sync::Arc;

use tracing::{error, warn};

use crate::config::RateLimitConfig;

/// Evaluate a request against its limit class.
///
/// Increments the counter for `key` and converts the result into an
/// allow/deny decision. A failing store yields an *allowed* decision
/// (fail open) after logging the error.
pub fn check_rate_limit(
    store: &Arc<dyn RateLimitStore>,
    limits: &RateLimitConfig,
    class: LimitClass,
    key: &str,
) -> RateLimitDecision {
    let policy = class.policy(limits);

    match store.increment(key, policy.window) {
        Ok((count, reset_at)) => {
            let decision = policy.decide(class, count, reset_at);
            if !decision.allowed {
                warn!(
                    key = %key,
                    class = %class,
                    count,
                    limit = policy.max_requests,
                    "Rate limit exceeded"
                );
                crate::metrics::record_rate_limited(class.as_str());
            }
            decision
        }
        Err(e) => {
            // Fail open: availability must not depend on the limiter, but
            // the failure has to be observable.
            error!(error = %e, key = %key, class = %class, "Rate limit store failed, allowing request");
            crate::metrics::record_rate_limiter_error();
            RateLimitDecision::fail_open(class, policy)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::SecurityError;
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    struct FailingStore;

    impl RateLimitStore for FailingStore {
        fn increment(
            &self,
            _key: &str,
            _window: Duration,
        ) -> Result<(u32, DateTime<Utc>), SecurityError> {
            Err(SecurityError::Store("backend unavailable".into()))
        }

        fn get(&self, _key: &str) -> Result<Option<RateLimitRecord>, SecurityError> {
            Err(SecurityError::Store("backend unavailable".into()))
        }

        fn cleanup(&self) -> Result<usize, SecurityError> {
            Ok(0)
        }
    }

    #[test]
    fn test_store_failure_fails_open() {
        let store: Arc<dyn RateLimitStore> = Arc::new(FailingStore);
        let limits = RateLimitConfig::default();

        let decision = check_rate_limit(&store, &limits, LimitClass::Auth, "1.2.3.4:ua:/login");
        assert!(decision.allowed, "store failures must not reject requests");
    }

    #[test]
    fn test_exceeding_class_limit_denies() {
        let store: Arc<dyn RateLimitStore> = Arc::new(InMemoryRateLimitStore::new());
        let limits = RateLimitConfig::default();
        let key = "1.2.3.4:ua:/login:auth";

        for i in 1..=5 {
            let decision = check_rate_limit(&store, &limits, LimitClass::Auth, key);
            assert!(decision.allowed, "request {i} should be allowed");
        }
        let decision = check_rate_limit(&store, &limits, LimitClass::Auth, key);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }
}
