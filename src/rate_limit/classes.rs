//! Limit classes and per-request decisions.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::RateLimitConfig;

/// A `(max_requests, window)` pair for one limit class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    /// Maximum requests allowed per window.
    pub max_requests: u32,
    /// Length of the fixed window.
    pub window: Duration,
}

impl LimitPolicy {
    /// Create a new policy.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// Convert an incremented count into an allow/deny decision.
    pub fn decide(
        &self,
        class: LimitClass,
        count: u32,
        reset_at: DateTime<Utc>,
    ) -> RateLimitDecision {
        let allowed = count <= self.max_requests;
        let remaining = self.max_requests.saturating_sub(count);
        let retry_after = if allowed {
            0
        } else {
            let secs = (reset_at - Utc::now()).num_seconds();
            u64::try_from(secs).unwrap_or(0).max(1)
        };

        RateLimitDecision {
            allowed,
            class,
            limit: self.max_requests,
            remaining,
            reset_time: reset_at.timestamp_millis(),
            retry_after,
        }
    }
}

/// Independent rate-limit classes, each with its own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitClass {
    /// Login, token refresh, password reset.
    Auth,
    /// General API traffic.
    Api,
    /// Payment operations.
    Payment,
    /// Media/file uploads.
    Upload,
    /// Admin routes.
    Admin,
}

impl LimitClass {
    /// Stable lowercase name, used in counter keys and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitClass::Auth => "auth",
            LimitClass::Api => "api",
            LimitClass::Payment => "payment",
            LimitClass::Upload => "upload",
            LimitClass::Admin => "admin",
        }
    }

    /// Resolve this class's policy from the configuration.
    pub fn policy(&self, config: &RateLimitConfig) -> LimitPolicy {
        match self {
            LimitClass::Auth => config.auth,
            LimitClass::Api => config.api,
            LimitClass::Payment => config.payment,
            LimitClass::Upload => config.upload,
            LimitClass::Admin => config.admin,
        }
    }
}

impl fmt::Display for LimitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one request against its limit class.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The class that was evaluated.
    pub class: LimitClass,
    /// Configured maximum for the class.
    pub limit: u32,
    /// Requests left in the current window (0 when exceeded).
    pub remaining: u32,
    /// Epoch milliseconds at which the window resets.
    pub reset_time: i64,
    /// Seconds to wait before retrying (0 when allowed).
    pub retry_after: u64,
}

impl RateLimitDecision {
    /// Decision used when the backing store fails: allow the request but
    /// report a full window so clients do not misinterpret headers.
    pub fn fail_open(class: LimitClass, policy: LimitPolicy) -> Self {
        Self {
            allowed: true,
            class,
            limit: policy.max_requests,
            remaining: policy.max_requests,
            reset_time: (Utc::now()
                + chrono::Duration::from_std(policy.window)
                    .unwrap_or_else(|_| chrono::Duration::zero()))
            .timestamp_millis(),
            retry_after: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_within_limit() {
        let policy = LimitPolicy::new(5, Duration::from_secs(900));
        let reset_at = Utc::now() + chrono::Duration::seconds(900);

        let decision = policy.decide(LimitClass::Auth, 3, reset_at);
        assert!(decision.allowed);
        assert_eq!(decision.limit, 5);
        assert_eq!(decision.remaining, 2);
        assert_eq!(decision.retry_after, 0);
    }

    #[test]
    fn test_decide_at_limit_still_allowed() {
        let policy = LimitPolicy::new(5, Duration::from_secs(900));
        let reset_at = Utc::now() + chrono::Duration::seconds(900);

        let decision = policy.decide(LimitClass::Auth, 5, reset_at);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_decide_over_limit_denied() {
        let policy = LimitPolicy::new(5, Duration::from_secs(900));
        let reset_at = Utc::now() + chrono::Duration::seconds(900);

        let decision = policy.decide(LimitClass::Auth, 6, reset_at);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.retry_after >= 1);
        assert!(decision.retry_after <= 900);
    }

    #[test]
    fn test_class_names() {
        assert_eq!(LimitClass::Auth.as_str(), "auth");
        assert_eq!(LimitClass::Api.as_str(), "api");
        assert_eq!(LimitClass::Payment.as_str(), "payment");
        assert_eq!(LimitClass::Upload.as_str(), "upload");
        assert_eq!(LimitClass::Admin.as_str(), "admin");
    }

    #[test]
    fn test_fail_open_is_allowed() {
        let policy = LimitPolicy::new(10, Duration::from_secs(60));
        let decision = RateLimitDecision::fail_open(LimitClass::Api, policy);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 10);
    }
}
