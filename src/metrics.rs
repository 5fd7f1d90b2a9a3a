//! Prometheus metrics for the security pipeline.
//!
//! Metric names live in [`names`]; everything else in the crate records
//! through the thin helpers below so call sites never repeat label keys.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{AppResult, SecurityError};

/// Metric name constants.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
    pub const RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
    pub const RATE_LIMITER_ERRORS_TOTAL: &str = "gateway_rate_limiter_errors_total";
    pub const AUTH_FAILURES_TOTAL: &str = "gateway_auth_failures_total";
    pub const SANITIZATION_REJECTIONS_TOTAL: &str = "gateway_sanitization_rejections_total";
    pub const OPERATOR_KEYS_DROPPED_TOTAL: &str = "gateway_operator_keys_dropped_total";
    pub const TRANSACTIONS_TOTAL: &str = "gateway_transactions_total";
}

/// Install the Prometheus exporter and register metric descriptions.
///
/// # Errors
///
/// Returns `SecurityError::Config` if the exporter cannot bind its listener.
pub fn init_metrics(addr: std::net::SocketAddr) -> AppResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| SecurityError::Config(format!("failed to install metrics exporter: {e}")))?;

    describe_metrics();
    tracing::info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        names::REQUESTS_TOTAL,
        "Requests processed, labeled by method, route, and status"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "End-to-end request latency in seconds"
    );
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Requests rejected by the rate limiter, labeled by class"
    );
    describe_counter!(
        names::RATE_LIMITER_ERRORS_TOTAL,
        "Rate limit store failures that caused a fail-open allow"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Authentication or authorization rejections, labeled by reason"
    );
    describe_counter!(
        names::SANITIZATION_REJECTIONS_TOTAL,
        "Requests rejected outright by the sanitizer"
    );
    describe_counter!(
        names::OPERATOR_KEYS_DROPPED_TOTAL,
        "Operator keys silently dropped from client documents"
    );
    describe_counter!(
        names::TRANSACTIONS_TOTAL,
        "Coordinated transactions, labeled by outcome"
    );
}

pub fn record_request(method: &str, route: &str, status: u16, duration_secs: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "route" => route.to_string())
        .record(duration_secs);
}

pub fn record_rate_limited(class: &str) {
    counter!(names::RATE_LIMITED_TOTAL, "class" => class.to_string()).increment(1);
}

pub fn record_rate_limiter_error() {
    counter!(names::RATE_LIMITER_ERRORS_TOTAL).increment(1);
}

pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

pub fn record_sanitization_rejection() {
    counter!(names::SANITIZATION_REJECTIONS_TOTAL).increment(1);
}

pub fn record_operator_keys_dropped(count: usize) {
    counter!(names::OPERATOR_KEYS_DROPPED_TOTAL).increment(count as u64);
}

pub fn record_transaction(outcome: &'static str) {
    counter!(names::TRANSACTIONS_TOTAL, "outcome" => outcome).increment(1);
}
