//! Structured access logging with redaction.
//!
//! Every event goes through `tracing` under the `audit` target so deployments
//! can route the audit stream separately from application logs. Logging is
//! strictly best-effort: no audit path may abort or fail a request.
//!
//! Sensitive values are redacted *before* they reach the log encoder —
//! [`redact_document`] replaces values under credential-bearing keys, and
//! [`mask_email`] keeps just enough of an address to correlate events.

use serde_json::{Map, Value};
use tracing::info;

/// Key-name fragments whose values are always redacted.
const SENSITIVE_KEY_FRAGMENTS: [&str; 9] = [
    "password",
    "passwd",
    "token",
    "secret",
    "credential",
    "apikey",
    "api_key",
    "authorization",
    "private_key",
];

const REDACTED: &str = "[REDACTED]";

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower == "key" || SENSITIVE_KEY_FRAGMENTS.iter().any(|f| lower.contains(f))
}

/// Replace the value of every credential-bearing key, at any depth.
///
/// Matching is by substring on the lowercased key name, plus the exact key
/// `key`. Entire values are replaced rather than partially masked; a
/// truncated secret is still a secret.
pub fn redact_document(document: &Value) -> Value {
    match document {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, val) in map {
                if is_sensitive_key(key) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), redact_document(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_document).collect()),
        other => other.clone(),
    }
}

/// Mask an email address for logging: first two characters of the local
/// part, then `***`, domain preserved.
///
/// Inputs without an `@` are masked wholesale.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let visible: String = local.chars().take(2).collect();
            format!("{visible}***@{domain}")
        }
        _ => "***".to_string(),
    }
}

/// Emitter for the audit event stream.
///
/// Stateless over `tracing`; clones are free and every component that needs
/// to audit holds its own copy.
#[derive(Debug, Clone, Default)]
pub struct AccessLogger;

impl AccessLogger {
    pub fn new() -> Self {
        Self
    }

    /// A completed request, logged after response hardening.
    pub fn request(
        &self,
        method: &str,
        path: &str,
        status: u16,
        latency_ms: u128,
        client_ip: &str,
        user_agent: &str,
    ) {
        info!(
            target: "audit",
            event = "request",
            method,
            path,
            status,
            latency_ms,
            client_ip,
            user_agent,
        );
    }

    /// A read against a protected collection.
    pub fn read_access(&self, subject: &str, collection: &str, matched: usize) {
        info!(target: "audit", event = "read", subject, collection, matched);
    }

    /// A write (insert/update/delete) against a protected collection.
    pub fn write_access(&self, subject: &str, collection: &str, operation: &str) {
        info!(target: "audit", event = "write", subject, collection, operation);
    }

    /// An authentication attempt. Emails are masked before logging.
    pub fn auth_access(&self, email: &str, operation: &str, success: bool) {
        info!(
            target: "audit",
            event = "auth",
            email = %mask_email(email),
            operation,
            success,
        );
    }

    /// A payment operation. Amounts are logged, instruments never are.
    pub fn payment_access(&self, subject: &str, operation: &str, amount_cents: i64) {
        info!(target: "audit", event = "payment", subject, operation, amount_cents);
    }

    /// An admin action, with the redacted request payload attached.
    pub fn admin_access(&self, subject: &str, operation: &str, payload: &Value) {
        info!(
            target: "audit",
            event = "admin",
            subject,
            operation,
            payload = %redact_document(payload),
        );
    }

    /// A transaction lifecycle event: `begin`, `commit`, or `abort`.
    pub fn transaction(&self, txn_id: &str, phase: &str) {
        info!(target: "audit", event = "transaction", txn_id, phase);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_sensitive_keys_at_depth() {
        let doc = json!({
            "email": "ab@test.com",
            "password": "hunter2",
            "profile": {
                "apiKey": "abc123",
                "settings": { "refreshToken": "zzz", "theme": "dark" }
            },
            "items": [{ "secret_note": "x", "title": "ok" }]
        });

        let redacted = redact_document(&doc);
        assert_eq!(redacted["password"], json!(REDACTED));
        assert_eq!(redacted["profile"]["apiKey"], json!(REDACTED));
        assert_eq!(redacted["profile"]["settings"]["refreshToken"], json!(REDACTED));
        assert_eq!(redacted["items"][0]["secret_note"], json!(REDACTED));
        // Non-sensitive values survive untouched
        assert_eq!(redacted["email"], json!("ab@test.com"));
        assert_eq!(redacted["profile"]["settings"]["theme"], json!("dark"));
        assert_eq!(redacted["items"][0]["title"], json!("ok"));
    }

    #[test]
    fn test_exact_key_named_key_is_redacted() {
        let doc = json!({ "key": "abc", "monkey": "not sensitive" });
        let redacted = redact_document(&doc);
        assert_eq!(redacted["key"], json!(REDACTED));
        assert_eq!(redacted["monkey"], json!("not sensitive"));
    }

    #[test]
    fn test_redaction_is_case_insensitive() {
        let doc = json!({ "Authorization": "Bearer x", "PASSWORD": "y" });
        let redacted = redact_document(&doc);
        assert_eq!(redacted["Authorization"], json!(REDACTED));
        assert_eq!(redacted["PASSWORD"], json!(REDACTED));
    }

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("ab@test.com"), "ab***@test.com");
        assert_eq!(mask_email("alexandra@test.com"), "al***@test.com");
        assert_eq!(mask_email("a@test.com"), "a***@test.com");
        assert_eq!(mask_email("not-an-email"), "***");
        assert_eq!(mask_email("@test.com"), "***");
    }
}
