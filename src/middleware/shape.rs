//! Pre-routing request shape checks.
//!
//! Cheap structural rejections that run before any expensive work: content
//! type on mutating verbs, a plausible user agent, bounded URL length, and
//! a denylist of traversal/injection fragments in the URL.

use axum::http::{HeaderMap, Method, Uri, header};

use crate::config::Config;
use crate::error::{AppResult, SecurityError};

/// URL fragments that no legitimate client request contains.
const SUSPICIOUS_FRAGMENTS: [&str; 10] = [
    "../",
    "..\\",
    "<script",
    "javascript:",
    "data:text/html",
    "union select",
    "drop table",
    "insert into",
    "exec(",
    "eval(",
];

/// Validate a request's shape before routing.
///
/// # Errors
///
/// Returns `SecurityError::Validation` describing the first failed check.
pub fn validate_request(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    config: &Config,
) -> AppResult<()> {
    if is_mutating(method) {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let accepted = content_type.starts_with("application/json")
            || content_type.starts_with("multipart/form-data");
        if !accepted {
            return Err(SecurityError::Validation(format!(
                "unsupported content type for {method} request"
            )));
        }
    }

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let printable = user_agent
        .chars()
        .filter(|c| !c.is_control() && !c.is_whitespace())
        .count();
    if printable < 3 {
        return Err(SecurityError::Validation(
            "missing or implausible user agent".to_string(),
        ));
    }

    let url = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    if url.len() > config.max_url_length {
        return Err(SecurityError::Validation(format!(
            "URL exceeds maximum length of {}",
            config.max_url_length
        )));
    }

    let lower = url.to_lowercase();
    // Percent-decode once so encoded traversal does not slip through
    let decoded = percent_decode(&lower);
    for fragment in SUSPICIOUS_FRAGMENTS {
        if lower.contains(fragment) || decoded.contains(fragment) {
            return Err(SecurityError::Validation(
                "URL contains a disallowed pattern".to_string(),
            ));
        }
    }

    Ok(())
}

fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Minimal single-pass percent decoding; invalid escapes pass through.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (
                (bytes[i + 1] as char).to_digit(16),
                (bytes[i + 2] as char).to_digit(16),
            )
        {
            out.push((hi * 16 + lo) as u8);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
