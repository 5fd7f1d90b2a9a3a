//! Client address extraction and fingerprinting.
//!
//! The service normally sits behind a reverse proxy, so the socket address
//! is the proxy's, not the client's. `X-Forwarded-For` (first hop) wins,
//! then `X-Real-IP`, then the literal `"unknown"` so every request still
//! gets a rate-limit key.

use std::borrow::Cow;

use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Best-effort client IP from proxy headers.
pub fn client_ip(headers: &HeaderMap) -> Cow<'static, str> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        // First entry is the originating client; later hops are proxies
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Cow::Owned(first.to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return Cow::Owned(real_ip.to_string());
        }
    }

    Cow::Borrowed("unknown")
}

/// User agent string, or `"unknown"`.
pub fn user_agent(headers: &HeaderMap) -> Cow<'_, str> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(Cow::Borrowed)
        .unwrap_or(Cow::Borrowed("unknown"))
}

/// Composite rate-limit key: `ip:ua_hash:route:class`.
///
/// The user agent is hashed and truncated rather than embedded raw so keys
/// stay bounded in size and free of delimiter collisions.
pub fn rate_limit_key(headers: &HeaderMap, route: &str, class: &str) -> String {
    let ip = client_ip(headers);
    let ua_hash = hash_user_agent(&user_agent(headers));
    format!("{ip}:{ua_hash}:{route}:{class}")
}

fn hash_user_agent(ua: &str) -> String {
    let digest = Sha256::digest(ua.as_bytes());
    // 9 bytes of digest is plenty for key dispersion
    URL_SAFE_NO_PAD.encode(&digest[..9])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1, 10.0.0.2"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.1"));
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }

    #[test]
    fn test_real_ip_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(client_ip(&headers), "198.51.100.4");
    }

    #[test]
    fn test_unknown_when_no_headers() {
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn test_rate_limit_key_varies_by_user_agent() {
        let mut a = HeaderMap::new();
        a.insert("x-real-ip", HeaderValue::from_static("1.2.3.4"));
        a.insert(
            axum::http::header::USER_AGENT,
            HeaderValue::from_static("curl/8.0"),
        );

        let mut b = HeaderMap::new();
        b.insert("x-real-ip", HeaderValue::from_static("1.2.3.4"));
        b.insert(
            axum::http::header::USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0"),
        );

        let key_a = rate_limit_key(&a, "/login", "auth");
        let key_b = rate_limit_key(&b, "/login", "auth");
        assert_ne!(key_a, key_b);
        assert!(key_a.starts_with("1.2.3.4:"));
        assert!(key_a.ends_with(":/login:auth"));
    }
}
