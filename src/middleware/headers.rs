//! Response hardening headers.
//!
//! Applied to every response the pipeline produces, including early
//! rejections. The set is fixed; only the caching directive varies, with
//! `no-store` forced on sensitive route groups.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};

static PERMISSIONS_POLICY_HEADER: HeaderName = HeaderName::from_static("permissions-policy");

const CSP: &str = "default-src 'self'; script-src 'self'; object-src 'none'; \
                   base-uri 'self'; frame-ancestors 'none'";
const PERMISSIONS_POLICY: &str = "camera=(), microphone=(), geolocation=(), payment=()";
const HSTS: &str = "max-age=31536000; includeSubDomains";

/// Route prefixes that must never be cached by any intermediary.
const NO_STORE_PREFIXES: [&str; 3] = ["/auth", "/payment", "/admin"];

/// Whether responses for `path` carry `Cache-Control: no-store` regardless
/// of per-route options.
pub fn path_requires_no_store(path: &str) -> bool {
    NO_STORE_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// Apply the hardening header set to a response.
pub fn apply_security_headers(headers: &mut HeaderMap, no_store: bool) {
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CSP),
    );
    headers.insert(
        PERMISSIONS_POLICY_HEADER.clone(),
        HeaderValue::from_static(PERMISSIONS_POLICY),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static(HSTS),
    );

    if no_store {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_full_header_set_applied() {
        let mut headers = HeaderMap::new();
        apply_security_headers(&mut headers, false);

        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(headers[header::X_XSS_PROTECTION], "1; mode=block");
        assert_eq!(
            headers[header::REFERRER_POLICY],
            "strict-origin-when-cross-origin"
        );
        assert!(headers.contains_key(header::CONTENT_SECURITY_POLICY));
        assert!(headers.contains_key("permissions-policy"));
        assert_eq!(headers[header::STRICT_TRANSPORT_SECURITY], HSTS);
        assert!(!headers.contains_key(header::CACHE_CONTROL));
    }

    #[test]
    fn test_no_store_applied_when_flagged() {
        let mut headers = HeaderMap::new();
        apply_security_headers(&mut headers, true);
        assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    }

    #[test]
    fn test_sensitive_prefixes() {
        assert!(path_requires_no_store("/auth/login"));
        assert!(path_requires_no_store("/payment/charge"));
        assert!(path_requires_no_store("/admin/users"));
        assert!(!path_requires_no_store("/memories"));
    }
}
