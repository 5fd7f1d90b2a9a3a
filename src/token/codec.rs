//! HMAC-SHA256 token signing and verification.
//!
//! # Wire Format
//!
//! `base64url(header) . base64url(payload) . base64url(hmac_sha256(secret, header.payload))`
//!
//! All three segments use the URL-safe alphabet without padding. The header
//! is the constant `{"alg":"HS256","typ":"JWT"}`; the payload is the JSON
//! serialization of [`Claims`].
//!
//! # Verification Order
//!
//! Structure, then signature, then expiry, then type — in that order, so a
//! malformed or forged token is rejected before any claim is trusted.
//! Signature comparison is constant-time. Verification never panics on
//! malformed input; any failure yields `None`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::config::Config;
use crate::error::{AppResult, SecurityError};
use crate::store::SubjectDirectory;
use crate::token::claims::{Claims, Role, TokenPair, TokenType};

type HmacSha256 = Hmac<Sha256>;

const HEADER_B64: &str = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9"; // {"alg":"HS256","typ":"JWT"}

/// Quick structural check: exactly three non-empty dot-separated segments.
///
/// Used to distinguish "not a token at all" from "a token that failed
/// verification" without doing any cryptography.
pub fn has_token_shape(candidate: &str) -> bool {
    let mut segments = candidate.split('.');
    let shaped = segments.next().is_some_and(|s| !s.is_empty())
        && segments.next().is_some_and(|s| !s.is_empty())
        && segments.next().is_some_and(|s| !s.is_empty());
    shaped && segments.next().is_none()
}

/// Pull a bearer credential out of request headers.
///
/// The `Authorization: Bearer <token>` header wins; when absent (or not a
/// bearer scheme), the named cookie is consulted. The scheme prefix is
/// matched case-insensitively on its first letter, accepting the `bearer`
/// spelling some clients send.
pub fn extract_token(headers: &axum::http::HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(auth) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "));
        if let Some(token) = token {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    let cookies = headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())?;
    for pair in cookies.split(';') {
        if let Some((name, value)) = pair.trim().split_once('=')
            && name.trim() == cookie_name
        {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Signs and verifies all three token families.
///
/// Each family is bound to its own secret and TTL; the codec holds all of
/// them so that every caller goes through the same signing path.
#[derive(Clone)]
pub struct TokenCodec {
    access_secret: Vec<u8>,
    refresh_secret: Vec<u8>,
    reset_secret: Vec<u8>,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
    reset_ttl: chrono::Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secrets never appear in debug output
        f.debug_struct("TokenCodec")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("reset_ttl", &self.reset_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec from validated configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            access_secret: config.access_token_secret.as_bytes().to_vec(),
            refresh_secret: config.refresh_token_secret.as_bytes().to_vec(),
            reset_secret: config.reset_token_secret.as_bytes().to_vec(),
            access_ttl: chrono::Duration::from_std(config.access_token_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(7)),
            refresh_ttl: chrono::Duration::from_std(config.refresh_token_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(30)),
            reset_ttl: chrono::Duration::from_std(config.reset_token_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
        }
    }

    fn secret_for(&self, typ: TokenType) -> &[u8] {
        match typ {
            TokenType::Access => &self.access_secret,
            TokenType::Refresh => &self.refresh_secret,
            TokenType::Reset => &self.reset_secret,
        }
    }

    fn ttl_for(&self, typ: TokenType) -> chrono::Duration {
        match typ {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
            TokenType::Reset => self.reset_ttl,
        }
    }

    fn mac(secret: &[u8], signing_input: &[u8]) -> AppResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| SecurityError::Internal("invalid HMAC key length".to_string()))?;
        mac.update(signing_input);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Sign `claims` with the secret belonging to `claims.typ`.
    pub fn sign(&self, claims: &Claims) -> AppResult<String> {
        let payload = serde_json::to_vec(claims)
            .map_err(|e| SecurityError::Internal(format!("claims serialization failed: {e}")))?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);

        let signing_input = format!("{HEADER_B64}.{payload_b64}");
        let sig = Self::mac(self.secret_for(claims.typ), signing_input.as_bytes())?;
        let sig_b64 = URL_SAFE_NO_PAD.encode(sig);

        Ok(format!("{signing_input}.{sig_b64}"))
    }

    /// Verify `token` as an `expected`-type credential.
    ///
    /// Returns the claims only when the structure parses, the signature
    /// matches the expected type's secret, the token has not expired, and
    /// the `typ` claim equals `expected`. Each failure mode is logged at
    /// debug level; callers receive a uniform `None`.
    pub fn verify(&self, token: &str, expected: TokenType) -> Option<Claims> {
        let mut segments = token.split('.');
        let (header, payload, signature) =
            match (segments.next(), segments.next(), segments.next(), segments.next()) {
                (Some(h), Some(p), Some(s), None)
                    if !h.is_empty() && !p.is_empty() && !s.is_empty() =>
                {
                    (h, p, s)
                }
                _ => {
                    debug!("Token rejected: malformed structure");
                    return None;
                }
            };

        let signing_input = format!("{header}.{payload}");
        let expected_sig = Self::mac(self.secret_for(expected), signing_input.as_bytes()).ok()?;
        let provided_sig = match URL_SAFE_NO_PAD.decode(signature) {
            Ok(s) => s,
            Err(_) => {
                debug!("Token rejected: signature is not valid base64url");
                return None;
            }
        };
        if provided_sig.ct_eq(&expected_sig).unwrap_u8() != 1 {
            debug!(typ = %expected, "Token rejected: signature mismatch");
            return None;
        }

        let payload_bytes = match URL_SAFE_NO_PAD.decode(payload) {
            Ok(b) => b,
            Err(_) => {
                debug!("Token rejected: payload is not valid base64url");
                return None;
            }
        };
        let claims: Claims = match serde_json::from_slice(&payload_bytes) {
            Ok(c) => c,
            Err(_) => {
                debug!("Token rejected: payload is not a valid claims document");
                return None;
            }
        };

        if claims.exp <= Utc::now().timestamp() {
            debug!(sub = %claims.sub, typ = %claims.typ, "Token rejected: expired");
            return None;
        }

        if claims.typ != expected {
            debug!(
                got = %claims.typ,
                expected = %expected,
                "Token rejected: type mismatch"
            );
            return None;
        }

        Some(claims)
    }

    /// Issue an access/refresh pair for `subject`.
    ///
    /// The refresh token carries only the subject and type; profile data is
    /// re-resolved at rotation time so stale claims can never be laundered
    /// through a refresh.
    pub fn generate_token_pair(
        &self,
        subject: &str,
        email: Option<&str>,
        role: Option<Role>,
    ) -> AppResult<TokenPair> {
        let now = Utc::now().timestamp();
        let access_exp = now + self.ttl_for(TokenType::Access).num_seconds();

        let access = self.sign(&Claims {
            sub: subject.to_string(),
            email: email.map(str::to_string),
            role,
            typ: TokenType::Access,
            iat: now,
            exp: access_exp,
        })?;

        let refresh = self.sign(&Claims {
            sub: subject.to_string(),
            email: None,
            role: None,
            typ: TokenType::Refresh,
            iat: now,
            exp: now + self.ttl_for(TokenType::Refresh).num_seconds(),
        })?;

        Ok(TokenPair {
            access_token: access,
            refresh_token: refresh,
            expires_at: access_exp,
        })
    }

    /// Rotate a refresh token into a fresh pair.
    ///
    /// The subject's current profile is looked up before issuing: a subject
    /// that no longer resolves (deleted, disabled) cannot refresh, and role
    /// or email changes take effect on the next rotation.
    pub async fn refresh_access_token(
        &self,
        directory: &dyn SubjectDirectory,
        refresh_token: &str,
    ) -> AppResult<TokenPair> {
        let claims = self
            .verify(refresh_token, TokenType::Refresh)
            .ok_or_else(|| {
                SecurityError::Authentication("invalid or expired refresh token".to_string())
            })?;

        let profile = directory
            .resolve(&claims.sub)
            .await?
            .ok_or_else(|| SecurityError::Authentication("unknown subject".to_string()))?;

        self.generate_token_pair(&profile.subject, profile.email.as_deref(), profile.role)
    }

    /// Issue a password-reset token bound to `email` only.
    pub fn issue_reset_token(&self, email: &str) -> AppResult<String> {
        let now = Utc::now().timestamp();
        self.sign(&Claims {
            sub: email.to_string(),
            email: Some(email.to_string()),
            role: None,
            typ: TokenType::Reset,
            iat: now,
            exp: now + self.ttl_for(TokenType::Reset).num_seconds(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, header};

    fn codec() -> TokenCodec {
        TokenCodec::from_config(&Config::default())
    }

    fn access_claims(exp_offset: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: "user-42".to_string(),
            email: Some("ab@test.com".to_string()),
            role: Some(Role::User),
            typ: TokenType::Access,
            iat: now,
            exp: now + exp_offset,
        }
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let codec = codec();
        let claims = access_claims(3600);

        let token = codec.sign(&claims).unwrap();
        assert!(has_token_shape(&token));

        let verified = codec.verify(&token, TokenType::Access).unwrap();
        assert_eq!(verified, claims);
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let codec = codec();
        let token = codec.sign(&access_claims(3600)).unwrap();

        let mut forged_claims = access_claims(3600);
        forged_claims.role = Some(Role::Admin);
        let forged_payload =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        let sig = token.rsplit('.').next().unwrap();
        let forged = format!("{HEADER_B64}.{forged_payload}.{sig}");

        assert!(codec.verify(&forged, TokenType::Access).is_none());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let codec_a = codec();
        let codec_b = TokenCodec::from_config(&Config {
            access_token_secret: "another-access-secret-0123456789abcdef0123456789".to_string(),
            ..Config::default()
        });

        let token = codec_a.sign(&access_claims(3600)).unwrap();
        assert!(codec_b.verify(&token, TokenType::Access).is_none());
    }

    #[test]
    fn test_expired_token_rejected() {
        let codec = codec();
        let token = codec.sign(&access_claims(-1)).unwrap();
        assert!(codec.verify(&token, TokenType::Access).is_none());
    }

    #[test]
    fn test_type_isolation_refresh_not_accepted_as_access() {
        let codec = codec();
        let pair = codec
            .generate_token_pair("user-42", Some("ab@test.com"), Some(Role::User))
            .unwrap();

        // Different secret, so the signature check alone rejects it
        assert!(codec.verify(&pair.refresh_token, TokenType::Access).is_none());
        assert!(
            codec
                .verify(&pair.refresh_token, TokenType::Refresh)
                .is_some()
        );
    }

    #[test]
    fn test_verify_never_panics_on_garbage() {
        let codec = codec();
        for garbage in [
            "",
            ".",
            "..",
            "a.b",
            "a.b.c.d",
            "!!!.###.$$$",
            "eyJhbGciOiJIUzI1NiJ9..sig",
        ] {
            assert!(codec.verify(garbage, TokenType::Access).is_none());
        }
    }

    #[test]
    fn test_refresh_token_carries_minimal_claims() {
        let codec = codec();
        let pair = codec
            .generate_token_pair("user-42", Some("ab@test.com"), Some(Role::Admin))
            .unwrap();

        let claims = codec.verify(&pair.refresh_token, TokenType::Refresh).unwrap();
        assert_eq!(claims.sub, "user-42");
        assert!(claims.email.is_none());
        assert!(claims.role.is_none());
    }

    #[test]
    fn test_reset_token_bound_to_email() {
        let codec = codec();
        let token = codec.issue_reset_token("ab@test.com").unwrap();
        let claims = codec.verify(&token, TokenType::Reset).unwrap();
        assert_eq!(claims.email.as_deref(), Some("ab@test.com"));
        assert!(claims.role.is_none());
        assert!(codec.verify(&token, TokenType::Access).is_none());
    }

    #[test]
    fn test_has_token_shape() {
        assert!(has_token_shape("a.b.c"));
        assert!(!has_token_shape("a.b"));
        assert!(!has_token_shape("a.b.c.d"));
        assert!(!has_token_shape("a..c"));
        assert!(!has_token_shape(""));
    }

    #[test]
    fn test_extract_prefers_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer header-token"),
        );
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("memoria_token=cookie-token"),
        );
        assert_eq!(
            extract_token(&headers, "memoria_token").as_deref(),
            Some("header-token")
        );
    }

    #[test]
    fn test_extract_lowercase_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("bearer lowercase-token"),
        );
        assert_eq!(
            extract_token(&headers, "memoria_token").as_deref(),
            Some("lowercase-token")
        );
    }

    #[test]
    fn test_extract_falls_back_to_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("other=x; memoria_token=cookie-token; third=y"),
        );
        assert_eq!(
            extract_token(&headers, "memoria_token").as_deref(),
            Some("cookie-token")
        );
    }

    #[test]
    fn test_extract_nothing_present() {
        let headers = HeaderMap::new();
        assert!(extract_token(&headers, "memoria_token").is_none());
    }
}
