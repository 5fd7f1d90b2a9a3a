//! Token payload types.
//!
//! These are internal domain models; the wire format is their JSON
//! serialization inside the token's payload segment.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Token families. The `typ` claim is authoritative: a correctly signed
/// token whose type does not match the expected use must be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Short-lived credential authorizing API calls on behalf of a subject.
    Access,
    /// Longer-lived credential used only to mint new access tokens.
    Refresh,
    /// Single-purpose credential scoping one password-reset flow.
    Reset,
}

impl TokenType {
    /// Stable lowercase name matching the serialized `typ` claim.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
            TokenType::Reset => "reset",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subject roles carried in access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    /// Whether a subject holding this role may use a route requiring
    /// `required`. Admins satisfy every requirement.
    pub fn satisfies(&self, required: Role) -> bool {
        match (self, required) {
            (Role::Admin, _) => true,
            (Role::User, Role::User) => true,
            (Role::User, Role::Admin) => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Admin => f.write_str("admin"),
        }
    }
}

/// Claims embedded in a signed token. Immutable once signed.
///
/// Access tokens carry the full set; refresh tokens carry only `sub` + `typ`
/// (they are never used for authorization, only to mint a new pair); reset
/// tokens carry only `email` + `typ`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Token family; authoritative for verification.
    pub typ: TokenType,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
}

/// An access/refresh pair issued atomically.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry (unix seconds), for client scheduling.
    pub expires_at: i64,
}
