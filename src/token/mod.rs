//! Signed token issuance and verification.
//!
//! Tokens are compact three-segment `header.payload.signature` strings
//! (base64url, no padding) signed with HMAC-SHA256. Three families exist —
//! access, refresh, and reset — distinguished on the wire only by the `typ`
//! claim and by which secret verifies them. Each family is bound to its own
//! independently configured secret and TTL.
//!
//! There is deliberately a single signing code path: `TokenCodec::sign` /
//! `TokenCodec::verify` serve every family and every caller.

pub mod claims;
pub mod codec;

pub use claims::{Claims, Role, TokenPair, TokenType};
pub use codec::{TokenCodec, extract_token, has_token_shape};
