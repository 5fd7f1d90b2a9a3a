//! Tower middleware for the request security pipeline.
//!
//! [`security::SecurityLayer`] is the pipeline itself; the sibling modules
//! hold the individual checks it composes plus the standalone request-id
//! layer applied router-wide.

pub mod headers;
pub mod ip;
pub mod request_id;
pub mod security;
pub mod shape;

pub use request_id::RequestIdLayer;
pub use security::{SecurityContext, SecurityLayer, SecurityOptions};
