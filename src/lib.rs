//! Memoria gateway: the request security pipeline in front of the Memoria
//! API.
//!
//! Every request passes, in order, through shape validation, per-class rate
//! limiting, token authentication, and payload sanitization before reaching
//! a handler; every response is hardened and audit-logged on the way out.
//!
//! # Components
//!
//! - [`rate_limit`]: fixed-window limiting with independent classes and a
//!   pluggable counter store
//! - [`token`]: HMAC-signed access/refresh/reset tokens with per-family
//!   secrets
//! - [`guard`]: operator-injection defense for filters, updates, and
//!   aggregation pipelines
//! - [`transaction`]: coordinated commit/abort with guaranteed session
//!   cleanup
//! - [`audit`]: redacting access logger
//! - [`middleware`]: the pipeline itself as a Tower layer
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let config = Config::from_env()?;
//! let state = AppState::new(config);
//! state.spawn_cleanup_task();
//! let app = build_router(state);
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod state;
pub mod store;
pub mod token;
pub mod transaction;
pub mod utils;

pub use audit::AccessLogger;
pub use config::Config;
pub use error::{AppResult, SecurityError};
pub use routes::build_router;
pub use state::AppState;
