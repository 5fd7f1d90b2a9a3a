//! HTTP handlers for the endpoints the gateway itself owns.

pub mod auth;
pub mod health;
