//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible
//! defaults for development — except token signing secrets, which are
//! required and validated unconditionally. In production, configure via
//! environment variables or a `.env` file.
//!
//! # Security Configuration
//!
//! - `ACCESS_TOKEN_SECRET` / `REFRESH_TOKEN_SECRET` / `RESET_TOKEN_SECRET`:
//!   independent signing secrets, each at least 32 bytes. Access and refresh
//!   secrets must differ so that compromise of one cannot forge the other.
//!   Missing or short secrets abort startup; there is no build-phase bypass.
//! - `CORS_ALLOWED_ORIGINS`: comma-separated allowed origins (default `*`
//!   for development only).
//!
//! # Rate Limiting
//!
//! Each limit class carries an independent `(window, max)` pair, overridable
//! via `<CLASS>_RATE_LIMIT_MAX` and `<CLASS>_RATE_LIMIT_WINDOW_SECS`
//! (e.g. `AUTH_RATE_LIMIT_MAX=5`).

use std::env;
use std::time::Duration;

use crate::error::{AppResult, SecurityError};
use crate::rate_limit::LimitPolicy;

/// Minimum acceptable length for a token signing secret, in bytes.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Per-class rate limit policies.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Login, refresh, reset flows: 5 requests / 15 minutes.
    pub auth: LimitPolicy,
    /// General API traffic: 100 requests / 15 minutes.
    pub api: LimitPolicy,
    /// Payment operations: 10 requests / hour.
    pub payment: LimitPolicy,
    /// Media/file uploads: 20 requests / 15 minutes.
    pub upload: LimitPolicy,
    /// Admin routes: 50 requests / 15 minutes.
    pub admin: LimitPolicy,
    /// Interval between sweeps that delete expired counter records.
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth: LimitPolicy::new(5, Duration::from_secs(15 * 60)),
            api: LimitPolicy::new(100, Duration::from_secs(15 * 60)),
            payment: LimitPolicy::new(10, Duration::from_secs(60 * 60)),
            upload: LimitPolicy::new(20, Duration::from_secs(15 * 60)),
            admin: LimitPolicy::new(50, Duration::from_secs(15 * 60)),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    // =========================================================================
    // Token Configuration
    // =========================================================================
    /// Signing secret for access tokens (required, >= 32 bytes)
    pub access_token_secret: String,

    /// Signing secret for refresh tokens (required, >= 32 bytes,
    /// independent of the access secret)
    pub refresh_token_secret: String,

    /// Signing secret for password-reset tokens (required, >= 32 bytes)
    pub reset_token_secret: String,

    /// Access token lifetime (default: 7 days)
    pub access_token_ttl: Duration,

    /// Refresh token lifetime (default: 30 days)
    pub refresh_token_ttl: Duration,

    /// Reset token lifetime (default: 1 hour)
    pub reset_token_ttl: Duration,

    /// Cookie consulted when no Authorization header is present
    pub auth_cookie_name: String,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Per-class limits and the cleanup sweep interval
    pub rate_limits: RateLimitConfig,

    // =========================================================================
    // Request Shape & Sanitization Limits
    // =========================================================================
    /// Maximum request body size in bytes (default: 1MB)
    pub max_request_body_size: usize,

    /// Maximum accepted URL length, path plus query (default: 2048)
    pub max_url_length: usize,

    /// Maximum nesting depth the sanitizer will recurse into (default: 8)
    pub sanitize_max_depth: usize,

    /// Default page size when a query specifies none (default: 10)
    pub query_default_limit: u32,

    /// Hard ceiling for a requested page size (default: 1000)
    pub query_max_limit: u32,

    /// Hard ceiling for a requested skip offset (default: 100,000)
    pub query_max_skip: u64,

    // =========================================================================
    // Security / Observability Configuration
    // =========================================================================
    /// Comma-separated list of allowed CORS origins ("*" allows any)
    pub cors_allowed_origins: Vec<String>,

    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `SecurityError::Config` if any value is invalid or if token
    /// secrets are missing or too short. Secret validation always runs —
    /// there is no conditional bypass for build or test phases.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,

            // Tokens
            access_token_secret: Self::require_env("ACCESS_TOKEN_SECRET")?,
            refresh_token_secret: Self::require_env("REFRESH_TOKEN_SECRET")?,
            reset_token_secret: Self::require_env("RESET_TOKEN_SECRET")?,
            access_token_ttl: Duration::from_secs(Self::parse_env(
                "ACCESS_TOKEN_TTL_SECS",
                7 * 24 * 60 * 60,
            )?),
            refresh_token_ttl: Duration::from_secs(Self::parse_env(
                "REFRESH_TOKEN_TTL_SECS",
                30 * 24 * 60 * 60,
            )?),
            reset_token_ttl: Duration::from_secs(Self::parse_env(
                "RESET_TOKEN_TTL_SECS",
                60 * 60,
            )?),
            auth_cookie_name: env::var("AUTH_COOKIE_NAME")
                .unwrap_or_else(|_| "memoria_token".to_string()),

            // Rate limiting
            rate_limits: Self::parse_rate_limits()?,

            // Shape & sanitization
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,
            max_url_length: Self::parse_env("MAX_URL_LENGTH", 2048)?,
            sanitize_max_depth: Self::parse_env("SANITIZE_MAX_DEPTH", 8)?,
            query_default_limit: Self::parse_env("QUERY_DEFAULT_LIMIT", 10)?,
            query_max_limit: Self::parse_env("QUERY_MAX_LIMIT", 1000)?,
            query_max_skip: Self::parse_env("QUERY_MAX_SKIP", 100_000)?,

            // Security / observability
            cors_allowed_origins: Self::parse_cors_origins(),
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `SecurityError::Config` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        for (name, secret) in [
            ("ACCESS_TOKEN_SECRET", &self.access_token_secret),
            ("REFRESH_TOKEN_SECRET", &self.refresh_token_secret),
            ("RESET_TOKEN_SECRET", &self.reset_token_secret),
        ] {
            if secret.len() < MIN_SECRET_LENGTH {
                return Err(SecurityError::Config(format!(
                    "{name} must be at least {MIN_SECRET_LENGTH} bytes (got {})",
                    secret.len()
                )));
            }
        }

        // Independent secrets: compromise of one must not forge the other
        if self.access_token_secret == self.refresh_token_secret {
            return Err(SecurityError::Config(
                "ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(SecurityError::Config(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.query_max_limit == 0 {
            return Err(SecurityError::Config(
                "QUERY_MAX_LIMIT must be greater than 0".to_string(),
            ));
        }

        if self.query_default_limit > self.query_max_limit {
            return Err(SecurityError::Config(format!(
                "QUERY_DEFAULT_LIMIT ({}) must be <= QUERY_MAX_LIMIT ({})",
                self.query_default_limit, self.query_max_limit
            )));
        }

        if self.sanitize_max_depth == 0 {
            return Err(SecurityError::Config(
                "SANITIZE_MAX_DEPTH must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Read a required environment variable.
    fn require_env(name: &str) -> AppResult<String> {
        env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SecurityError::Config(format!("{name} is required but not set")))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr + ToString,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| SecurityError::Config(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse per-class rate limit overrides from the environment.
    fn parse_rate_limits() -> AppResult<RateLimitConfig> {
        let defaults = RateLimitConfig::default();
        Ok(RateLimitConfig {
            auth: Self::parse_limit("AUTH", defaults.auth)?,
            api: Self::parse_limit("API", defaults.api)?,
            payment: Self::parse_limit("PAYMENT", defaults.payment)?,
            upload: Self::parse_limit("UPLOAD", defaults.upload)?,
            admin: Self::parse_limit("ADMIN", defaults.admin)?,
            cleanup_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_CLEANUP_INTERVAL_SECS",
                5 * 60,
            )?),
        })
    }

    /// Parse one class's `(max, window)` pair, falling back to its default.
    fn parse_limit(prefix: &str, default: LimitPolicy) -> AppResult<LimitPolicy> {
        let max = Self::parse_env(
            &format!("{prefix}_RATE_LIMIT_MAX"),
            default.max_requests,
        )?;
        let window_secs = Self::parse_env(
            &format!("{prefix}_RATE_LIMIT_WINDOW_SECS"),
            default.window.as_secs(),
        )?;
        if max == 0 {
            return Err(SecurityError::Config(format!(
                "{prefix}_RATE_LIMIT_MAX must be greater than 0"
            )));
        }
        Ok(LimitPolicy::new(max, Duration::from_secs(window_secs)))
    }

    /// Parse CORS allowed origins from environment variable.
    fn parse_cors_origins() -> Vec<String> {
        env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Default configuration for testing and development.
///
/// Carries long, obviously-fake secrets so unit tests can construct a config
/// without touching the environment. Production deployments must use
/// `Config::from_env()`, which never falls back to these values.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            access_token_secret: "dev-only-access-secret-0123456789abcdef0123456789abcdef"
                .to_string(),
            refresh_token_secret: "dev-only-refresh-secret-0123456789abcdef0123456789abcdef"
                .to_string(),
            reset_token_secret: "dev-only-reset-secret-0123456789abcdef0123456789abcdef"
                .to_string(),
            access_token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            refresh_token_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            reset_token_ttl: Duration::from_secs(60 * 60),
            auth_cookie_name: "memoria_token".to_string(),
            rate_limits: RateLimitConfig::default(),
            max_request_body_size: 1024 * 1024,
            max_url_length: 2048,
            sanitize_max_depth: 8,
            query_default_limit: 10,
            query_max_limit: 1000,
            query_max_skip: 100_000,
            cors_allowed_origins: vec!["*".to_string()],
            log_level: "info".to_string(),
            metrics_port: 9090,
        }
    }
}
