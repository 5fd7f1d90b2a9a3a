//! The security pipeline, as one composable Tower layer.
//!
//! Every protected route group gets a [`SecurityLayer`] configured with
//! [`SecurityOptions`]. Per request, the layer runs:
//!
//! 1. shape validation
//! 2. rate limiting (when the group has a limit class)
//! 3. authentication and role checks (when required)
//! 4. body sanitization (mutating JSON requests)
//! 5. the inner handler
//! 6. response hardening headers
//! 7. audit logging and metrics
//!
//! Steps 6 and 7 run on *every* path, including early rejections, so a
//! rate-limited or unauthenticated response is hardened and logged exactly
//! like a successful one. The pipeline imposes no timeout of its own;
//! deadline enforcement belongs to the deployment's edge.

use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{Method, Request, Response, header};
use axum::response::IntoResponse;
use serde_json::Value;
use tower::{Layer, Service};

use crate::config::Config;
use crate::audit::AccessLogger;
use crate::error::SecurityError;
use crate::guard::sanitize_document;
use crate::middleware::headers::{apply_security_headers, path_requires_no_store};
use crate::middleware::ip;
use crate::middleware::shape::validate_request;
use crate::rate_limit::{LimitClass, RateLimitStore, check_rate_limit};
use crate::token::{Role, TokenCodec, TokenType, extract_token};

use std::sync::Arc;

/// Shared handles the pipeline needs on every request.
#[derive(Clone)]
pub struct SecurityContext {
    pub config: Arc<Config>,
    pub limiter: Arc<dyn RateLimitStore>,
    pub codec: Arc<TokenCodec>,
    pub audit: AccessLogger,
}

impl SecurityContext {
    pub fn new(
        config: Arc<Config>,
        limiter: Arc<dyn RateLimitStore>,
        codec: Arc<TokenCodec>,
        audit: AccessLogger,
    ) -> Self {
        Self {
            config,
            limiter,
            codec,
            audit,
        }
    }
}

/// Per-route-group pipeline policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityOptions {
    pub limit_class: Option<LimitClass>,
    pub require_auth: bool,
    pub require_role: Option<Role>,
    pub sanitize_body: bool,
    pub no_store: bool,
}

impl SecurityOptions {
    /// Unauthenticated API traffic: rate limited and sanitized.
    pub fn public_api() -> Self {
        Self {
            limit_class: Some(LimitClass::Api),
            sanitize_body: true,
            ..Self::default()
        }
    }

    /// Authenticated API traffic.
    pub fn authenticated() -> Self {
        Self {
            limit_class: Some(LimitClass::Api),
            require_auth: true,
            sanitize_body: true,
            ..Self::default()
        }
    }

    /// Login, refresh, and reset flows: tight limits, never cached.
    pub fn auth_flow() -> Self {
        Self {
            limit_class: Some(LimitClass::Auth),
            sanitize_body: true,
            no_store: true,
            ..Self::default()
        }
    }

    /// Payment operations: authenticated, tight limits, never cached.
    pub fn payment() -> Self {
        Self {
            limit_class: Some(LimitClass::Payment),
            require_auth: true,
            sanitize_body: true,
            no_store: true,
            ..Self::default()
        }
    }

    /// Media uploads: authenticated, upload limits.
    pub fn upload() -> Self {
        Self {
            limit_class: Some(LimitClass::Upload),
            require_auth: true,
            sanitize_body: true,
            ..Self::default()
        }
    }

    /// Admin routes: admin role required, never cached.
    pub fn admin() -> Self {
        Self {
            limit_class: Some(LimitClass::Admin),
            require_auth: true,
            require_role: Some(Role::Admin),
            sanitize_body: true,
            no_store: true,
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct SecurityLayer {
    context: SecurityContext,
    options: SecurityOptions,
}

impl SecurityLayer {
    pub fn new(context: SecurityContext, options: SecurityOptions) -> Self {
        Self { context, options }
    }
}

impl<S> Layer<S> for SecurityLayer {
    type Service = SecurityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityService {
            inner,
            context: self.context.clone(),
            options: self.options,
        }
    }
}

#[derive(Clone)]
pub struct SecurityService<S> {
    inner: S,
    context: SecurityContext,
    options: SecurityOptions,
}

impl<S> Service<Request<Body>> for SecurityService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let context = self.context.clone();
        let options = self.options;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let started = Instant::now();
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let client_ip = ip::client_ip(req.headers()).into_owned();
            let user_agent = ip::user_agent(req.headers()).into_owned();
            let no_store = options.no_store || path_requires_no_store(&path);

            let mut response = match apply_policies(&context, &options, req, &path).await {
                Ok(req) => inner.call(req).await?,
                Err(err) => err.into_response(),
            };

            apply_security_headers(response.headers_mut(), no_store);

            let status = response.status().as_u16();
            let elapsed = started.elapsed();
            context.audit.request(
                method.as_str(),
                &path,
                status,
                elapsed.as_millis(),
                &client_ip,
                &user_agent,
            );
            crate::metrics::record_request(method.as_str(), &path, status, elapsed.as_secs_f64());

            Ok(response)
        })
    }
}

/// Steps 1-4: everything that can reject before the handler runs.
async fn apply_policies(
    context: &SecurityContext,
    options: &SecurityOptions,
    mut req: Request<Body>,
    path: &str,
) -> Result<Request<Body>, SecurityError> {
    validate_request(req.method(), req.uri(), req.headers(), &context.config)?;

    if let Some(class) = options.limit_class {
        let key = ip::rate_limit_key(req.headers(), path, class.as_str());
        let decision = check_rate_limit(
            &context.limiter,
            &context.config.rate_limits,
            class,
            &key,
        );
        if !decision.allowed {
            return Err(SecurityError::RateLimitExceeded {
                class: class.as_str().to_string(),
                limit: decision.limit,
                remaining: decision.remaining,
                reset_time: decision.reset_time,
                retry_after: decision.retry_after,
            });
        }
    }

    if options.require_auth {
        let token = extract_token(req.headers(), &context.config.auth_cookie_name)
            .ok_or_else(|| {
                crate::metrics::record_auth_failure("missing_token");
                SecurityError::Authentication("no credentials presented".to_string())
            })?;
        let claims = context
            .codec
            .verify(&token, TokenType::Access)
            .ok_or_else(|| {
                crate::metrics::record_auth_failure("invalid_token");
                SecurityError::Authentication("invalid or expired token".to_string())
            })?;

        if let Some(required) = options.require_role {
            // A token without a role claim carries no privileges
            let role = claims.role.unwrap_or(Role::User);
            if !role.satisfies(required) {
                crate::metrics::record_auth_failure("insufficient_role");
                return Err(SecurityError::Authorization(format!(
                    "route requires the {required} role"
                )));
            }
        }

        req.extensions_mut().insert(claims);
    }

    if options.sanitize_body && is_mutating_json(&req) {
        req = sanitize_request_body(context, req).await?;
    }

    Ok(req)
}

fn is_mutating_json(req: &Request<Body>) -> bool {
    matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH)
        && req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"))
}

/// Buffer, clean, and re-attach a JSON request body.
///
/// Bodies that are not valid JSON pass through unchanged so the handler's
/// extractor produces its usual parse error instead of a sanitizer one.
async fn sanitize_request_body(
    context: &SecurityContext,
    req: Request<Body>,
) -> Result<Request<Body>, SecurityError> {
    let (mut parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, context.config.max_request_body_size)
        .await
        .map_err(|_| {
            SecurityError::Validation(format!(
                "request body exceeds {} bytes",
                context.config.max_request_body_size
            ))
        })?;

    let rebuilt = match serde_json::from_slice::<Value>(&bytes) {
        Ok(document) => {
            let cleaned = sanitize_document(&document, context.config.sanitize_max_depth)
                .inspect_err(|_| crate::metrics::record_sanitization_rejection())?;
            let encoded = serde_json::to_vec(&cleaned)
                .map_err(|e| SecurityError::Internal(format!("body re-encoding failed: {e}")))?;
            Body::from(encoded)
        }
        Err(_) => Body::from(bytes),
    };

    // The cleaned body may be shorter than the original
    parts.headers.remove(header::CONTENT_LENGTH);
    Ok(Request::from_parts(parts, rebuilt))
}
