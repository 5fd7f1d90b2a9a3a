//! Request ID propagation.
//!
//! Incoming `X-Request-Id` headers are honored so upstream correlation ids
//! survive; requests without one get a fresh UUIDv4. The id is echoed on the
//! response and available to handlers through the request headers.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::debug;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

static UNKNOWN_REQUEST_ID: HeaderValue = HeaderValue::from_static("unknown");

#[derive(Clone, Default)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestIdService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let request_id = incoming_or_fresh_id(&req);

        req.headers_mut().insert(
            REQUEST_ID_HEADER,
            request_id
                .parse()
                .unwrap_or_else(|_| UNKNOWN_REQUEST_ID.clone()),
        );
        debug!(request_id = %request_id, "Processing request");

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let mut response = inner.call(req).await?;
            response.headers_mut().insert(
                REQUEST_ID_HEADER,
                request_id
                    .parse()
                    .unwrap_or_else(|_| UNKNOWN_REQUEST_ID.clone()),
            );
            Ok(response)
        })
    }
}

fn incoming_or_fresh_id<B>(req: &Request<B>) -> String {
    if let Some(value) = req.headers().get(REQUEST_ID_HEADER)
        && let Ok(value) = value.to_str()
        && !value.is_empty()
    {
        return value.to_string();
    }
    Uuid::new_v4().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_incoming_id_preserved() {
        let req = Request::builder()
            .header("x-request-id", "corr-123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(incoming_or_fresh_id(&req), "corr-123");
    }

    #[test]
    fn test_fresh_id_is_uuid() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert!(Uuid::parse_str(&incoming_or_fresh_id(&req)).is_ok());
    }
}
