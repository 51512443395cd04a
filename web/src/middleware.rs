//! Request context: correlation ids and the per-request span.
//!
//! A caller may pass its own id in `X-Correlation-ID` (it must parse as a
//! UUID, anything else is replaced). Handlers read it with the
//! [`CorrelationId`] extractor; the response echoes it back so circulation
//! desk logs and engine logs can be joined.
//!
//! ```
//! use axum::{Router, routing::get};
//! use circulation_web::middleware::correlation_id_layer;
//!
//! let app: Router = Router::new()
//!     .route("/health", get(|| async { "ok" }))
//!     .layer(correlation_id_layer());
//! ```

use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{HeaderMap, HeaderValue, request::Parts},
    response::Response,
};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Request and response header carrying the correlation id.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Layer attaching a [`CorrelationId`] and a `circulation_request` span to
/// every request.
#[must_use]
pub const fn correlation_id_layer() -> RequestContextLayer {
    RequestContextLayer
}

/// Correlation id of the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// The id supplied by the caller, or a fresh one.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let supplied = headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok());
        Self(supplied.unwrap_or_else(Uuid::new_v4))
    }

    fn header_value(self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.0.to_string()).ok()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// Without the layer installed a fresh id is generated.
#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(match parts.extensions.get::<Self>() {
            Some(id) => *id,
            None => Self(Uuid::new_v4()),
        })
    }
}

/// See [`correlation_id_layer`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestContextLayer;

impl<S> Layer<S> for RequestContextLayer {
    type Service = RequestContext<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestContext { inner }
    }
}

/// Service produced by [`RequestContextLayer`].
#[derive(Clone, Debug)]
pub struct RequestContext<S> {
    inner: S,
}

type BoxedResponse<E> = Pin<Box<dyn Future<Output = Result<Response, E>> + Send>>;

impl<S> Service<Request> for RequestContext<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxedResponse<S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        let id = CorrelationId::from_headers(request.headers());
        let span = tracing::info_span!(
            "circulation_request",
            correlation_id = %id,
            method = %request.method(),
            path = request.uri().path(),
        );
        request.extensions_mut().insert(id);

        let pending = self.inner.call(request);
        Box::pin(
            async move {
                let mut response = pending.await?;
                tracing::debug!(status = response.status().as_u16(), "request finished");
                if let Some(value) = id.header_value() {
                    response.headers_mut().insert(CORRELATION_ID_HEADER, value);
                }
                Ok(response)
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, routing::get};
    use tower::ServiceExt;

    fn whoami() -> Router {
        Router::new()
            .route("/whoami", get(|id: CorrelationId| async move { id.to_string() }))
            .layer(correlation_id_layer())
    }

    fn request(id: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/whoami");
        if let Some(id) = id {
            builder = builder.header(CORRELATION_ID_HEADER, id);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn echoed(response: &Response) -> String {
        response.headers()[CORRELATION_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_from_headers_accepts_padded_uuid() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            CORRELATION_ID_HEADER,
            HeaderValue::from_str(&format!(" {id} ")).unwrap(),
        );

        assert_eq!(CorrelationId::from_headers(&headers), CorrelationId(id));
    }

    #[tokio::test]
    async fn test_caller_id_reaches_handler_and_response() {
        let id = Uuid::new_v4().to_string();

        let response = whoami().oneshot(request(Some(&id))).await.unwrap();

        assert_eq!(echoed(&response), id);
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(body, id.as_bytes());
    }

    #[tokio::test]
    async fn test_missing_or_garbled_id_is_replaced() {
        for supplied in [None, Some("desk-7")] {
            let response = whoami().oneshot(request(supplied)).await.unwrap();

            let id = echoed(&response);
            assert!(Uuid::parse_str(&id).is_ok(), "{supplied:?} gave {id}");
        }
    }

    #[tokio::test]
    async fn test_extractor_without_layer_still_yields_id() {
        let app = Router::new().route("/whoami", get(|id: CorrelationId| async move { id.to_string() }));

        let response = app.oneshot(request(None)).await.unwrap();

        assert!(response.headers().get(CORRELATION_ID_HEADER).is_none());
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert!(Uuid::parse_str(std::str::from_utf8(&body).unwrap()).is_ok());
    }
}
