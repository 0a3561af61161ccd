//! The Axum middleware stages of the request pipeline.
//!
//! Each function is a small composable layer attached through
//! `middleware::from_fn` / `from_fn_with_state`. Registration order is fixed by
//! [`crate::core::pipeline::build_router`]; the functions here only implement
//! the individual stages.
use std::{any::Any, sync::Arc, time::Instant};

use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::cors::{AllowHeaders, Any as AnyOrigin, CorsLayer};

use crate::{
    core::access_log::{AccessLogFormat, AccessRecord, LoggedBody, RequestSummary},
    ports::monitoring::{ErrorEvent, MonitoringSink, RequestContext},
};

/// Body of every 500 the client sees. Error details never leave the server.
pub const INTERNAL_ERROR_BODY: &str = "<p>Internal Server Error</p>";

/// Marker attached to a response by a stage that failed.
///
/// The failing stage cannot answer the client itself; it hands the failure back up the
/// chain inside the response extensions, and [`error_interceptor_middleware`] turns it
/// into the generic 500.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    message: String,
    detail: String,
}

impl HandlerFailure {
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut detail = format!("{err:?}");
        let mut source = err.source();
        while let Some(cause) = source {
            detail.push_str(&format!("\n\nCaused by: {cause}"));
            source = cause.source();
        }

        Self {
            message: err.to_string(),
            detail,
        }
    }

    pub fn panicked(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else {
            "Unknown panic payload".to_string()
        };

        Self {
            detail: format!("handler panicked: {message}"),
            message,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl IntoResponse for HandlerFailure {
    fn into_response(self) -> Response {
        let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// `CatchPanicLayer` hook: a panic becomes a [`HandlerFailure`] like any other error.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    HandlerFailure::panicked(payload.as_ref()).into_response()
}

/// Runs the monitoring sink's per-request hook before anything else sees the request.
pub async fn monitoring_middleware(
    State(monitor): State<Arc<dyn MonitoringSink>>,
    mut req: Request,
    next: Next,
) -> Response {
    monitor.instrument_request(&mut req);
    next.run(req).await
}

/// Remove headers that advertise the server implementation.
pub async fn strip_fingerprint_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.remove("x-powered-by");
    headers.remove(header::SERVER);
    response
}

/// Log one line per request in the format chosen at startup, once the response
/// body has been sent.
pub async fn access_log_middleware(
    State(format): State<AccessLogFormat>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let summary = RequestSummary::capture(req.method(), req.uri(), req.headers());

    let response = next.run(req).await;

    let bytes = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .or_else(|| response.body().size_hint().exact());

    let record = AccessRecord {
        request: summary,
        status: response.status().as_u16(),
        bytes,
        elapsed: start.elapsed(),
    };

    response.map(|body| Body::new(LoggedBody::new(body, format, record)))
}

/// Turn any downstream failure into the generic 500 and report it.
///
/// The failure is logged with its full detail and forwarded unchanged to the
/// monitoring sink; the client only ever gets [`INTERNAL_ERROR_BODY`].
pub async fn error_interceptor_middleware(
    State(monitor): State<Arc<dyn MonitoringSink>>,
    req: Request,
    next: Next,
) -> Response {
    let context = req.extensions().get::<RequestContext>().cloned();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let response = next.run(req).await;

    let Some(failure) = response.extensions().get::<HandlerFailure>().cloned() else {
        return response;
    };

    tracing::error!(
        method = %method,
        uri = %uri,
        error = %failure.message,
        "Request failed: {}",
        failure.detail
    );
    monitor.capture_error(ErrorEvent::new(failure.message, failure.detail).with_request(context));

    internal_error_response(response)
}

/// Keep the failed response's headers (CORS etc.) but replace status and body.
fn internal_error_response(failed: Response) -> Response {
    let (mut parts, _) = failed.into_parts();
    parts.status = StatusCode::INTERNAL_SERVER_ERROR;
    parts.extensions.remove::<HandlerFailure>();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.remove(header::CACHE_CONTROL);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    Response::from_parts(parts, Body::from(INTERNAL_ERROR_BODY))
}

/// Permissive CORS: any origin, the common methods, and whatever headers the
/// preflight asks for. Preflights are answered here.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::PUT,
            Method::PATCH,
            Method::POST,
            Method::DELETE,
        ])
        .allow_headers(AllowHeaders::mirror_request())
}
