use axum::extract::Request;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error type for monitoring sink setup
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MonitoringError {
    /// The DSN could not be parsed or is missing a required part
    #[error("Invalid DSN: {0}")]
    InvalidDsn(String),

    /// The HTTP client for the collector could not be built
    #[error("Client error: {0}")]
    Client(String),
}

/// Request metadata captured by [`MonitoringSink::instrument_request`] and attached
/// to the request as an extension, so that a later error can be reported with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// A single unhandled error, as forwarded by the error interceptor.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    /// Short message, e.g. the error's display form
    pub message: String,
    /// Full diagnostic detail (debug form, error chain)
    pub detail: String,
    pub request: Option<RequestContext>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn new(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: detail.into(),
            request: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_request(mut self, request: Option<RequestContext>) -> Self {
        self.request = request;
        self
    }
}

/// MonitoringSink defines the port for the external error collector.
///
/// Both hooks must be cheap and must never fail the request: delivery, if any, happens
/// in the background.
pub trait MonitoringSink: Send + Sync + 'static {
    /// Called first for every request, before any other stage runs.
    fn instrument_request(&self, req: &mut Request);

    /// Called once per unhandled error.
    fn capture_error(&self, event: ErrorEvent);
}
