//! Access log records and their two line formats.
//!
//! Production uses a key=value line modeled on the Heroku router log so the
//! aggregator can parse it without configuration. Everywhere else a short
//! human-readable line is easier to scan.
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use axum::{
    body::{Body, Bytes, HttpBody},
    http::{HeaderMap, HeaderName, Method, Uri},
};
use hyper::body::{Frame, SizeHint};

use crate::config::models::Environment;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const CF_RAY: HeaderName = HeaderName::from_static("cf-ray");
const FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Line format, fixed when the server is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLogFormat {
    /// Single-line key=value record
    Structured,
    /// `GET /path 200 1.234 ms - 512`
    Dev,
}

impl AccessLogFormat {
    pub fn for_environment(environment: Environment) -> Self {
        if environment.is_production() {
            AccessLogFormat::Structured
        } else {
            AccessLogFormat::Dev
        }
    }

    pub fn format(self, record: &AccessRecord) -> String {
        match self {
            AccessLogFormat::Structured => format!(
                "method={} path=\"{}\" host={} request_id={} cf_ray={} fwd={} status={} bytes={}",
                record.request.method,
                record.request.url,
                or_dash(record.request.host.as_deref()),
                or_dash(record.request.request_id.as_deref()),
                or_dash(record.request.cf_ray.as_deref()),
                or_dash(record.request.forwarded_for.as_deref()),
                record.status,
                or_dash(record.bytes.map(|b| b.to_string()).as_deref()),
            ),
            AccessLogFormat::Dev => format!(
                "{} {} {} {:.3} ms - {}",
                record.request.method,
                record.request.url,
                record.status,
                record.elapsed.as_secs_f64() * 1000.0,
                or_dash(record.bytes.map(|b| b.to_string()).as_deref()),
            ),
        }
    }
}

fn or_dash(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => "-",
    }
}

/// Request-side fields, captured before the pipeline runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    pub method: Method,
    /// Path plus query, as sent
    pub url: String,
    pub host: Option<String>,
    pub request_id: Option<String>,
    pub cf_ray: Option<String>,
    /// Client IP chain with all whitespace removed
    pub forwarded_for: Option<String>,
}

impl RequestSummary {
    pub fn capture(method: &Method, uri: &Uri, headers: &HeaderMap) -> Self {
        let header = |name: &HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            method: method.clone(),
            url: uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| uri.path().to_string()),
            host: header(&axum::http::header::HOST),
            request_id: header(&REQUEST_ID),
            cf_ray: header(&CF_RAY),
            forwarded_for: header(&FORWARDED_FOR)
                .map(|chain| chain.chars().filter(|c| !c.is_whitespace()).collect()),
        }
    }
}

/// One completed request/response cycle
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub request: RequestSummary,
    pub status: u16,
    pub bytes: Option<u64>,
    /// Time until the response head was ready
    pub elapsed: Duration,
}

/// Response body that writes the access record once it has been fully sent.
///
/// A body that fails or is dropped before its end is still logged, at warn level,
/// with the bytes that actually went out.
pub struct LoggedBody {
    inner: Body,
    pending: Option<(AccessLogFormat, AccessRecord)>,
    sent: u64,
}

impl LoggedBody {
    pub fn new(inner: Body, format: AccessLogFormat, record: AccessRecord) -> Self {
        Self {
            inner,
            pending: Some((format, record)),
            sent: 0,
        }
    }

    fn finish(&mut self, complete: bool) {
        let Some((format, mut record)) = self.pending.take() else {
            return;
        };

        if complete {
            tracing::info!(target: "access", "{}", format.format(&record));
        } else {
            record.bytes = Some(self.sent);
            tracing::warn!(target: "access", complete = false, "{}", format.format(&record));
        }
    }
}

impl HttpBody for LoggedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_frame(cx);
        match &poll {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.sent += data.len() as u64;
                }
            }
            Poll::Ready(Some(Err(_))) => this.finish(false),
            Poll::Ready(None) => this.finish(true),
            Poll::Pending => {}
        }
        poll
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for LoggedBody {
    fn drop(&mut self) {
        // The server may drop a drained body without polling it to `None`
        let complete = self.inner.is_end_stream();
        self.finish(complete);
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn record(headers: HeaderMap) -> AccessRecord {
        let uri: Uri = "/react@18.2.0/umd/react.production.min.js?meta".parse().unwrap();
        AccessRecord {
            request: RequestSummary::capture(&Method::GET, &uri, &headers),
            status: 200,
            bytes: Some(10737),
            elapsed: Duration::from_micros(1500),
        }
    }

    #[test]
    fn test_structured_line_with_all_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("unpkg.com"));
        headers.insert("x-request-id", HeaderValue::from_static("abc-123"));
        headers.insert("cf-ray", HeaderValue::from_static("7d1f-LHR"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1,\t10.0.0.2"),
        );

        let line = AccessLogFormat::Structured.format(&record(headers));
        assert_eq!(
            line,
            "method=GET path=\"/react@18.2.0/umd/react.production.min.js?meta\" host=unpkg.com \
             request_id=abc-123 cf_ray=7d1f-LHR fwd=203.0.113.7,10.0.0.1,10.0.0.2 status=200 bytes=10737"
        );
    }

    #[test]
    fn test_structured_line_missing_headers_use_dash() {
        let mut rec = record(HeaderMap::new());
        rec.bytes = None;
        let line = AccessLogFormat::Structured.format(&rec);
        assert!(line.contains("host=- request_id=- cf_ray=- fwd=- status=200 bytes=-"));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_dev_line() {
        let line = AccessLogFormat::Dev.format(&record(HeaderMap::new()));
        assert_eq!(
            line,
            "GET /react@18.2.0/umd/react.production.min.js?meta 200 1.500 ms - 10737"
        );
    }

    #[test]
    fn test_format_follows_environment() {
        assert_eq!(
            AccessLogFormat::for_environment(Environment::Production),
            AccessLogFormat::Structured
        );
        assert_eq!(
            AccessLogFormat::for_environment(Environment::Development),
            AccessLogFormat::Dev
        );
    }
}
