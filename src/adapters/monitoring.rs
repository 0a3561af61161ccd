//! Monitoring sink implementations.
//!
//! [`NoopMonitor`] is what a server gets when no DSN is configured. [`SentryMonitor`]
//! speaks the Sentry store protocol over plain HTTPS: the request hook records a
//! small context for each request, and captured errors are posted from a background
//! task so reporting never delays the response.
use std::{sync::Arc, time::Duration};

use axum::{extract::Request, http::header};
use reqwest::Client;
use serde_json::{Value, json};
use url::Url;

use crate::{
    config::models::{Environment, ServerConfig},
    ports::monitoring::{ErrorEvent, MonitoringError, MonitoringSink, RequestContext},
};

/// Headers never copied into a request context
const REDACTED_HEADERS: [header::HeaderName; 3] = [
    header::COOKIE,
    header::AUTHORIZATION,
    header::PROXY_AUTHORIZATION,
];

/// Build the sink selected by the configuration: Sentry when a DSN is set, no-op otherwise.
pub fn from_config(config: &ServerConfig) -> Result<Arc<dyn MonitoringSink>, MonitoringError> {
    match &config.sentry_dsn {
        Some(dsn) => {
            let monitor = SentryMonitor::new(dsn, config.environment, &config.id)?;
            tracing::info!(collector = %monitor.dsn.store_url(), "Error monitoring enabled");
            Ok(Arc::new(monitor))
        }
        None => Ok(Arc::new(NoopMonitor)),
    }
}

/// Sink used when monitoring is not configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl MonitoringSink for NoopMonitor {
    fn instrument_request(&self, _req: &mut Request) {}

    fn capture_error(&self, _event: ErrorEvent) {}
}

/// Parsed form of `<scheme>://<public_key>[:<secret>]@<host>[:<port>]/[<prefix>/]<project_id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentryDsn {
    scheme: String,
    public_key: String,
    secret_key: Option<String>,
    host: String,
    port: Option<u16>,
    path_prefix: String,
    project_id: String,
}

impl SentryDsn {
    pub fn parse(dsn: &str) -> Result<Self, MonitoringError> {
        let url = Url::parse(dsn).map_err(|e| MonitoringError::InvalidDsn(e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(MonitoringError::InvalidDsn(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        if url.username().is_empty() {
            return Err(MonitoringError::InvalidDsn("missing public key".to_string()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| MonitoringError::InvalidDsn("missing host".to_string()))?;

        let path = url.path().trim_end_matches('/');
        let (prefix, project_id) = path.rsplit_once('/').unwrap_or(("", path));
        if project_id.is_empty() {
            return Err(MonitoringError::InvalidDsn("missing project id".to_string()));
        }

        Ok(Self {
            scheme: url.scheme().to_string(),
            public_key: url.username().to_string(),
            secret_key: url.password().map(str::to_string),
            host: host.to_string(),
            port: url.port(),
            path_prefix: prefix.to_string(),
            project_id: project_id.to_string(),
        })
    }

    /// Endpoint events are posted to
    pub fn store_url(&self) -> String {
        let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();
        format!(
            "{}://{}{}{}/api/{}/store/",
            self.scheme, self.host, port, self.path_prefix, self.project_id
        )
    }

    /// Value of the `X-Sentry-Auth` header
    pub fn auth_header(&self, timestamp: i64) -> String {
        let mut value = format!(
            "Sentry sentry_version=7, sentry_client=edgeway/{}, sentry_timestamp={}, sentry_key={}",
            env!("CARGO_PKG_VERSION"),
            timestamp,
            self.public_key
        );
        if let Some(secret) = &self.secret_key {
            value.push_str(&format!(", sentry_secret={secret}"));
        }
        value
    }
}

/// Sink that reports errors to a Sentry-compatible collector.
pub struct SentryMonitor {
    dsn: SentryDsn,
    environment: Environment,
    server_name: String,
    client: Client,
}

impl SentryMonitor {
    pub fn new(
        dsn: &str,
        environment: Environment,
        server_name: &str,
    ) -> Result<Self, MonitoringError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MonitoringError::Client(e.to_string()))?;

        Ok(Self {
            dsn: SentryDsn::parse(dsn)?,
            environment,
            server_name: server_name.to_string(),
            client,
        })
    }

    pub fn dsn(&self) -> &SentryDsn {
        &self.dsn
    }

    /// JSON body for a single event
    pub fn event_payload(&self, event: &ErrorEvent) -> Value {
        let mut payload = json!({
            "event_id": uuid::Uuid::new_v4().simple().to_string(),
            "timestamp": event.timestamp.to_rfc3339(),
            "level": "error",
            "platform": "other",
            "logger": "edgeway",
            "server_name": self.server_name,
            "environment": self.environment.as_str(),
            "message": event.message,
            "exception": {
                "values": [{ "type": "HandlerError", "value": event.message }]
            },
            "extra": { "detail": event.detail },
        });

        if let Some(request) = &event.request {
            let headers: serde_json::Map<String, Value> = request
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                .collect();
            payload["request"] = json!({
                "method": request.method,
                "url": request.url,
                "headers": headers,
            });
        }

        payload
    }
}

impl MonitoringSink for SentryMonitor {
    fn instrument_request(&self, req: &mut Request) {
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        let url = format!("http://{}{}", host, req.uri());

        let headers = req
            .headers()
            .iter()
            .filter(|(name, _)| !REDACTED_HEADERS.contains(name))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let context = RequestContext {
            method: req.method().to_string(),
            url,
            headers,
        };
        req.extensions_mut().insert(context);
    }

    fn capture_error(&self, event: ErrorEvent) {
        let payload = self.event_payload(&event);
        let auth = self.dsn.auth_header(event.timestamp.timestamp());
        let url = self.dsn.store_url();
        let client = self.client.clone();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No runtime available, dropping monitoring event");
            return;
        };

        runtime.spawn(async move {
            let result = client
                .post(&url)
                .header("X-Sentry-Auth", auth)
                .json(&payload)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());

            if let Err(e) = result {
                tracing::warn!("Failed to deliver error event to collector: {}", e);
            }
        });
    }
}
