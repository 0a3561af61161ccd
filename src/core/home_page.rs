use std::path::Path;

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use eyre::{Result, WrapErr};

/// `Cache-Control` for the home page; short so deploys show up quickly.
pub const HOME_CACHE_CONTROL: &str = "public, max-age=60";

/// The site's `index.html`, read once and served from memory.
///
/// Later changes to the file on disk are not picked up; restart the server instead.
#[derive(Debug, Clone)]
pub struct HomePage {
    html: Bytes,
}

impl HomePage {
    /// Read `<public_dir>/index.html`. A missing or unreadable file is fatal.
    pub fn load(public_dir: &Path) -> Result<Self> {
        let path = public_dir.join("index.html");
        let html = std::fs::read_to_string(&path)
            .wrap_err_with(|| format!("Failed to read home page from {}", path.display()))?;

        tracing::debug!(path = %path.display(), bytes = html.len(), "Home page cached");
        Ok(Self::from_html(html))
    }

    pub fn from_html(html: impl Into<String>) -> Self {
        Self {
            html: Bytes::from(html.into()),
        }
    }

    pub fn html(&self) -> &[u8] {
        &self.html
    }

    /// Always a full 200; conditional requests are not supported.
    pub fn response(&self) -> Response {
        let mut response = Response::new(Body::from(self.html.clone()));
        *response.status_mut() = StatusCode::OK;
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(HOME_CACHE_CONTROL),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.html.len()));
        response
    }
}
