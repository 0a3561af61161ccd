use std::{
    convert::TryFrom,
    path::{Path, PathBuf},
};

use axum::{
    body::Body as AxumBody,
    extract::Request,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use eyre::WrapErr;
use http_body_util::BodyExt;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::ports::file_system::{FileSystem, FileSystemError, StaticLookup};

/// `Cache-Control` for static assets. They are content hashed by the site build, so a
/// year is safe.
pub const STATIC_CACHE_CONTROL: &str = "public, max-age=31536000";

/// File served for a directory requested with a trailing slash
const DIRECTORY_INDEX: &str = "index.html";

/// Static asset adapter using tower-http ServeDir for the actual file responses
#[derive(Debug, Clone)]
pub struct FileSystemAdapter {
    root: PathBuf,
}

impl FileSystemAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` under the root, following symlinks, and make sure the result
    /// still lives inside the root.
    async fn confined_entry(&self, relative: &Path) -> Result<Option<Entry>, FileSystemError> {
        let full_path = self.root.join(relative);

        // Security check: ensure the resolved path is still within root
        let canonical_root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(FileSystemError::IoError)?;
        let canonical_path = match tokio::fs::canonicalize(&full_path).await {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotADirectory => return Ok(None),
            Err(e) => return Err(FileSystemError::IoError(e)),
        };

        if !canonical_path.starts_with(&canonical_root) {
            return Err(FileSystemError::InvalidPath(
                "Path traversal attempt detected".to_string(),
            ));
        }

        match tokio::fs::metadata(&canonical_path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(Entry::File)),
            Ok(metadata) if metadata.is_dir() => Ok(Some(Entry::Directory)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FileSystemError::IoError(e)),
        }
    }

    /// The file to send for `relative`, if any. A directory is answered by its
    /// `index.html`, and only when the request path already ends in a slash.
    async fn resolve_target(
        &self,
        relative: PathBuf,
        request_path: &str,
    ) -> Result<Target, FileSystemError> {
        match self.confined_entry(&relative).await? {
            None => Ok(Target::Missing),
            Some(Entry::File) => Ok(Target::File(relative)),
            Some(Entry::Directory) if !request_path.ends_with('/') => Ok(Target::AddSlash),
            Some(Entry::Directory) => {
                let index = relative.join(DIRECTORY_INDEX);
                match self.confined_entry(&index).await? {
                    Some(Entry::File) => Ok(Target::File(index)),
                    _ => Ok(Target::Missing),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    File,
    Directory,
}

#[derive(Debug)]
enum Target {
    File(PathBuf),
    /// A directory requested without its trailing slash
    AddSlash,
    Missing,
}

impl FileSystem for FileSystemAdapter {
    async fn serve_file(&self, req: Request) -> Result<StaticLookup, FileSystemError> {
        if !matches!(*req.method(), Method::GET | Method::HEAD) {
            return Ok(StaticLookup::NotFound(req));
        }

        let Some(relative) = normalize_request_path(req.uri().path()) else {
            tracing::debug!(path = %req.uri().path(), "Rejected static path");
            return Ok(StaticLookup::NotFound(req));
        };

        let relative = match self.resolve_target(relative, req.uri().path()).await {
            Ok(Target::File(relative)) => relative,
            Ok(Target::AddSlash) => return Ok(StaticLookup::Found(add_slash_redirect(&req))),
            Ok(Target::Missing) => return Ok(StaticLookup::NotFound(req)),
            Err(FileSystemError::InvalidPath(reason)) => {
                tracing::warn!(path = %req.uri().path(), "{}", reason);
                return Ok(StaticLookup::NotFound(req));
            }
            Err(e) => return Err(e),
        };

        // Create a new request with the normalized path for ServeDir; the original
        // stays untouched in case the file vanished in the meantime
        let uri_string = format!("/{}", encode_relative_path(&relative));
        let uri = hyper::Uri::try_from(uri_string)
            .wrap_err("Failed to parse URI for file serving")
            .map_err(|e| FileSystemError::InvalidPath(e.to_string()))?;

        let mut lookup = Request::new(AxumBody::empty());
        *lookup.method_mut() = req.method().clone();
        *lookup.uri_mut() = uri;
        *lookup.headers_mut() = req.headers().clone();

        let serve_dir = ServeDir::new(&self.root).append_index_html_on_directories(false);

        let response = serve_dir
            .oneshot(lookup)
            .await
            .wrap_err("ServeDir failed to serve file")
            .map_err(|e| {
                FileSystemError::IoError(std::io::Error::other(format!("ServeDir error: {e}")))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(StaticLookup::NotFound(req));
        }

        let (mut parts, tower_body) = response.into_parts();
        if parts.status.is_success() || parts.status == StatusCode::NOT_MODIFIED {
            parts.headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(STATIC_CACHE_CONTROL),
            );
        }

        let axum_body = AxumBody::new(tower_body.map_err(|e| {
            tracing::error!("Error reading static file body: {}", e);
            axum::Error::new(e)
        }));

        Ok(StaticLookup::Found(Response::from_parts(parts, axum_body)))
    }
}

/// Percent-decode a request path and fold its `.` and `..` segments.
///
/// Returns `None` when the path is malformed, names a dotfile or climbs above the
/// root, so callers never touch the file system for it.
pub fn normalize_request_path(path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(path).ok()?;
    if decoded.contains('\0') {
        return None;
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s if s.contains(':') => return None,
            s => segments.push(s),
        }
    }

    if segments.iter().any(|segment| segment.starts_with('.')) {
        return None;
    }

    Some(segments.iter().collect())
}

/// `301` to the same path with a slash appended, query preserved.
fn add_slash_redirect(req: &Request) -> Response {
    let location = match req.uri().query() {
        Some(query) => format!("{}/?{}", req.uri().path(), query),
        None => format!("{}/", req.uri().path()),
    };
    let body = format!("Redirecting to {location}");

    match HeaderValue::from_str(&location) {
        Ok(value) => {
            let mut response = Response::new(AxumBody::from(body));
            *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
            response.headers_mut().insert(header::LOCATION, value);
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            response
        }
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

fn encode_relative_path(relative: &Path) -> String {
    relative
        .iter()
        .map(|segment| urlencoding::encode(&segment.to_string_lossy()).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use tempfile::TempDir;

    use super::*;

    async fn create_test_file(dir: &TempDir, path: &str, content: &str) -> std::io::Result<()> {
        let full_path = dir.path().join(path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(full_path, content).await
    }

    fn get(uri: &str) -> Request {
        Request::builder().uri(uri).body(AxumBody::empty()).unwrap()
    }

    #[test]
    fn test_normalize_request_path() {
        assert_eq!(
            normalize_request_path("/assets/app.js"),
            Some(PathBuf::from("assets/app.js"))
        );
        assert_eq!(
            normalize_request_path("/assets/./x/../app.js"),
            Some(PathBuf::from("assets/app.js"))
        );
        assert_eq!(
            normalize_request_path("/my%20file.txt"),
            Some(PathBuf::from("my file.txt"))
        );
        assert_eq!(normalize_request_path("/"), Some(PathBuf::new()));
        assert_eq!(normalize_request_path("/../../etc/passwd"), None);
        assert_eq!(normalize_request_path("/%2e%2e/%2e%2e/etc/passwd"), None);
        assert_eq!(normalize_request_path("/a/..%5c..%5cetc/passwd"), None);
        assert_eq!(normalize_request_path("/file%00.txt"), None);
        assert_eq!(normalize_request_path("/.env"), None);
        assert_eq!(normalize_request_path("/a/.git/config"), None);
    }

    #[tokio::test]
    async fn test_serves_existing_file_with_long_cache() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(&temp_dir, "assets/app.3f2a.js", "console.log(1)")
            .await
            .unwrap();
        let fs = FileSystemAdapter::new(temp_dir.path());

        let lookup = fs.serve_file(get("/assets/app.3f2a.js")).await.unwrap();
        let StaticLookup::Found(response) = lookup else {
            panic!("expected file to be found");
        };

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "public, max-age=31536000"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"console.log(1)");
    }

    #[tokio::test]
    async fn test_missing_file_hands_request_back() {
        let temp_dir = TempDir::new().unwrap();
        let fs = FileSystemAdapter::new(temp_dir.path());

        match fs.serve_file(get("/react@18/index.js")).await.unwrap() {
            StaticLookup::NotFound(req) => assert_eq!(req.uri().path(), "/react@18/index.js"),
            StaticLookup::Found(_) => panic!("nothing should match"),
        }
    }

    #[tokio::test]
    async fn test_directory_with_slash_serves_its_index() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(&temp_dir, "docs/index.html", "<p>docs</p>")
            .await
            .unwrap();
        let fs = FileSystemAdapter::new(temp_dir.path());

        let StaticLookup::Found(response) = fs.serve_file(get("/docs/")).await.unwrap() else {
            panic!("expected the directory index");
        };
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"<p>docs</p>");
    }

    #[tokio::test]
    async fn test_directory_without_slash_redirects() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(&temp_dir, "docs/index.html", "<p>docs</p>")
            .await
            .unwrap();
        let fs = FileSystemAdapter::new(temp_dir.path());

        let StaticLookup::Found(response) = fs.serve_file(get("/docs?v=2")).await.unwrap() else {
            panic!("expected a redirect");
        };
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/docs/?v=2");
    }

    #[tokio::test]
    async fn test_directory_without_index_falls_through() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(&temp_dir, "assets/app.js", "1").await.unwrap();
        let fs = FileSystemAdapter::new(temp_dir.path());

        assert!(matches!(
            fs.serve_file(get("/assets/")).await.unwrap(),
            StaticLookup::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_dotfiles_are_never_served() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(&temp_dir, ".env", "SECRET=1").await.unwrap();
        create_test_file(&temp_dir, ".git/config", "[core]").await.unwrap();
        let fs = FileSystemAdapter::new(temp_dir.path());

        for uri in ["/.env", "/.git/config", "/%2eenv", "/assets/../.env"] {
            match fs.serve_file(get(uri)).await.unwrap() {
                StaticLookup::NotFound(req) => assert_eq!(req.uri().path(), uri),
                StaticLookup::Found(_) => panic!("{uri} must not be served"),
            }
        }
    }

    #[tokio::test]
    async fn test_non_get_methods_fall_through() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(&temp_dir, "robots.txt", "User-agent: *")
            .await
            .unwrap();
        let fs = FileSystemAdapter::new(temp_dir.path());

        let req = Request::builder()
            .method(Method::POST)
            .uri("/robots.txt")
            .body(AxumBody::empty())
            .unwrap();
        assert!(matches!(
            fs.serve_file(req).await.unwrap(),
            StaticLookup::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_path_traversal_protection() {
        let outer = TempDir::new().unwrap();
        let public = outer.path().join("public");
        tokio::fs::create_dir_all(&public).await.unwrap();
        tokio::fs::write(outer.path().join("secret.txt"), "top secret")
            .await
            .unwrap();
        let fs = FileSystemAdapter::new(&public);

        for uri in [
            "/../secret.txt",
            "/%2e%2e/secret.txt",
            "/../../etc/passwd",
            "/..%2fsecret.txt",
        ] {
            assert!(
                matches!(fs.serve_file(get(uri)).await.unwrap(), StaticLookup::NotFound(_)),
                "{uri} must not resolve"
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escaping_root_is_rejected() {
        let outer = TempDir::new().unwrap();
        let public = outer.path().join("public");
        tokio::fs::create_dir_all(&public).await.unwrap();
        tokio::fs::write(outer.path().join("secret.txt"), "top secret")
            .await
            .unwrap();
        std::os::unix::fs::symlink(outer.path().join("secret.txt"), public.join("leak.txt"))
            .unwrap();
        let fs = FileSystemAdapter::new(&public);

        assert!(matches!(
            fs.serve_file(get("/leak.txt")).await.unwrap(),
            StaticLookup::NotFound(_)
        ));
    }
}
