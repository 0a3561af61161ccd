use std::sync::Arc;

use axum::{
    body::Body as AxumBody,
    extract::Request,
    http::{Method, StatusCode, header},
    response::Response,
};

use crate::{
    adapters::{FileSystemAdapter, middleware::HandlerFailure},
    core::home_page::HomePage,
    ports::{
        delegated::{Delegation, DelegatedHandler},
        file_system::{FileSystem, StaticLookup},
    },
};

/// Terminal request handler of the pipeline.
///
/// Precedence is fixed: the root path gets the home page, then a matching static file,
/// then the delegated handler. Each stage either answers or hands the request on; none
/// of them looks at the others.
pub struct HttpHandler {
    home_page: HomePage,
    file_system: Arc<FileSystemAdapter>,
    delegated: Arc<dyn DelegatedHandler>,
}

impl HttpHandler {
    pub fn new(
        home_page: HomePage,
        file_system: Arc<FileSystemAdapter>,
        delegated: Arc<dyn DelegatedHandler>,
    ) -> Self {
        Self {
            home_page,
            file_system,
            delegated,
        }
    }

    /// Main request handler that routes requests appropriately
    pub async fn handle_request(&self, req: Request) -> Result<Response, HandlerFailure> {
        if is_home_page_request(&req) {
            return Ok(self.home_page.response());
        }

        let req = match self.file_system.serve_file(req).await {
            Ok(StaticLookup::Found(response)) => return Ok(response),
            Ok(StaticLookup::NotFound(req)) => req,
            Err(e) => {
                tracing::warn!("Failed to serve static file: {}", e);
                return Err(HandlerFailure::from_error(&e));
            }
        };

        match self.delegated.handle(req).await {
            Ok(Delegation::Respond(response)) => Ok(response),
            Ok(Delegation::PassThrough(req)) => Ok(not_found(&req)),
            Err(e) => Err(HandlerFailure::from_error(&e)),
        }
    }
}

fn is_home_page_request(req: &Request) -> bool {
    req.uri().path() == "/" && matches!(*req.method(), Method::GET | Method::HEAD)
}

/// Reached only when the delegated handler passes the request through
fn not_found(req: &Request) -> Response {
    tracing::debug!("No handler for {} {}", req.method(), req.uri().path());
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(AxumBody::from("Not Found"))
        .unwrap_or_else(|_| Response::new(AxumBody::from("Not Found")))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use axum::body::to_bytes;
    use tempfile::TempDir;

    use super::*;
    use crate::ports::delegated::HandlerError;

    /// Records every path it sees and answers according to `mode`
    struct StubDelegate {
        calls: AtomicUsize,
        paths: Mutex<Vec<String>>,
        mode: StubMode,
    }

    enum StubMode {
        Respond,
        PassThrough,
        Fail,
    }

    impl StubDelegate {
        fn new(mode: StubMode) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                paths: Mutex::new(Vec::new()),
                mode,
            })
        }
    }

    #[async_trait]
    impl DelegatedHandler for StubDelegate {
        async fn handle(&self, req: Request) -> Result<Delegation, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.paths.lock().unwrap().push(req.uri().path().to_string());
            match self.mode {
                StubMode::Respond => Ok(Delegation::Respond(Response::new(AxumBody::from(
                    "from delegate",
                )))),
                StubMode::PassThrough => Ok(Delegation::PassThrough(req)),
                StubMode::Fail => Err(HandlerError::BadGateway("registry down".to_string())),
            }
        }
    }

    fn handler(dir: &TempDir, delegate: Arc<StubDelegate>) -> HttpHandler {
        HttpHandler::new(
            HomePage::from_html("<p>home</p>"),
            Arc::new(FileSystemAdapter::new(dir.path())),
            delegate,
        )
    }

    fn request(method: Method, uri: &str) -> Request {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(AxumBody::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_serves_home_page_without_delegate() {
        let dir = TempDir::new().unwrap();
        let delegate = StubDelegate::new(StubMode::Respond);
        let handler = handler(&dir, delegate.clone());

        let response = handler
            .handle_request(request(Method::GET, "/"))
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        assert_eq!(&body[..], b"<p>home</p>");
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_static_file_wins_over_delegate() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("favicon.ico"), [0u8, 1, 2]).unwrap();
        let delegate = StubDelegate::new(StubMode::Respond);
        let handler = handler(&dir, delegate.clone());

        let response = handler
            .handle_request(request(Method::GET, "/favicon.ico"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unmatched_paths_reach_delegate() {
        let dir = TempDir::new().unwrap();
        let delegate = StubDelegate::new(StubMode::Respond);
        let handler = handler(&dir, delegate.clone());

        handler
            .handle_request(request(Method::GET, "/lodash@4/lodash.js"))
            .await
            .unwrap();
        handler
            .handle_request(request(Method::POST, "/"))
            .await
            .unwrap();

        assert_eq!(
            *delegate.paths.lock().unwrap(),
            vec!["/lodash@4/lodash.js".to_string(), "/".to_string()]
        );
    }

    #[tokio::test]
    async fn test_pass_through_ends_in_not_found() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, StubDelegate::new(StubMode::PassThrough));

        let response = handler
            .handle_request(request(Method::GET, "/missing"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delegate_error_becomes_failure() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, StubDelegate::new(StubMode::Fail));

        let failure = handler
            .handle_request(request(Method::GET, "/react"))
            .await
            .unwrap_err();

        assert_eq!(failure.message(), "Bad gateway: registry down");
    }
}
