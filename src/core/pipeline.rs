use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;

use crate::{
    adapters::{
        HttpHandler,
        middleware::{
            access_log_middleware, cors_layer, error_interceptor_middleware,
            monitoring_middleware, panic_response, strip_fingerprint_middleware,
        },
    },
    config::models::ServerConfig,
    core::access_log::AccessLogFormat,
    ports::monitoring::MonitoringSink,
};

/// Assemble the request pipeline.
///
/// Stages run outermost first, in exactly this order:
/// monitoring hook, fingerprint stripping, access log, error interceptor, CORS,
/// then the handler (home page, static files, delegated). The interceptor sits
/// outside everything that can fail, so every failure raised after it, panics
/// included, comes back through it before the client sees a response.
pub fn build_router(
    config: &ServerConfig,
    handler: Arc<HttpHandler>,
    monitor: Arc<dyn MonitoringSink>,
) -> Router {
    let access_format = AccessLogFormat::for_environment(config.environment);

    let dispatch = move |req: Request| {
        let handler = handler.clone();
        async move {
            match handler.handle_request(req).await {
                Ok(response) => response,
                Err(failure) => failure.into_response(),
            }
        }
    };

    Router::new().fallback(dispatch).layer(
        ServiceBuilder::new()
            .layer(from_fn_with_state(monitor.clone(), monitoring_middleware))
            .layer(from_fn(strip_fingerprint_middleware))
            .layer(from_fn_with_state(access_format, access_log_middleware))
            .layer(from_fn_with_state(monitor, error_interceptor_middleware))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(cors_layer()),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, StatusCode, header},
        response::Response,
    };
    use tempfile::TempDir;
    use tower::ServiceExt; // for oneshot

    use super::*;
    use crate::{
        adapters::{FileSystemAdapter, middleware::INTERNAL_ERROR_BODY},
        core::home_page::HomePage,
        ports::{
            delegated::{DelegatedHandler, Delegation, HandlerError},
            monitoring::{ErrorEvent, RequestContext},
        },
    };

    #[derive(Default)]
    struct RecordingMonitor {
        instrumented: AtomicUsize,
        events: Mutex<Vec<ErrorEvent>>,
    }

    impl MonitoringSink for RecordingMonitor {
        fn instrument_request(&self, req: &mut Request) {
            self.instrumented.fetch_add(1, Ordering::SeqCst);
            let context = RequestContext {
                method: req.method().to_string(),
                url: req.uri().to_string(),
                headers: Vec::new(),
            };
            req.extensions_mut().insert(context);
        }

        fn capture_error(&self, event: ErrorEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct Delegate;

    #[async_trait]
    impl DelegatedHandler for Delegate {
        async fn handle(&self, req: Request) -> Result<Delegation, HandlerError> {
            match req.uri().path() {
                "/fail" => Err(HandlerError::InternalError("secret stack".to_string())),
                "/panic" => panic!("delegate exploded"),
                "/app" => Ok(Delegation::Respond(
                    Response::builder()
                        .header("x-powered-by", "Express")
                        .body(Body::from("app"))
                        .unwrap(),
                )),
                _ => Ok(Delegation::PassThrough(req)),
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        router: Router,
        monitor: Arc<RecordingMonitor>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::write(dir.path().join("app.9c1e.css"), "body{}").unwrap();

        let monitor = Arc::new(RecordingMonitor::default());
        let handler = Arc::new(HttpHandler::new(
            HomePage::load(dir.path()).unwrap(),
            Arc::new(FileSystemAdapter::new(dir.path())),
            Arc::new(Delegate),
        ));
        let router = build_router(&ServerConfig::default(), handler, monitor.clone());

        Fixture {
            _dir: dir,
            router,
            monitor,
        }
    }

    async fn send(router: &Router, method: Method, uri: &str) -> Response {
        router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("origin", "https://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_home_page() {
        let f = fixture();
        let response = send(&f.router, Method::GET, "/").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "public, max-age=60"
        );
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"<h1>home</h1>");
    }

    #[tokio::test]
    async fn test_static_asset() {
        let f = fixture();
        let response = send(&f.router, Method::GET, "/app.9c1e.css").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response
                .headers()
                .get(header::CACHE_CONTROL)
                .unwrap()
                .to_str()
                .unwrap()
                .contains("max-age=31536000")
        );
    }

    #[tokio::test]
    async fn test_delegated_response_is_stripped_of_fingerprint() {
        let f = fixture();
        let response = send(&f.router, Method::GET, "/app").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-powered-by"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let f = fixture();
        let response = send(&f.router, Method::GET, "/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delegated_error_is_generic_500() {
        let f = fixture();
        let response = send(&f.router, Method::GET, "/fail").await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], INTERNAL_ERROR_BODY.as_bytes());
        assert!(!String::from_utf8_lossy(&body).contains("secret stack"));

        let events = f.monitor.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].request.as_ref().unwrap().url, "/fail");
    }

    #[tokio::test]
    async fn test_panic_is_intercepted_like_an_error() {
        let f = fixture();
        let response = send(&f.router, Method::GET, "/panic").await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], INTERNAL_ERROR_BODY.as_bytes());
        assert_eq!(f.monitor.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_every_request_is_instrumented() {
        let f = fixture();
        send(&f.router, Method::GET, "/").await;
        send(&f.router, Method::GET, "/app.9c1e.css").await;
        send(&f.router, Method::POST, "/nope").await;

        assert_eq!(f.monitor.instrumented.load(Ordering::SeqCst), 3);
        assert!(f.monitor.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_traversal_never_leaks_files() {
        let f = fixture();
        let response = send(&f.router, Method::GET, "/../../etc/passwd").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(!String::from_utf8_lossy(&body).contains("root:"));
    }
}
