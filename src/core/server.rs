//! Server lifecycle: construction, listening, per-connection timeout, close.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{Router, http::Request, response::Response};
use eyre::{Result, WrapErr};
use hyper::{body::Incoming, server::conn::http1};
use hyper_util::{
    rt::{TokioIo, TokioTimer},
    service::TowerToHyperService,
};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tower::ServiceBuilder;

use crate::{
    adapters::{FileSystemAdapter, HttpHandler, monitoring},
    config::{
        models::{ServerConfig, ServerConfigOverrides},
        resolver::resolve,
    },
    core::{home_page::HomePage, pipeline::build_router},
    ports::{delegated::DelegatedHandler, monitoring::MonitoringSink},
    utils::{
        GracefulShutdown, ShutdownReason,
        idle_timeout::{
            Activity, ActivityIo, IdleExpiry, split_escape_hatch, write_timeout_response,
        },
    },
};

/// A fully built server that is not listening yet.
pub struct ServerHandle {
    config: Arc<ServerConfig>,
    router: Router,
}

impl ServerHandle {
    /// Build the pipeline for `config`.
    ///
    /// `delegated` is called exactly once with the resolved configuration. Fails if the
    /// home page cannot be read; no partial server is returned in that case.
    pub fn create<F>(
        config: ServerConfig,
        delegated: F,
        monitor: Arc<dyn MonitoringSink>,
    ) -> Result<Self>
    where
        F: FnOnce(Arc<ServerConfig>) -> Arc<dyn DelegatedHandler>,
    {
        let config = Arc::new(config);
        let home_page = HomePage::load(&config.public_dir)?;
        let file_system = Arc::new(FileSystemAdapter::new(config.public_dir.clone()));
        let handler = Arc::new(HttpHandler::new(
            home_page,
            file_system,
            delegated(config.clone()),
        ));
        let router = build_router(&config, handler, monitor);

        Ok(Self { config, router })
    }

    /// Like [`ServerHandle::create`], with the monitoring sink chosen by the config.
    pub fn from_config<F>(config: ServerConfig, delegated: F) -> Result<Self>
    where
        F: FnOnce(Arc<ServerConfig>) -> Arc<dyn DelegatedHandler>,
    {
        let monitor =
            monitoring::from_config(&config).wrap_err("Failed to set up error monitoring")?;
        Self::create(config, delegated, monitor)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The assembled pipeline, for driving it without a socket
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind every interface on `port` and start accepting connections.
    pub async fn start(self, port: u16) -> Result<ListeningServer> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .wrap_err_with(|| format!("Failed to bind to port {port}"))?;
        let local_addr = listener
            .local_addr()
            .wrap_err("Failed to get local addr")?;

        let shutdown = GracefulShutdown::new();
        let task = tokio::spawn(accept_loop(
            listener,
            self.router,
            IdleLimits {
                timeout: self.config.timeout(),
                keep_alive: self.config.keep_alive(),
            },
            shutdown.clone(),
        ));

        tracing::info!(
            "Server #{} listening on port {}, Ctrl+C to stop",
            self.config.id,
            local_addr.port()
        );

        Ok(ListeningServer {
            config: self.config,
            local_addr,
            shutdown,
            task,
        })
    }
}

/// A server that is accepting connections. Once closed it cannot be restarted.
pub struct ListeningServer {
    config: Arc<ServerConfig>,
    local_addr: SocketAddr,
    shutdown: GracefulShutdown,
    task: JoinHandle<()>,
}

impl ListeningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle that stops the listener when triggered, e.g. from a signal handler
    pub fn shutdown_handle(&self) -> GracefulShutdown {
        self.shutdown.clone()
    }

    /// Stop accepting connections. Connections already open are left to finish.
    pub async fn close(self) -> Result<()> {
        self.shutdown.trigger_shutdown(ShutdownReason::Requested);
        self.wait().await
    }

    /// Run until the listener is shut down.
    pub async fn wait(self) -> Result<()> {
        self.task.await.wrap_err("Accept loop terminated abnormally")
    }
}

/// Resolve `overrides` onto the environment defaults, build and start a server.
pub async fn start_server<F>(
    overrides: ServerConfigOverrides,
    delegated: F,
) -> Result<ListeningServer>
where
    F: FnOnce(Arc<ServerConfig>) -> Arc<dyn DelegatedHandler>,
{
    let config = resolve(ServerConfig::from_env(), overrides);
    let port = config.port;
    ServerHandle::from_config(config, delegated)?
        .start(port)
        .await
}

/// Idle windows applied to every connection
#[derive(Debug, Clone, Copy)]
struct IdleLimits {
    /// Pending or in-progress request; expiry answers with the 503
    timeout: Duration,
    /// Waiting for the next request; expiry closes without a response
    keep_alive: Duration,
}

async fn accept_loop(
    listener: TcpListener,
    router: Router,
    limits: IdleLimits,
    shutdown: GracefulShutdown,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_connection(stream, peer, router.clone(), limits));
                }
                Err(e) => tracing::debug!("Accept error: {}", e),
            },
            reason = shutdown.wait_for_shutdown_signal() => {
                tracing::info!("Listener closing: {:?}", reason);
                break;
            }
        }
    }
}

/// Serve one connection, racing it against its idle timer.
///
/// A connection left idle after a response is simply dropped. Otherwise, on expiry the
/// HTTP connection is dropped wherever it is and the synthesized 503 goes out through
/// the duplicated socket handle, never through the pipeline.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    limits: IdleLimits,
) {
    let (stream, escape) = match split_escape_hatch(stream) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(peer = %peer, "Failed to prepare connection: {}", e);
            return;
        }
    };

    let activity = Activity::new();
    let started = activity.clone();
    let finished = activity.clone();
    let service = ServiceBuilder::new()
        .map_request(move |req: Request<Incoming>| {
            started.request_started();
            req
        })
        .map_response(move |res: Response| res.map(|body| finished.track_response(body)))
        .service(router);

    let io = TokioIo::new(ActivityIo::new(stream, activity.clone()));
    let connection = http1::Builder::new()
        .timer(TokioTimer::new())
        .serve_connection(io, TowerToHyperService::new(service));

    tokio::select! {
        result = connection => {
            if let Err(e) = result {
                tracing::debug!(peer = %peer, "Connection error: {}", e);
            }
        }
        expiry = activity.idle(limits.timeout, limits.keep_alive) => match expiry {
            IdleExpiry::KeepAlive => {
                tracing::debug!(
                    peer = %peer,
                    "Keep-alive connection idle for {} seconds, closing",
                    limits.keep_alive.as_secs()
                );
            }
            IdleExpiry::Stalled => {
                tracing::warn!(
                    peer = %peer,
                    "Connection idle for {} seconds, closing with 503",
                    limits.timeout.as_secs()
                );
                if let Err(e) = write_timeout_response(escape, limits.timeout).await {
                    tracing::debug!(peer = %peer, "Failed to write timeout response: {}", e);
                }
            }
        },
    }
}
