//! Edgeway - the HTTP edge of a package registry front end.
//!
//! Edgeway accepts browser and tooling traffic, serves the home page and fingerprinted
//! static assets straight from a public directory, and hands everything else to a
//! pluggable delegated handler. Around that sit the ambient concerns every edge needs:
//! per-request error monitoring, an access log, CORS, a uniform 500 for failures and an
//! idle timer that answers stalled connections with a raw 503.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use edgeway::{
//!     ServerConfigOverrides, adapters::PassThroughHandler, ports::delegated::DelegatedHandler,
//!     start_server,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let overrides = ServerConfigOverrides {
//!     port: Some(8080),
//!     ..Default::default()
//! };
//! let server = start_server(overrides, |config| {
//!     Arc::new(PassThroughHandler::new(config)) as Arc<dyn DelegatedHandler>
//! })
//! .await?;
//! server.close().await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! request assembly and the server lifecycle inside `core`.
//!
//! # Error Handling
//! Fallible setup APIs return `eyre::Result<T>` with context attached through `WrapErr`.
//! Ports define their own `thiserror` enums.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{FileSystemAdapter, HttpHandler, PassThroughHandler},
    config::{ServerConfig, ServerConfigOverrides},
    core::{ListeningServer, ServerHandle, start_server},
    ports::{delegated::DelegatedHandler, monitoring::MonitoringSink},
    utils::GracefulShutdown,
};
