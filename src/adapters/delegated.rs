use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;

use crate::{
    config::models::ServerConfig,
    ports::delegated::{Delegation, DelegatedHandler, HandlerError},
};

/// Delegated handler used when no application is mounted.
///
/// It owns no routes: every request passes through to the terminal 404. The binary
/// starts with it so the edge server can run on its own in front of a static site.
#[derive(Debug, Clone)]
pub struct PassThroughHandler {
    config: Arc<ServerConfig>,
}

impl PassThroughHandler {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        tracing::debug!(
            registry_url = %config.registry_url,
            auto_index = config.auto_index,
            blacklisted = config.blacklist.len(),
            "Delegated handler mounted without application routes"
        );
        Self { config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[async_trait]
impl DelegatedHandler for PassThroughHandler {
    async fn handle(&self, req: Request) -> Result<Delegation, HandlerError> {
        Ok(Delegation::PassThrough(req))
    }
}
