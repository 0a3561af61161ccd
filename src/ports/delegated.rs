use async_trait::async_trait;
use axum::{extract::Request, response::Response};
use thiserror::Error;

/// Error type for delegated handler operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    /// Error when handling a request
    #[error("Request handling error: {0}")]
    RequestError(String),
    #[error("Internal server error: {0}")]
    InternalError(String),
    #[error("Bad gateway: {0}")]
    BadGateway(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the delegated handler decided to do with a request
#[derive(Debug)]
pub enum Delegation {
    /// The exchange is finished; send this response
    Respond(Response),
    /// Not handled here; the request continues to the terminal not-found stage
    PassThrough(Request),
}

/// DelegatedHandler defines the port for the application routes the edge server
/// does not own itself.
///
/// It is built once from the resolved configuration and mounted behind the home page
/// and static responders. Any error it returns is turned into a generic 500 by the
/// error interceptor and reported to the monitoring sink.
#[async_trait]
pub trait DelegatedHandler: Send + Sync + 'static {
    /// Handle an incoming HTTP request
    ///
    /// # Arguments
    /// * `req` - The HTTP request to handle
    ///
    /// # Returns
    /// A future that resolves to a response, a pass-through, or an error
    async fn handle(&self, req: Request) -> Result<Delegation, HandlerError>;
}
