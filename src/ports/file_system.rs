use axum::{extract::Request, response::Response};
use eyre::Result;
use thiserror::Error;

/// Error type for file system operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FileSystemError {
    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error when path is invalid
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Result type for file system operations
pub type FileSystemResult<T> = Result<T, FileSystemError>;

/// Outcome of a static file lookup
#[derive(Debug)]
pub enum StaticLookup {
    /// A file matched and this is its response
    Found(Response),
    /// Nothing matched; the untouched request goes on to the next stage
    NotFound(Request),
}

/// FileSystem defines the port (interface) for handling static files
pub trait FileSystem: Send + Sync + 'static {
    /// Serve a file from the file system
    ///
    /// # Arguments
    /// * `req` - The original HTTP request; its path is resolved against the root
    ///
    /// # Returns
    /// A future that resolves to the file response, the request handed back when no
    /// file matches, or an error
    fn serve_file(
        &self,
        req: Request,
    ) -> impl std::future::Future<Output = FileSystemResult<StaticLookup>> + Send;
}
