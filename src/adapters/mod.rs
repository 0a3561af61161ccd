pub mod delegated;
pub mod file_system;
pub mod http_handler;
pub mod middleware;
pub mod monitoring;

/// Re-export commonly used types from adapters
pub use delegated::PassThroughHandler;
pub use file_system::FileSystemAdapter;
pub use http_handler::HttpHandler;
pub use middleware::*;
pub use monitoring::{NoopMonitor, SentryMonitor};
