pub mod access_log;
pub mod home_page;
pub mod pipeline;
pub mod server;

pub use access_log::AccessLogFormat;
pub use home_page::HomePage;
pub use pipeline::build_router;
pub use server::{ListeningServer, ServerHandle, start_server};
