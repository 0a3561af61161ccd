pub mod graceful_shutdown;
pub mod idle_timeout;

pub use graceful_shutdown::{GracefulShutdown, ShutdownReason};
pub use idle_timeout::{Activity, ActivityIo, IdleExpiry};
