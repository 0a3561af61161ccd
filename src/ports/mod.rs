pub mod delegated;
pub mod file_system;
pub mod monitoring;
