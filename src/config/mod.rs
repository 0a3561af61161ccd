pub mod loader;
pub mod models;
pub mod resolver;
pub mod validation;

pub use loader::{load_config, load_overrides};
pub use models::*;
pub use resolver::resolve;
pub use validation::{ServerConfigValidator, ValidationError, ValidationResult};
