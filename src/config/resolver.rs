use crate::config::models::{ServerConfig, ServerConfigOverrides};

/// Merge `overrides` onto `defaults`, field by field.
///
/// A present override always wins, including `0`, `false` and empty strings. Nothing
/// is validated here: a bad port or a missing directory only fails once the server
/// tries to bind or read it.
pub fn resolve(defaults: ServerConfig, overrides: ServerConfigOverrides) -> ServerConfig {
    ServerConfig {
        id: overrides.id.unwrap_or(defaults.id),
        port: overrides.port.unwrap_or(defaults.port),
        public_dir: overrides.public_dir.unwrap_or(defaults.public_dir),
        registry_url: overrides.registry_url.unwrap_or(defaults.registry_url),
        auto_index: overrides.auto_index.unwrap_or(defaults.auto_index),
        blacklist: overrides.blacklist.unwrap_or(defaults.blacklist),
        environment: overrides.environment.unwrap_or(defaults.environment),
        sentry_dsn: overrides.sentry_dsn.or(defaults.sentry_dsn),
        timeout_secs: overrides.timeout_secs.unwrap_or(defaults.timeout_secs),
        keep_alive_secs: overrides.keep_alive_secs.unwrap_or(defaults.keep_alive_secs),
    }
}
