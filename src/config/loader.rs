use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::{
    models::{ServerConfig, ServerConfigOverrides},
    resolver::resolve,
};

/// Load partial configuration from a file using the config crate
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub fn load_overrides(config_path: &str) -> Result<ServerConfigOverrides> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml, // Default to YAML
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let overrides: ServerConfigOverrides = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(overrides)
}

/// Resolve the final configuration: environment defaults, then the optional file,
/// then `cli` on top.
pub fn load_config(
    config_path: Option<&str>,
    cli: ServerConfigOverrides,
) -> Result<ServerConfig> {
    let file = match config_path {
        Some(path) => load_overrides(path)?,
        None => ServerConfigOverrides::default(),
    };

    Ok(resolve(ServerConfig::from_env(), file.layered_under(cli)))
}
