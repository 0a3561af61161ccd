use std::path::Path;

use url::Url;

use crate::config::models::ServerConfig;

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Missing file: {path}")]
    MissingFile { path: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Checks a resolved configuration before the server is started with it.
///
/// Resolution itself never validates; this is what the `validate` command runs.
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if config.port == 0 {
            errors.push(ValidationError::InvalidField {
                field: "port".to_string(),
                message: "Port must be between 1 and 65535".to_string(),
            });
        }

        if config.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "timeout_secs".to_string(),
                message: "Timeout must be at least one second".to_string(),
            });
        }

        if config.keep_alive_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "keep_alive_secs".to_string(),
                message: "Keep-alive must be at least one second".to_string(),
            });
        }

        errors.extend(Self::validate_public_dir(&config.public_dir));

        if let Err(e) = Self::validate_url(&config.registry_url, "registry_url") {
            errors.push(e);
        }

        if let Some(dsn) = &config.sentry_dsn {
            if let Err(e) = Self::validate_url(dsn, "sentry_dsn") {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_public_dir(dir: &Path) -> Vec<ValidationError> {
        if !dir.is_dir() {
            return vec![ValidationError::InvalidField {
                field: "public_dir".to_string(),
                message: format!("'{}' is not a directory", dir.display()),
            }];
        }

        let index = dir.join("index.html");
        if index.is_file() {
            Vec::new()
        } else {
            vec![ValidationError::MissingFile {
                path: index.display().to_string(),
            }]
        }
    }

    fn validate_url(value: &str, field: &str) -> ValidationResult<()> {
        match Url::parse(value) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
            Ok(url) => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("Unsupported URL scheme '{}'", url.scheme()),
            }),
            Err(e) => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("Invalid URL '{value}': {e}"),
            }),
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        errors
            .iter()
            .map(|e| format!("  - {e}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn public_dir_with_index() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        dir
    }

    #[test]
    fn test_valid_config_passes() {
        let dir = public_dir_with_index();
        let config = ServerConfig {
            public_dir: dir.path().to_path_buf(),
            sentry_dsn: Some("https://key@sentry.example.com/42".to_string()),
            ..ServerConfig::default()
        };
        assert!(ServerConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_missing_index_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            public_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("index.html"));
    }

    #[test]
    fn test_collects_all_errors() {
        let config = ServerConfig {
            port: 0,
            timeout_secs: 0,
            keep_alive_secs: 0,
            public_dir: "/definitely/not/here".into(),
            registry_url: "ftp://registry".to_string(),
            sentry_dsn: Some("not a url".to_string()),
            ..ServerConfig::default()
        };
        let message = ServerConfigValidator::validate(&config)
            .unwrap_err()
            .to_string();
        assert!(message.contains("port"));
        assert!(message.contains("timeout_secs"));
        assert!(message.contains("keep_alive_secs"));
        assert!(message.contains("public_dir"));
        assert!(message.contains("registry_url"));
        assert!(message.contains("sentry_dsn"));
    }
}
