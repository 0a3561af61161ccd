//! Configuration data structures for Edgeway.
//!
//! [`ServerConfig`] is the fully resolved, immutable record a server instance is
//! built from. [`ServerConfigOverrides`] is its partial counterpart: every field is
//! optional so that config files and CLI flags only need to mention what they change.
//! Both are serde-friendly and map directly to TOML / JSON / YAML files.
use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};

/// Listen port used when neither `PORT` nor an override provides one
pub const DEFAULT_PORT: u16 = 5000;

/// Upstream registry handed to the delegated handler by default
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";

/// Per-connection idle timeout. Must stay below the 30 second forced close of the
/// upstream router so the server gets to answer first.
pub const DEFAULT_TIMEOUT_SECS: u64 = 25;

/// How long a connection may wait for its next request after a response.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 5;

/// Runtime environment, resolved once from `APP_ENV` (or `NODE_ENV`).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    #[default]
    Development,
}

impl Environment {
    /// Only the exact value `production` selects production behavior.
    pub fn from_flag(value: Option<&str>) -> Self {
        match value {
            Some("production") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Development => "development",
        }
    }
}

/// Set of package names passed through to the delegated handler.
///
/// The set is reference counted: cloning a config, or merging overrides that do not
/// mention the blacklist, shares the same storage instead of copying it.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Blacklist(Arc<BTreeSet<String>>);

impl Blacklist {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// True when both values point at the same underlying set
    pub fn shares_storage(&self, other: &Blacklist) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Vec<String>> for Blacklist {
    fn from(names: Vec<String>) -> Self {
        names.into_iter().collect()
    }
}

impl From<Blacklist> for Vec<String> {
    fn from(blacklist: Blacklist) -> Self {
        blacklist.0.iter().cloned().collect()
    }
}

impl FromIterator<String> for Blacklist {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Blacklist(Arc::new(iter.into_iter().collect()))
    }
}

/// Fully resolved server configuration.
///
/// Built once per server instance and never mutated afterwards. `registry_url`,
/// `auto_index` and `blacklist` are not examined by the server itself; they exist
/// for the delegated handler.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Distinguishes instances in logs when several run side by side
    pub id: String,
    pub port: u16,
    /// Directory holding `index.html` and the static assets
    pub public_dir: PathBuf,
    pub registry_url: String,
    pub auto_index: bool,
    pub blacklist: Blacklist,
    pub environment: Environment,
    /// Enables the monitoring sink when present
    pub sentry_dsn: Option<String>,
    pub timeout_secs: u64,
    /// Quiet close for connections idle between requests
    pub keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: "1".to_string(),
            port: DEFAULT_PORT,
            public_dir: PathBuf::from("public"),
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            auto_index: true,
            blacklist: Blacklist::default(),
            environment: Environment::Development,
            sentry_dsn: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
        }
    }
}

impl ServerConfig {
    /// Defaults with the process environment applied.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with variables taken from `lookup` instead of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let defaults = Self::default();

        Self {
            port: non_empty("PORT")
                .and_then(|value| value.trim().parse::<u16>().ok())
                .filter(|port| *port != 0)
                .unwrap_or(defaults.port),
            registry_url: non_empty("REGISTRY_URL").unwrap_or(defaults.registry_url),
            auto_index: non_empty("DISABLE_INDEX").is_none(),
            environment: Environment::from_flag(
                non_empty("APP_ENV").or_else(|| non_empty("NODE_ENV")).as_deref(),
            ),
            sentry_dsn: non_empty("SENTRY_DSN"),
            ..defaults
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    pub fn keep_alive(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.keep_alive_secs)
    }
}

/// Partial configuration: each present field replaces the default.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfigOverrides {
    pub id: Option<String>,
    pub port: Option<u16>,
    pub public_dir: Option<PathBuf>,
    pub registry_url: Option<String>,
    pub auto_index: Option<bool>,
    pub blacklist: Option<Blacklist>,
    pub environment: Option<Environment>,
    pub sentry_dsn: Option<String>,
    pub timeout_secs: Option<u64>,
    pub keep_alive_secs: Option<u64>,
}

impl ServerConfigOverrides {
    /// Stack `higher` on top of `self`; fields present in `higher` win.
    pub fn layered_under(self, higher: ServerConfigOverrides) -> ServerConfigOverrides {
        ServerConfigOverrides {
            id: higher.id.or(self.id),
            port: higher.port.or(self.port),
            public_dir: higher.public_dir.or(self.public_dir),
            registry_url: higher.registry_url.or(self.registry_url),
            auto_index: higher.auto_index.or(self.auto_index),
            blacklist: higher.blacklist.or(self.blacklist),
            environment: higher.environment.or(self.environment),
            sentry_dsn: higher.sentry_dsn.or(self.sentry_dsn),
            timeout_secs: higher.timeout_secs.or(self.timeout_secs),
            keep_alive_secs: higher.keep_alive_secs.or(self.keep_alive_secs),
        }
    }
}
