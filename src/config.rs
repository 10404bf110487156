//! Configuration file parser for `Settings.toml`.
//!
//! The file carries global run options plus the `[servers]` tree. The tree is
//! kept as raw TOML tables here (in file order) and interpreted by
//! [`Registry::from_config`](crate::registry::Registry::from_config), which
//! decides per node whether it is a category or a server.
//!
//! Unknown top-level keys are accepted by serde but logged as a warning,
//! since they are most likely typos.
use crate::gate::DEFAULT_CONCURRENT_REQUESTS;
use crate::http::{default_user_agent, HttpOptions};
use crate::util::UrlValidationError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_SETTINGS_PATH: &str = "Settings.toml";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A server node without a `url` key (or with an empty one).
    #[error("Server '{server}' has no feed URL")]
    MissingUrl { server: String },

    /// A server whose `url` is not an absolute http(s) URL.
    #[error("Server '{server}' has an invalid feed URL: {source}")]
    InvalidUrl {
        server: String,
        #[source]
        source: UrlValidationError,
    },

    /// A settings key with a value of the wrong type.
    #[error("Invalid value for '{key}' in '{node}': {message}")]
    InvalidSetting {
        node: String,
        key: String,
        message: String,
    },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level run configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Keys are kebab-case (`concurrent-requests`, `use-server-name-directories`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Maximum simultaneous network operations (feeds, articles, images).
    pub concurrent_requests: usize,

    /// Whether each server gets its own directory below its categories.
    pub use_server_name_directories: bool,

    /// Number of feed jobs processed in parallel.
    pub worker_count: usize,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum size of any single response body.
    pub max_response_bytes: usize,

    /// User-Agent header; defaults to `inkfeed/<version>`.
    pub user_agent: Option<String>,

    /// Settings layer applied beneath every category and server.
    pub defaults: toml::Table,

    /// Category/server tree, in file order.
    pub servers: toml::Table,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrent_requests: DEFAULT_CONCURRENT_REQUESTS,
            use_server_name_directories: true,
            worker_count: 8,
            request_timeout_secs: 30,
            max_response_bytes: 10 * 1024 * 1024,
            user_agent: None,
            defaults: toml::Table::new(),
            servers: toml::Table::new(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "concurrent-requests",
        "use-server-name-directories",
        "worker-count",
        "request-timeout-secs",
        "max-response-bytes",
        "user-agent",
        "defaults",
        "servers",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Err(ConfigError::NotFound)`; a run without sources cannot start
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to prevent memory exhaustion
        // from a corrupted or runaway config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            servers = config.servers.len(),
            concurrent_requests = config.concurrent_requests,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        Ok(toml::from_str(content)?)
    }

    /// HTTP client settings derived from this configuration.
    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            user_agent: self
                .user_agent
                .clone()
                .filter(|ua| !ua.trim().is_empty())
                .unwrap_or_else(default_user_agent),
            timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            max_response_bytes: self.max_response_bytes,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.concurrent_requests, 5);
        assert!(config.use_server_name_directories);
        assert_eq!(config.worker_count, 8);
        assert!(config.user_agent.is_none());
        assert!(config.defaults.is_empty());
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_missing_file_is_error() {
        let path = Path::new("/tmp/inkfeed_test_nonexistent_settings.toml");
        let result = Config::load(path);
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Settings.toml");
        std::fs::write(&path, "  \n  ").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.concurrent_requests, 5);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
concurrent-requests = 3
use-server-name-directories = false
worker-count = 2
user-agent = "test-agent"

[defaults]
include-images = false

[servers."Plato Calibre Releases"]
url = "https://github.com/example/releases.atom"

[servers.Hooks.Unmaintained."Old Project"]
url = "https://example.com/old.xml"
"#;
        let config = Config::parse(content).unwrap();

        assert_eq!(config.concurrent_requests, 3);
        assert!(!config.use_server_name_directories);
        assert_eq!(config.worker_count, 2);
        assert_eq!(
            config.defaults.get("include-images"),
            Some(&toml::Value::Boolean(false))
        );
        let keys: Vec<&str> = config.servers.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Plato Calibre Releases", "Hooks"]);
        assert_eq!(config.http_options().user_agent, "test-agent");
    }

    #[test]
    fn test_server_order_is_preserved() {
        let content = r#"
[servers.zeta]
url = "https://example.com/z.xml"
[servers.alpha]
url = "https://example.com/a.xml"
[servers.mid]
url = "https://example.com/m.xml"
"#;
        let config = Config::parse(content).unwrap();
        let keys: Vec<&str> = config.servers.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let result = Config::parse("this is not [valid toml");
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let result = Config::parse("concurrent-requests = \"many\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
concurrent-requests = 4
totally-fake-key = "should not fail"
"#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.concurrent_requests, 4);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Settings.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_http_options_defaults() {
        let options = Config::default().http_options();
        assert!(options.user_agent.starts_with("inkfeed/"));
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(options.max_response_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_blank_user_agent_falls_back() {
        let config = Config::parse("user-agent = \"  \"\n").unwrap();
        assert!(config.http_options().user_agent.starts_with("inkfeed/"));
    }
}
