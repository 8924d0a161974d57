// Configuration File Support
//
// This module provides configuration file parsing for the relay.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from the XDG config directory: ~/.config/proxylist-relay/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upstream resource relayed to whitelisted clients
pub const DEFAULT_UPSTREAM_URL: &str = "http://185.25.48.97:64993/by_ip/proxy_list";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Relay listener
    pub server: ServerConfig,

    /// Whitelist state file
    pub store: StoreConfig,

    /// Upstream resource
    pub upstream: UpstreamConfig,

    /// Admin console
    pub admin: AdminConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Relay listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub bind_address: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Whitelist store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the JSON state file
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data").join("whitelist.json"),
        }
    }
}

/// Upstream fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// URL fetched for every admitted request
    pub url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

/// Admin console configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Whether to read commands from stdin
    pub enabled: bool,

    /// Delay before the first prompt, in milliseconds
    pub startup_delay_ms: u64,

    /// Pause after each command, in milliseconds
    pub command_pause_ms: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_delay_ms: 3000,
            command_pause_ms: 1000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// Environment overrides are applied whether or not the file exists. The
    /// result is not validated here; callers validate once every override
    /// (including command-line flags) is in place.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;

            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        Ok(config.apply_env_overrides())
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/proxylist-relay/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "proxylist-relay") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            // Fallback if XDG dirs cannot be determined
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("proxylist-relay")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - PROXYLIST_RELAY_BIND_ADDRESS
    /// - PROXYLIST_RELAY_PORT
    /// - PROXYLIST_RELAY_STORE_PATH
    /// - PROXYLIST_RELAY_UPSTREAM_URL
    /// - PROXYLIST_RELAY_UPSTREAM_TIMEOUT_SECS
    /// - PROXYLIST_RELAY_ADMIN_ENABLED
    /// - PROXYLIST_RELAY_LOG_LEVEL
    /// - PROXYLIST_RELAY_LOG_FORMAT
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup. Unparseable values
    /// are ignored.
    fn apply_overrides<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = var("PROXYLIST_RELAY_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Some(port) = var("PROXYLIST_RELAY_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(path) = var("PROXYLIST_RELAY_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(url) = var("PROXYLIST_RELAY_UPSTREAM_URL") {
            self.upstream.url = url;
        }
        if let Some(secs) = var("PROXYLIST_RELAY_UPSTREAM_TIMEOUT_SECS").and_then(|v| v.parse().ok())
        {
            self.upstream.timeout_secs = secs;
        }
        if let Some(enabled) = var("PROXYLIST_RELAY_ADMIN_ENABLED").and_then(|v| v.parse().ok()) {
            self.admin.enabled = enabled;
        }
        if let Some(level) = var("PROXYLIST_RELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("PROXYLIST_RELAY_LOG_FORMAT") {
            self.logging.format = format;
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        self.bind_addr()?;
        if self.server.port == 0 {
            anyhow::bail!("Server port must be > 0");
        }

        if self.store.path.as_os_str().is_empty() {
            anyhow::bail!("Store path must not be empty");
        }

        if !(self.upstream.url.starts_with("http://") || self.upstream.url.starts_with("https://"))
        {
            anyhow::bail!(
                "Upstream URL must start with http:// or https://: {}",
                self.upstream.url
            );
        }
        if self.upstream.timeout_secs == 0 {
            anyhow::bail!("Upstream timeout must be > 0");
        }

        Ok(())
    }

    /// Socket address the relay binds to
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind_address))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Upstream request timeout
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.store.path, PathBuf::from("data/whitelist.json"));
        assert_eq!(config.upstream.url, DEFAULT_UPSTREAM_URL);
        assert!(config.admin.enabled);
        assert_eq!(config.admin.startup_delay_ms, 3000);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_server() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.bind_address = "not-an-ip".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_upstream() {
        let mut config = Config::default();
        config.upstream.url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.upstream.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_store_path() {
        let mut config = Config::default();
        config.store.path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_nonexistent_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().with_extension("nonexistent");
        assert!(Config::load_from_path(&path).is_ok());
    }

    #[test]
    fn test_load_valid_toml_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let toml_content = r#"
[server]
bind_address = "127.0.0.1"
port = 9000

[store]
path = "/var/lib/relay/whitelist.json"

[upstream]
url = "https://upstream.example/list"
timeout_secs = 5

[admin]
enabled = false
"#;

        fs::write(temp_file.path(), toml_content).unwrap();

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.bind_addr().unwrap(), "127.0.0.1:9000".parse().unwrap());
        assert_eq!(
            config.store.path,
            PathBuf::from("/var/lib/relay/whitelist.json")
        );
        assert_eq!(config.upstream.url, "https://upstream.example/list");
        assert_eq!(config.upstream_timeout(), Duration::from_secs(5));
        assert!(!config.admin.enabled);
        // Unset sections keep their defaults
        assert_eq!(config.admin.command_pause_ms, 1000);
        assert_eq!(config.logging.format, "compact");

        assert!(Config::load_from_path(temp_file.path()).is_ok());
    }

    #[test]
    fn test_load_defers_validation() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[server]\nport = 0\n").unwrap();

        let mut config = Config::load_from_path(temp_file.path()).unwrap();
        assert!(config.validate().is_err());

        config.server.port = 8080;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_invalid_toml_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let toml_content = r#"
[server
port = 1
"#; // Invalid TOML

        fs::write(temp_file.path(), toml_content).unwrap();
        assert!(Config::load_from_path(temp_file.path()).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = Config::default().apply_overrides(lookup(&[
            ("PROXYLIST_RELAY_PORT", "9100"),
            ("PROXYLIST_RELAY_STORE_PATH", "/tmp/wl.json"),
            ("PROXYLIST_RELAY_UPSTREAM_URL", "http://localhost:1/list"),
            ("PROXYLIST_RELAY_ADMIN_ENABLED", "false"),
            ("PROXYLIST_RELAY_LOG_LEVEL", "debug"),
            ("PROXYLIST_RELAY_LOG_FORMAT", "json"),
        ]));

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.store.path, PathBuf::from("/tmp/wl.json"));
        assert_eq!(config.upstream.url, "http://localhost:1/list");
        assert!(!config.admin.enabled);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_overrides_invalid_values() {
        let config = Config::default().apply_overrides(lookup(&[
            ("PROXYLIST_RELAY_PORT", "not-a-port"),
            ("PROXYLIST_RELAY_UPSTREAM_TIMEOUT_SECS", "-1"),
            ("PROXYLIST_RELAY_ADMIN_ENABLED", "maybe"),
        ]));

        // Should keep defaults for invalid values
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.upstream.timeout_secs, 30);
        assert!(config.admin.enabled);
    }

    #[test]
    fn test_config_path() {
        let path = Config::config_path();
        assert!(path.ends_with("config.toml"));
    }

    #[test]
    fn test_log_level_parsing() {
        let mut config = Config::default();
        config.logging.level = "debug".to_string();
        assert_eq!(config.log_level().unwrap(), tracing::Level::DEBUG);

        config.logging.level = "invalid".to_string();
        assert!(config.log_level().is_err());
    }
}
