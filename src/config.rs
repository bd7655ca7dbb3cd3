//! Configuration management for Chatline
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{ChatlineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for Chatline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chat service connection settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Session engine tuning
    #[serde(default)]
    pub session: SessionConfig,
    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Chat service connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// API root; chat endpoints live under `/api/chat`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every request
    #[serde(default)]
    pub api_token: Option<String>,

    /// Timeout for establishing a connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Timeout for non-streaming requests; reply streams have none
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            connect_timeout_seconds: default_connect_timeout(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Session engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Messages requested per history page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Tool names whose early citations are held before their `tool_start`
    #[serde(default = "default_max_pending_sources")]
    pub max_pending_sources: usize,

    /// Notices buffered per subscriber before the slowest one lags
    #[serde(default = "default_notice_capacity")]
    pub notice_capacity: usize,
}

fn default_page_size() -> usize {
    10
}

fn default_max_pending_sources() -> usize {
    32
}

fn default_notice_capacity() -> usize {
    256
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_pending_sources: default_max_pending_sources(),
            notice_capacity: default_notice_capacity(),
        }
    }
}

/// Logging output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level for the `chatline` target (`RUST_LOG` takes precedence)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &Path, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    /// Default location of the config file
    ///
    /// Uses the platform config directory, falling back to
    /// `config/config.yaml` when no home directory can be determined.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "chatline")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config/config.yaml"))
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ChatlineError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ChatlineError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(base_url) = std::env::var("CHATLINE_BASE_URL") {
            tracing::debug!(base_url = %base_url, "Env override: CHATLINE_BASE_URL");
            self.server.base_url = base_url;
        }

        if let Ok(token) = std::env::var("CHATLINE_API_TOKEN") {
            tracing::debug!("Env override: CHATLINE_API_TOKEN");
            self.server.api_token = Some(token);
        }

        if let Ok(page_size) = std::env::var("CHATLINE_PAGE_SIZE") {
            match page_size.parse::<usize>() {
                Ok(v) => {
                    self.session.page_size = v;
                    tracing::debug!(page_size = v, "Env override: CHATLINE_PAGE_SIZE");
                }
                Err(_) => {
                    tracing::warn!("Invalid value for CHATLINE_PAGE_SIZE: {}", page_size);
                }
            }
        }

        if let Ok(level) = std::env::var("CHATLINE_LOG_LEVEL") {
            tracing::debug!(level = %level, "Env override: CHATLINE_LOG_LEVEL");
            self.logging.level = level;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(base_url) = &cli.base_url {
            self.server.base_url = base_url.clone();
        }

        if let Some(token) = &cli.token {
            self.server.api_token = Some(token.clone());
        }

        if cli.verbose {
            self.logging.level = "debug".to_string();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.server.base_url).map_err(|e| {
            ChatlineError::Config(format!("Invalid base_url '{}': {}", self.server.base_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ChatlineError::Config(format!(
                "base_url must use http or https, got '{}'",
                url.scheme()
            ))
            .into());
        }

        if self.server.connect_timeout_seconds == 0 {
            return Err(ChatlineError::Config(
                "connect_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.server.request_timeout_seconds == 0 {
            return Err(ChatlineError::Config(
                "request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.session.page_size == 0 || self.session.page_size > 100 {
            return Err(
                ChatlineError::Config("page_size must be between 1 and 100".to_string()).into(),
            );
        }

        if self.session.max_pending_sources == 0 {
            return Err(ChatlineError::Config(
                "max_pending_sources must be greater than 0".to_string(),
            )
            .into());
        }

        if self.session.notice_capacity == 0 {
            return Err(ChatlineError::Config(
                "notice_capacity must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
