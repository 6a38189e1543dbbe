//! Configuration management for the Keel server.
//!
//! This module handles loading, validation, and conversion of server
//! configuration from TOML files and command-line arguments.

use crate::cli::CliArgs;
use anyhow::Context;
use game_server::ServerConfig;
use keel_network::{AddressConfig, NetworkMode};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// Transport settings
    pub network: NetworkSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the session handler binds (e.g., "127.0.0.1:7777")
    pub bind_address: String,
    /// Server tick interval in milliseconds (0 to disable)
    pub tick_interval_ms: u64,
    /// Supervisor heartbeat period in milliseconds
    pub supervisor_period_ms: u64,
    /// Startup/shutdown wait per lifecycle operation in milliseconds
    pub lifecycle_timeout_ms: u64,
    /// Idle seconds before a client session is dropped (0 to disable)
    pub session_timeout_secs: u64,
    /// Largest outbound message in bytes
    pub max_message_size: usize,
    pub client_id_min: u32,
    pub client_id_max: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// `local` (in-process) or `udp`
    pub mode: NetworkMode,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            bind_address: "127.0.0.1:7777".to_string(),
            tick_interval_ms: defaults.tick_interval_ms,
            supervisor_period_ms: defaults.supervisor_period_ms,
            lifecycle_timeout_ms: defaults.lifecycle_timeout_ms,
            session_timeout_secs: defaults.session_timeout_secs,
            max_message_size: defaults.max_message_size,
            client_id_min: defaults.client_id_min,
            client_id_max: defaults.client_id_max,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), json_format: false }
    }
}

pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration there and
    /// returns it.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: AppConfig =
                toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file contents.
    pub fn apply_cli(&mut self, args: &CliArgs) -> Result<(), String> {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if let Some(network) = &args.network {
            self.network.mode = network.parse()?;
        }
        Ok(())
    }

    /// Checks the configuration for consistency.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }

        if self.server.supervisor_period_ms == 0 {
            return Err("Supervisor period must be greater than zero".to_string());
        }
        if self.server.lifecycle_timeout_ms == 0 {
            return Err("Lifecycle timeout must be greater than zero".to_string());
        }
        if self.server.max_message_size == 0 {
            return Err("Max message size must be greater than zero".to_string());
        }
        if self.server.client_id_min > self.server.client_id_max {
            return Err(format!(
                "Client ID range is empty: {}..={}",
                self.server.client_id_min, self.server.client_id_max
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    /// Converts to the library's [`ServerConfig`].
    pub fn to_server_config(&self) -> anyhow::Result<ServerConfig> {
        let bind: SocketAddr = self
            .server
            .bind_address
            .parse()
            .with_context(|| format!("invalid bind address {}", self.server.bind_address))?;

        Ok(ServerConfig {
            network: self.network.mode,
            endpoint: AddressConfig::source(bind.ip().to_string(), bind.port()),
            tick_interval_ms: self.server.tick_interval_ms,
            supervisor_period_ms: self.server.supervisor_period_ms,
            lifecycle_timeout_ms: self.server.lifecycle_timeout_ms,
            session_timeout_secs: self.server.session_timeout_secs,
            max_message_size: self.server.max_message_size,
            client_id_min: self.server.client_id_min,
            client_id_max: self.server.client_id_max,
        })
    }
}
