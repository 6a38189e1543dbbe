//! Server configuration types and defaults.

use keel_network::{AddressConfig, NetworkMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`crate::GameServer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Which transport the session endpoint uses
    pub network: NetworkMode,

    /// Where the session handler listens
    pub endpoint: AddressConfig,

    /// Tick period in milliseconds; 0 disables ticking
    pub tick_interval_ms: u64,

    /// Heartbeat period of the supervisor in milliseconds
    pub supervisor_period_ms: u64,

    /// How long to wait for each lifecycle operation during startup and shutdown
    pub lifecycle_timeout_ms: u64,

    /// Idle seconds before a client session is dropped; 0 disables expiry
    pub session_timeout_secs: u64,

    /// Largest outbound message in bytes
    pub max_message_size: usize,

    /// Inclusive range client IDs are drawn from
    pub client_id_min: u32,
    pub client_id_max: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: NetworkMode::Local,
            endpoint: AddressConfig::source("127.0.0.1", 7777),
            tick_interval_ms: 50,
            supervisor_period_ms: 5000,
            lifecycle_timeout_ms: 5000,
            session_timeout_secs: 30,
            max_message_size: 1200,
            client_id_min: 1,
            client_id_max: 0x7FFF_FFFF,
        }
    }
}

impl ServerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn supervisor_period(&self) -> Duration {
        Duration::from_millis(self.supervisor_period_ms)
    }

    pub fn lifecycle_timeout(&self) -> Duration {
        Duration::from_millis(self.lifecycle_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
network = "udp"
tick_interval_ms = 0

[endpoint]
local_address = "::1"
local_port = 9999
"#,
        )
        .unwrap();

        assert_eq!(config.network, NetworkMode::Udp);
        assert_eq!(config.tick_interval(), Duration::ZERO);
        assert_eq!(config.endpoint, AddressConfig::source("::1", 9999));
        assert_eq!(config.supervisor_period(), Duration::from_secs(5));
        assert_eq!(config.max_message_size, 1200);
    }
}
