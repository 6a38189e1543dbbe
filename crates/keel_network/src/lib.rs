//! # Keel Network
//!
//! Datagram transport for the Keel runtime core. Processes never touch
//! sockets directly; they ask a [`NetworkProvider`] for an [`Endpoint`] and
//! poll it from their own execution context.
//!
//! Two providers ship with the crate:
//!
//! - [`LocalNetworkProvider`]: in-process queues, used for tests and
//!   single-process deployments
//! - [`UdpNetworkProvider`]: non-blocking operating-system UDP sockets
//!
//! ```rust
//! use keel_network::*;
//!
//! let provider = LocalNetworkProvider::new();
//! let mut server = provider.create_packet_source(&AddressConfig::source("::1", 9999))?;
//! let mut client = provider.create_packet_sink(&AddressConfig::sink("::1", 9999))?;
//!
//! client.send(b"ping")?;
//! let mut seen = 0;
//! server.poll(&mut |_from, data| {
//!     assert_eq!(data, b"ping");
//!     seen += 1;
//! })?;
//! assert_eq!(seen, 1);
//! # Ok::<(), NetworkError>(())
//! ```

pub mod address;
pub mod error;
pub mod id_pool;
pub mod local;
pub mod provider;
pub mod udp;

pub use address::AddressConfig;
pub use error::{AddressConfigError, ErrorKind, NetworkError};
pub use id_pool::{PoolError, RecyclingIdPool, UnpredictableIdPool, MAX_DRAW_ATTEMPTS};
pub use local::{LocalEndpoint, LocalNetworkProvider};
pub use provider::{Endpoint, NetworkProvider};
pub use udp::{UdpEndpoint, UdpNetworkProvider};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which transport a server runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// In-process simulated network
    #[default]
    Local,
    /// Operating-system UDP sockets
    Udp,
}

impl std::str::FromStr for NetworkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(NetworkMode::Local),
            "udp" => Ok(NetworkMode::Udp),
            other => Err(format!("unknown network mode '{}' (expected local or udp)", other)),
        }
    }
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkMode::Local => f.write_str("local"),
            NetworkMode::Udp => f.write_str("udp"),
        }
    }
}

/// Creates a shared provider for `mode`.
pub fn create_provider(mode: NetworkMode) -> Arc<dyn NetworkProvider> {
    match mode {
        NetworkMode::Local => Arc::new(LocalNetworkProvider::new()),
        NetworkMode::Udp => Arc::new(UdpNetworkProvider::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_mode_parsing() {
        assert_eq!("UDP".parse::<NetworkMode>(), Ok(NetworkMode::Udp));
        assert_eq!("local".parse::<NetworkMode>(), Ok(NetworkMode::Local));
        assert!("tcp".parse::<NetworkMode>().is_err());
        assert_eq!(NetworkMode::Udp.to_string(), "udp");
    }

    #[test]
    fn test_create_provider() {
        assert_eq!(create_provider(NetworkMode::Local).name(), "local");
        assert_eq!(create_provider(NetworkMode::Udp).name(), "udp");
    }
}
