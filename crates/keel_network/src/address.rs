//! Address configuration for packet sources and sinks.
//!
//! Endpoints are described by a small property bag:
//!
//! | key | used by |
//! |---|---|
//! | `local_address`, `local_port` | packet sources (and optionally sinks) |
//! | `remote_address`, `remote_port` | packet sinks |
//!
//! Addresses are any resolvable host string, including IPv6 literals such as
//! `::1`. Ports are integers in `0..=65535`; port `0` asks for an ephemeral
//! port.

use crate::error::AddressConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

pub const LOCAL_ADDRESS: &str = "local_address";
pub const LOCAL_PORT: &str = "local_port";
pub const REMOTE_ADDRESS: &str = "remote_address";
pub const REMOTE_PORT: &str = "remote_port";

/// Where an endpoint binds and, optionally, whom it talks to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
}

impl AddressConfig {
    /// Configuration for a packet source bound to `address:port`.
    pub fn source(address: impl Into<String>, port: u16) -> Self {
        Self {
            local_address: Some(address.into()),
            local_port: Some(port),
            ..Self::default()
        }
    }

    /// Configuration for a packet sink talking to `address:port`.
    pub fn sink(address: impl Into<String>, port: u16) -> Self {
        Self {
            remote_address: Some(address.into()),
            remote_port: Some(port),
            ..Self::default()
        }
    }

    /// Adds a local bind address to a sink configuration.
    pub fn with_local(mut self, address: impl Into<String>, port: u16) -> Self {
        self.local_address = Some(address.into());
        self.local_port = Some(port);
        self
    }

    /// Parses the property-bag form.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, AddressConfigError> {
        Ok(Self {
            local_address: properties.get(LOCAL_ADDRESS).cloned(),
            local_port: parse_port(properties, LOCAL_PORT)?,
            remote_address: properties.get(REMOTE_ADDRESS).cloned(),
            remote_port: parse_port(properties, REMOTE_PORT)?,
        })
    }

    /// Resolves the local bind address, if one is configured.
    ///
    /// A missing `local_port` means port `0`.
    pub fn local(&self) -> Result<Option<SocketAddr>, AddressConfigError> {
        match &self.local_address {
            Some(address) => resolve(address, self.local_port.unwrap_or(0)).map(Some),
            None => Ok(None),
        }
    }

    /// Resolves the local bind address, failing if it is absent.
    pub fn require_local(&self) -> Result<SocketAddr, AddressConfigError> {
        self.local()?.ok_or(AddressConfigError::MissingKey(LOCAL_ADDRESS))
    }

    /// Resolves the remote address, if one is configured.
    pub fn remote(&self) -> Result<Option<SocketAddr>, AddressConfigError> {
        match &self.remote_address {
            Some(address) => {
                let port = self.remote_port.ok_or(AddressConfigError::MissingKey(REMOTE_PORT))?;
                resolve(address, port).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Resolves the remote address, failing if it is absent.
    pub fn require_remote(&self) -> Result<SocketAddr, AddressConfigError> {
        self.remote()?.ok_or(AddressConfigError::MissingKey(REMOTE_ADDRESS))
    }
}

/// The loopback address of the same family as `peer`, with port `0`.
pub fn loopback_for(peer: &SocketAddr) -> SocketAddr {
    let ip = match peer.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
    };
    SocketAddr::new(ip, 0)
}

/// The wildcard address of the same family as `peer`, with port `0`.
pub fn unspecified_for(peer: &SocketAddr) -> SocketAddr {
    let ip = match peer.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

fn parse_port(
    properties: &HashMap<String, String>,
    key: &'static str,
) -> Result<Option<u16>, AddressConfigError> {
    properties
        .get(key)
        .map(|value| {
            value.trim().parse::<u16>().map_err(|_| AddressConfigError::InvalidPort {
                key,
                value: value.clone(),
            })
        })
        .transpose()
}

fn resolve(address: &str, port: u16) -> Result<SocketAddr, AddressConfigError> {
    let unresolvable = |reason: String| AddressConfigError::Unresolvable {
        address: address.to_string(),
        reason,
    };
    (address, port)
        .to_socket_addrs()
        .map_err(|e| unresolvable(e.to_string()))?
        .next()
        .ok_or_else(|| unresolvable("no addresses returned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_source_properties_resolve_ipv6_loopback() {
        let config =
            AddressConfig::from_properties(&props(&[("local_address", "::1"), ("local_port", "9999")]))
                .unwrap();
        assert_eq!(config.require_local().unwrap(), "[::1]:9999".parse().unwrap());
        assert_eq!(config.remote().unwrap(), None);
    }

    #[test]
    fn test_invalid_ports_are_configuration_errors() {
        for bad in ["-1", "65536", "port", ""] {
            let err = AddressConfig::from_properties(&props(&[("remote_port", bad)])).unwrap_err();
            assert_eq!(
                err,
                AddressConfigError::InvalidPort { key: REMOTE_PORT, value: bad.to_string() }
            );
        }
    }

    #[test]
    fn test_missing_keys() {
        let config = AddressConfig::default();
        assert_eq!(config.require_local(), Err(AddressConfigError::MissingKey(LOCAL_ADDRESS)));
        assert_eq!(config.require_remote(), Err(AddressConfigError::MissingKey(REMOTE_ADDRESS)));

        let no_port = AddressConfig { remote_address: Some("127.0.0.1".into()), ..Default::default() };
        assert_eq!(no_port.remote(), Err(AddressConfigError::MissingKey(REMOTE_PORT)));
    }

    #[test]
    fn test_local_port_defaults_to_ephemeral() {
        let config = AddressConfig { local_address: Some("127.0.0.1".into()), ..Default::default() };
        assert_eq!(config.require_local().unwrap().port(), 0);
    }

    #[test]
    fn test_unresolvable_host() {
        let config = AddressConfig::sink("definitely not a host name", 80);
        assert!(matches!(
            config.require_remote(),
            Err(AddressConfigError::Unresolvable { .. })
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let config: AddressConfig = toml::from_str(
            r#"
local_address = "127.0.0.1"
local_port = 7777
"#,
        )
        .unwrap();
        assert_eq!(config, AddressConfig::source("127.0.0.1", 7777));
    }

    #[test]
    fn test_family_helpers() {
        let v6: SocketAddr = "[::1]:9999".parse().unwrap();
        let v4: SocketAddr = "10.0.0.1:80".parse().unwrap();
        assert_eq!(loopback_for(&v6), "[::1]:0".parse().unwrap());
        assert_eq!(loopback_for(&v4), "127.0.0.1:0".parse().unwrap());
        assert_eq!(unspecified_for(&v4), "0.0.0.0:0".parse().unwrap());
    }
}
