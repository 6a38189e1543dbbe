//! Error types for the network provider layer.
//!
//! Callers must be able to tell "you gave me a bad address" apart from "the
//! network is unavailable"; [`NetworkError::kind`] makes that distinction
//! explicit.

use crate::id_pool::PoolError;
use std::io;
use std::net::SocketAddr;

/// Problems with the address configuration itself. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressConfigError {
    #[error("missing required key '{0}'")]
    MissingKey(&'static str),
    #[error("invalid port for '{key}': '{value}' is not an integer in 0..=65535")]
    InvalidPort { key: &'static str, value: String },
    #[error("cannot resolve address '{address}': {reason}")]
    Unresolvable { address: String, reason: String },
}

/// Broad classification of a [`NetworkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller supplied a bad address or port
    Configuration,
    /// Bind, connect, send or receive failed
    Transport,
    /// An ID pool ran dry
    Capacity,
}

/// Errors produced by providers and endpoints.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("configuration error: {0}")]
    Config(#[from] AddressConfigError),
    #[error("endpoint {0} has no default remote address")]
    NoDefaultRemote(SocketAddr),
    #[error("address {0} is already in use")]
    AddressInUse(SocketAddr),
    #[error("endpoint {0} is closed")]
    Closed(SocketAddr),
    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("ephemeral port allocation failed: {0}")]
    Pool(#[from] PoolError),
}

impl NetworkError {
    pub fn io(operation: &'static str, source: io::Error) -> Self {
        NetworkError::Io { operation, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NetworkError::Config(_) | NetworkError::NoDefaultRemote(_) => ErrorKind::Configuration,
            NetworkError::AddressInUse(_) | NetworkError::Closed(_) | NetworkError::Io { .. } => {
                ErrorKind::Transport
            }
            NetworkError::Pool(_) => ErrorKind::Capacity,
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}
