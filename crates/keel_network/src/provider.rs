//! Provider and endpoint traits.
//!
//! A [`NetworkProvider`] turns an [`AddressConfig`] into a bound
//! [`Endpoint`]. Endpoints never block: [`Endpoint::poll`] hands every
//! datagram that is already waiting to the receiver and returns.

use crate::address::AddressConfig;
use crate::error::NetworkError;
use std::fmt;
use std::net::SocketAddr;

/// A bound address able to send and/or receive datagrams.
pub trait Endpoint: Send + fmt::Debug {
    /// The address this endpoint is bound to.
    fn local_addr(&self) -> SocketAddr;

    /// The fixed peer for sinks and sockets, `None` for sources.
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Drains pending datagrams, calling `receiver(sender, data)` once per
    /// datagram. Returns the number delivered.
    fn poll(&mut self, receiver: &mut dyn FnMut(SocketAddr, &[u8])) -> Result<usize, NetworkError>;

    /// Sends one datagram to `addr`.
    fn send_to(&mut self, addr: SocketAddr, data: &[u8]) -> Result<(), NetworkError>;

    /// Sends one datagram to the default remote.
    fn send(&mut self, data: &[u8]) -> Result<(), NetworkError> {
        match self.remote_addr() {
            Some(remote) => self.send_to(remote, data),
            None => Err(NetworkError::NoDefaultRemote(self.local_addr())),
        }
    }

    /// Releases the bound address. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Factory for endpoints over one transport.
pub trait NetworkProvider: Send + Sync + fmt::Debug {
    /// Short transport name for logs.
    fn name(&self) -> &'static str;

    /// Binds `local_address`/`local_port` and receives from any peer.
    fn create_packet_source(&self, config: &AddressConfig) -> Result<Box<dyn Endpoint>, NetworkError>;

    /// Talks to `remote_address`/`remote_port`. Binds the configured local
    /// address if present, otherwise an ephemeral port on the loopback of the
    /// remote's address family.
    fn create_packet_sink(&self, config: &AddressConfig) -> Result<Box<dyn Endpoint>, NetworkError>;

    /// Both ends supplied.
    fn create_socket(&self, config: &AddressConfig) -> Result<Box<dyn Endpoint>, NetworkError>;
}
