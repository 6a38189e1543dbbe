//! # UDP Network Provider
//!
//! Real datagram sockets built with `socket2` and switched to non-blocking
//! mode. Sinks and sockets are connected to their remote so the kernel
//! filters out strangers.

use crate::address::{loopback_for, AddressConfig};
use crate::error::NetworkError;
use crate::provider::{Endpoint, NetworkProvider};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use tracing::{debug, trace};

/// Receive buffer size; longer datagrams are truncated by the kernel.
pub const RECEIVE_BUFFER_SIZE: usize = 4096;

/// Provider backed by operating-system UDP sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpNetworkProvider;

impl UdpNetworkProvider {
    pub fn new() -> Self {
        Self
    }

    fn open(&self, local: SocketAddr, remote: Option<SocketAddr>) -> Result<UdpEndpoint, NetworkError> {
        let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| NetworkError::io("socket", e))?;

        socket.bind(&local.into()).map_err(|e| match e.kind() {
            io::ErrorKind::AddrInUse => NetworkError::AddressInUse(local),
            _ => NetworkError::io("bind", e),
        })?;
        if let Some(remote) = remote {
            socket
                .connect(&remote.into())
                .map_err(|e| NetworkError::io("connect", e))?;
        }
        socket
            .set_nonblocking(true)
            .map_err(|e| NetworkError::io("set_nonblocking", e))?;

        let socket: UdpSocket = socket.into();
        let bound = socket.local_addr().map_err(|e| NetworkError::io("local_addr", e))?;
        debug!("🔌 UDP endpoint bound at {} (remote: {:?})", bound, remote);

        Ok(UdpEndpoint {
            local: bound,
            remote,
            socket: Some(socket),
            buffer: Box::new([0u8; RECEIVE_BUFFER_SIZE]),
        })
    }
}

impl NetworkProvider for UdpNetworkProvider {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn create_packet_source(&self, config: &AddressConfig) -> Result<Box<dyn Endpoint>, NetworkError> {
        let local = config.require_local()?;
        Ok(Box::new(self.open(local, None)?))
    }

    fn create_packet_sink(&self, config: &AddressConfig) -> Result<Box<dyn Endpoint>, NetworkError> {
        let remote = config.require_remote()?;
        let local = config.local()?.unwrap_or_else(|| loopback_for(&remote));
        Ok(Box::new(self.open(local, Some(remote))?))
    }

    fn create_socket(&self, config: &AddressConfig) -> Result<Box<dyn Endpoint>, NetworkError> {
        let local = config.require_local()?;
        let remote = config.require_remote()?;
        Ok(Box::new(self.open(local, Some(remote))?))
    }
}

/// Endpoint on a [`UdpNetworkProvider`].
#[derive(Debug)]
pub struct UdpEndpoint {
    local: SocketAddr,
    remote: Option<SocketAddr>,
    socket: Option<UdpSocket>,
    buffer: Box<[u8; RECEIVE_BUFFER_SIZE]>,
}

/// ICMP "port unreachable" surfaces as one of these on the next call.
fn is_unreachable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

impl Endpoint for UdpEndpoint {
    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn poll(&mut self, receiver: &mut dyn FnMut(SocketAddr, &[u8])) -> Result<usize, NetworkError> {
        let socket = self.socket.as_ref().ok_or(NetworkError::Closed(self.local))?;
        let mut delivered = 0;
        loop {
            match socket.recv_from(&mut self.buffer[..]) {
                Ok((len, from)) => {
                    receiver(from, &self.buffer[..len]);
                    delivered += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_unreachable(&e) => {
                    debug!("UDP peer of {} unreachable: {}", self.local, e);
                    continue;
                }
                Err(e) => return Err(NetworkError::io("recv", e)),
            }
        }
        Ok(delivered)
    }

    fn send_to(&mut self, addr: SocketAddr, data: &[u8]) -> Result<(), NetworkError> {
        let socket = self.socket.as_ref().ok_or(NetworkError::Closed(self.local))?;
        let result = if self.remote == Some(addr) {
            socket.send(data)
        } else {
            socket.send_to(data, addr)
        };
        match result {
            Ok(sent) => {
                trace!("{} -> {}: {} bytes", self.local, addr, sent);
                Ok(())
            }
            Err(e) if is_unreachable(&e) => {
                debug!("Dropped {} bytes to unreachable {}: {}", data.len(), addr, e);
                Ok(())
            }
            Err(e) => Err(NetworkError::io("send", e)),
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("UDP endpoint {} closed", self.local);
        }
    }

    fn is_closed(&self) -> bool {
        self.socket.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn poll_until(endpoint: &mut dyn Endpoint, expected: usize) -> Vec<(SocketAddr, Vec<u8>)> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut received = Vec::new();
        while received.len() < expected && Instant::now() < deadline {
            endpoint
                .poll(&mut |from, data| received.push((from, data.to_vec())))
                .unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        received
    }

    #[test]
    fn test_loopback_round_trip() {
        let provider = UdpNetworkProvider::new();
        let mut source = provider
            .create_packet_source(&AddressConfig::source("127.0.0.1", 0))
            .unwrap();
        let port = source.local_addr().port();
        assert_ne!(port, 0);

        let mut sink = provider
            .create_packet_sink(&AddressConfig::sink("127.0.0.1", port))
            .unwrap();
        sink.send(b"hello").unwrap();

        let received = poll_until(source.as_mut(), 1);
        assert_eq!(received, vec![(sink.local_addr(), b"hello".to_vec())]);

        source.send_to(sink.local_addr(), b"world").unwrap();
        let replies = poll_until(sink.as_mut(), 1);
        assert_eq!(replies[0].1, b"world".to_vec());
    }

    #[test]
    fn test_poll_without_traffic_returns_immediately() {
        let provider = UdpNetworkProvider::new();
        let mut source = provider
            .create_packet_source(&AddressConfig::source("127.0.0.1", 0))
            .unwrap();
        assert_eq!(source.poll(&mut |_, _| {}).unwrap(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let provider = UdpNetworkProvider::new();
        let mut source = provider
            .create_packet_source(&AddressConfig::source("127.0.0.1", 0))
            .unwrap();
        source.close();
        source.close();
        assert!(source.is_closed());
        assert!(matches!(source.poll(&mut |_, _| {}), Err(NetworkError::Closed(_))));
    }

    #[test]
    fn test_bind_conflict_is_address_in_use() {
        let provider = UdpNetworkProvider::new();
        let first = provider
            .create_packet_source(&AddressConfig::source("127.0.0.1", 0))
            .unwrap();
        let port = first.local_addr().port();
        let err = provider
            .create_packet_source(&AddressConfig::source("127.0.0.1", port))
            .unwrap_err();
        assert!(matches!(err, NetworkError::AddressInUse(_)));
    }
}
