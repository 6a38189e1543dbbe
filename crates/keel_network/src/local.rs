//! # Local Network Provider
//!
//! An in-process simulated network. Every endpoint owns a lock-free inbound
//! queue; the provider keeps the address table behind a single lock. Sending
//! copies the datagram into the destination's queue, so the caller may reuse
//! its buffer immediately. Datagrams addressed to nobody are dropped, the
//! same as they would be on a real network.

use crate::address::{loopback_for, unspecified_for, AddressConfig};
use crate::error::NetworkError;
use crate::id_pool::RecyclingIdPool;
use crate::provider::{Endpoint, NetworkProvider};
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace};

/// First port handed out for port-0 binds.
pub const EPHEMERAL_PORT_MIN: u16 = 49152;
/// Last port handed out for port-0 binds.
pub const EPHEMERAL_PORT_MAX: u16 = 65535;

type Datagram = (SocketAddr, Vec<u8>);
type Inbox = Arc<SegQueue<Datagram>>;

#[derive(Debug)]
struct Registry {
    nodes: HashMap<SocketAddr, Inbox>,
    ports: RecyclingIdPool,
}

impl Registry {
    /// Finds the inbox for `addr`, falling back to a wildcard bind on the
    /// same port.
    fn route(&self, addr: &SocketAddr) -> Option<Inbox> {
        self.nodes.get(addr).cloned().or_else(|| {
            let mut wildcard = unspecified_for(addr);
            wildcard.set_port(addr.port());
            self.nodes.get(&wildcard).cloned()
        })
    }
}

/// In-process datagram network. Cloning shares the address table.
#[derive(Debug, Clone)]
pub struct LocalNetworkProvider {
    registry: Arc<Mutex<Registry>>,
}

impl LocalNetworkProvider {
    pub fn new() -> Self {
        let ports = RecyclingIdPool::new(u32::from(EPHEMERAL_PORT_MIN), u32::from(EPHEMERAL_PORT_MAX))
            .unwrap_or_else(|_| unreachable!("ephemeral port range is non-empty"));
        Self {
            registry: Arc::new(Mutex::new(Registry { nodes: HashMap::new(), ports })),
        }
    }

    /// Number of currently bound endpoints.
    pub fn bound_count(&self) -> usize {
        self.registry.lock().nodes.len()
    }

    pub fn is_bound(&self, addr: &SocketAddr) -> bool {
        self.registry.lock().nodes.contains_key(addr)
    }

    fn bind(&self, requested: SocketAddr, remote: Option<SocketAddr>) -> Result<LocalEndpoint, NetworkError> {
        let mut registry = self.registry.lock();
        let inbox: Inbox = Arc::new(SegQueue::new());

        let (local, ephemeral) = if requested.port() == 0 {
            let mut skipped = Vec::new();
            let result = loop {
                match registry.ports.allocate() {
                    Ok(port) => {
                        let mut candidate = requested;
                        // Pool range is inside u16.
                        candidate.set_port(port as u16);
                        if registry.nodes.contains_key(&candidate) {
                            skipped.push(port);
                        } else {
                            break Ok(candidate);
                        }
                    }
                    Err(e) => break Err(e),
                }
            };
            for port in skipped {
                let _ = registry.ports.release(port);
            }
            (result?, true)
        } else {
            if registry.nodes.contains_key(&requested) {
                return Err(NetworkError::AddressInUse(requested));
            }
            (requested, false)
        };

        registry.nodes.insert(local, inbox.clone());
        debug!("🔌 Local endpoint bound at {} (remote: {:?})", local, remote);

        Ok(LocalEndpoint {
            local,
            remote,
            inbox,
            registry: self.registry.clone(),
            ephemeral,
            closed: false,
        })
    }
}

impl Default for LocalNetworkProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkProvider for LocalNetworkProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    fn create_packet_source(&self, config: &AddressConfig) -> Result<Box<dyn Endpoint>, NetworkError> {
        let local = config.require_local()?;
        Ok(Box::new(self.bind(local, None)?))
    }

    fn create_packet_sink(&self, config: &AddressConfig) -> Result<Box<dyn Endpoint>, NetworkError> {
        let remote = config.require_remote()?;
        let local = config.local()?.unwrap_or_else(|| loopback_for(&remote));
        Ok(Box::new(self.bind(local, Some(remote))?))
    }

    fn create_socket(&self, config: &AddressConfig) -> Result<Box<dyn Endpoint>, NetworkError> {
        let local = config.require_local()?;
        let remote = config.require_remote()?;
        Ok(Box::new(self.bind(local, Some(remote))?))
    }
}

/// Endpoint on a [`LocalNetworkProvider`].
#[derive(Debug)]
pub struct LocalEndpoint {
    local: SocketAddr,
    remote: Option<SocketAddr>,
    inbox: Inbox,
    registry: Arc<Mutex<Registry>>,
    ephemeral: bool,
    closed: bool,
}

impl Endpoint for LocalEndpoint {
    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn poll(&mut self, receiver: &mut dyn FnMut(SocketAddr, &[u8])) -> Result<usize, NetworkError> {
        if self.closed {
            return Err(NetworkError::Closed(self.local));
        }
        // Only what was queued when polling began; later arrivals wait for
        // the next poll.
        let pending = self.inbox.len();
        let mut delivered = 0;
        for _ in 0..pending {
            match self.inbox.pop() {
                Some((from, data)) => {
                    receiver(from, &data);
                    delivered += 1;
                }
                None => break,
            }
        }
        Ok(delivered)
    }

    fn send_to(&mut self, addr: SocketAddr, data: &[u8]) -> Result<(), NetworkError> {
        if self.closed {
            return Err(NetworkError::Closed(self.local));
        }
        let destination = self.registry.lock().route(&addr);
        match destination {
            Some(inbox) => {
                inbox.push((self.local, data.to_vec()));
                trace!("{} -> {}: {} bytes", self.local, addr, data.len());
            }
            None => debug!("Dropped {} bytes from {} to unbound {}", data.len(), self.local, addr),
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut registry = self.registry.lock();
        let ours = registry
            .nodes
            .get(&self.local)
            .is_some_and(|inbox| Arc::ptr_eq(inbox, &self.inbox));
        if ours {
            registry.nodes.remove(&self.local);
        }
        if self.ephemeral {
            if let Err(e) = registry.ports.release(u32::from(self.local.port())) {
                debug!("Ephemeral port {} not returned: {}", self.local.port(), e);
            }
        }
        debug!("Local endpoint {} closed", self.local);
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for LocalEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}
