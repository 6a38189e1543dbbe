//! Live client sessions, indexed by ID, name and address.

use crate::error::SessionError;
use keel_network::UnpredictableIdPool;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    pub client_id: u32,
    pub name: String,
    pub address: SocketAddr,
    pub connected_at: Instant,
    pub last_seen: Instant,
}

/// Sessions plus the pool their IDs come from. Names, IDs and addresses are
/// each unique among live sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    ids: UnpredictableIdPool,
    sessions: HashMap<u32, ClientSession>,
    by_name: HashMap<String, u32>,
    by_address: HashMap<SocketAddr, u32>,
}

impl SessionRegistry {
    pub fn new(ids: UnpredictableIdPool) -> Self {
        Self {
            ids,
            sessions: HashMap::new(),
            by_name: HashMap::new(),
            by_address: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, address: SocketAddr, now: Instant) -> Result<u32, SessionError> {
        if self.by_name.contains_key(name) {
            return Err(SessionError::NameTaken(name.to_string()));
        }
        if self.by_address.contains_key(&address) {
            return Err(SessionError::AlreadyConnected(address));
        }

        let client_id = self.ids.allocate()?;
        self.by_name.insert(name.to_string(), client_id);
        self.by_address.insert(address, client_id);
        self.sessions.insert(
            client_id,
            ClientSession {
                client_id,
                name: name.to_string(),
                address,
                connected_at: now,
                last_seen: now,
            },
        );
        Ok(client_id)
    }

    /// Removes a session and releases its ID and name.
    pub fn remove(&mut self, client_id: u32) -> Option<ClientSession> {
        let session = self.sessions.remove(&client_id)?;
        self.by_name.remove(&session.name);
        self.by_address.remove(&session.address);
        // Every live session holds its ID, so release cannot fail here.
        let _ = self.ids.release(client_id);
        Some(session)
    }

    pub fn get(&self, client_id: u32) -> Option<&ClientSession> {
        self.sessions.get(&client_id)
    }

    pub fn id_for_address(&self, address: &SocketAddr) -> Option<u32> {
        self.by_address.get(address).copied()
    }

    pub fn name_in_use(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Refreshes the last-seen time of the session at `address`.
    pub fn touch(&mut self, address: &SocketAddr, now: Instant) -> Option<u32> {
        let client_id = self.id_for_address(address)?;
        if let Some(session) = self.sessions.get_mut(&client_id) {
            session.last_seen = now;
        }
        Some(client_id)
    }

    /// Sessions silent for longer than `timeout`.
    pub fn idle(&self, now: Instant, timeout: Duration) -> Vec<u32> {
        let mut idle: Vec<u32> = self
            .sessions
            .values()
            .filter(|s| now.saturating_duration_since(s.last_seen) > timeout)
            .map(|s| s.client_id)
            .collect();
        idle.sort_unstable();
        idle
    }

    pub fn client_ids(&self) -> Vec<u32> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
