//! # Event Types
//!
//! Every event that travels over the bus is a variant of [`Event`]. Each
//! variant has a stable [`EventKind`] discriminant which subscribers filter
//! on, so no runtime type inspection is needed.

use crate::heartbeat::{HeartbeatRequest, HeartbeatResponse, ProcessTimedOut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

// ============================================================================
// Identifiers
// ============================================================================

/// Integer identifier of a game entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Event Payloads
// ============================================================================

/// Periodic simulation tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickEvent {
    pub sequence: u64,
    pub timestamp: u64,
}

/// What happened to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityLifecycle {
    Created,
    Destroyed,
    TraitsChanged,
}

/// Entity lifecycle notification. The bus uses these to maintain the
/// per-entity sub-channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityLifecycleEvent {
    pub entity_id: EntityId,
    pub lifecycle: EntityLifecycle,
}

impl EntityLifecycleEvent {
    pub fn created(entity_id: EntityId) -> Self {
        Self { entity_id, lifecycle: EntityLifecycle::Created }
    }

    pub fn destroyed(entity_id: EntityId) -> Self {
        Self { entity_id, lifecycle: EntityLifecycle::Destroyed }
    }

    pub fn traits_changed(entity_id: EntityId) -> Self {
        Self { entity_id, lifecycle: EntityLifecycle::TraitsChanged }
    }
}

/// A client completed the handshake and was assigned an ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConnectedEvent {
    pub client_id: u32,
    pub name: String,
    pub address: SocketAddr,
    pub timestamp: u64,
}

/// Application payload received from a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDataEvent {
    pub client_id: u32,
    pub payload: Vec<u8>,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The client said goodbye
    Requested,
    /// Nothing was heard from the client within the session timeout
    TimedOut,
    /// The server dropped the session
    Server,
}

/// A session ended and its ID and name were released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDisconnectedEvent {
    pub client_id: u32,
    pub name: String,
    pub reason: DisconnectReason,
    pub timestamp: u64,
}

// ============================================================================
// Tagged Union
// ============================================================================

/// Stable discriminant of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Tick,
    HeartbeatRequest,
    HeartbeatResponse,
    ProcessTimedOut,
    EntityLifecycle,
    ClientConnected,
    ClientData,
    ClientDisconnected,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Tick => "tick",
            EventKind::HeartbeatRequest => "heartbeat_request",
            EventKind::HeartbeatResponse => "heartbeat_response",
            EventKind::ProcessTimedOut => "process_timed_out",
            EventKind::EntityLifecycle => "entity_lifecycle",
            EventKind::ClientConnected => "client_connected",
            EventKind::ClientData => "client_data",
            EventKind::ClientDisconnected => "client_disconnected",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable event posted to the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Tick(TickEvent),
    HeartbeatRequest(HeartbeatRequest),
    HeartbeatResponse(HeartbeatResponse),
    ProcessTimedOut(ProcessTimedOut),
    EntityLifecycle(EntityLifecycleEvent),
    ClientConnected(ClientConnectedEvent),
    ClientData(ClientDataEvent),
    ClientDisconnected(ClientDisconnectedEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Tick(_) => EventKind::Tick,
            Event::HeartbeatRequest(_) => EventKind::HeartbeatRequest,
            Event::HeartbeatResponse(_) => EventKind::HeartbeatResponse,
            Event::ProcessTimedOut(_) => EventKind::ProcessTimedOut,
            Event::EntityLifecycle(_) => EventKind::EntityLifecycle,
            Event::ClientConnected(_) => EventKind::ClientConnected,
            Event::ClientData(_) => EventKind::ClientData,
            Event::ClientDisconnected(_) => EventKind::ClientDisconnected,
        }
    }

    /// The entity this event concerns, if any.
    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            Event::EntityLifecycle(e) => Some(e.entity_id),
            _ => None,
        }
    }
}

macro_rules! impl_from_payload {
    ($($payload:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$payload> for Event {
                fn from(payload: $payload) -> Self {
                    Event::$variant(payload)
                }
            }
        )*
    };
}

impl_from_payload! {
    TickEvent => Tick,
    HeartbeatRequest => HeartbeatRequest,
    HeartbeatResponse => HeartbeatResponse,
    ProcessTimedOut => ProcessTimedOut,
    EntityLifecycleEvent => EntityLifecycle,
    ClientConnectedEvent => ClientConnected,
    ClientDataEvent => ClientData,
    ClientDisconnectedEvent => ClientDisconnected,
}

// ============================================================================
// Subscription Filters
// ============================================================================

/// Selects which events a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Kinds(Vec<EventKind>),
}

impl EventFilter {
    pub fn kind(kind: EventKind) -> Self {
        EventFilter::Kinds(vec![kind])
    }

    pub fn kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        EventFilter::Kinds(kinds.into_iter().collect())
    }

    pub fn matches(&self, kind: EventKind) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Kinds(kinds) => kinds.contains(&kind),
        }
    }
}

impl From<EventKind> for EventFilter {
    fn from(kind: EventKind) -> Self {
        EventFilter::kind(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::ProcessId;

    #[test]
    fn test_kind_matches_variant() {
        let event: Event = TickEvent { sequence: 1, timestamp: 0 }.into();
        assert_eq!(event.kind(), EventKind::Tick);

        let event: Event = HeartbeatResponse { process: ProcessId::new("net"), cycle: 3 }.into();
        assert_eq!(event.kind(), EventKind::HeartbeatResponse);
        assert_eq!(event.entity_id(), None);
    }

    #[test]
    fn test_entity_id_extraction() {
        let event: Event = EntityLifecycleEvent::destroyed(EntityId(7)).into();
        assert_eq!(event.entity_id(), Some(EntityId(7)));
    }

    #[test]
    fn test_filter_matching() {
        let filter = EventFilter::kinds([EventKind::Tick, EventKind::ClientData]);
        assert!(filter.matches(EventKind::Tick));
        assert!(filter.matches(EventKind::ClientData));
        assert!(!filter.matches(EventKind::HeartbeatRequest));
        assert!(EventFilter::All.matches(EventKind::ProcessTimedOut));
    }
}
