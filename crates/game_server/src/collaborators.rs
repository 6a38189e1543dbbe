//! # Collaborator Interfaces
//!
//! Subsystems outside the core that the server talks to only through narrow
//! traits:
//!
//! - [`ReliableMessaging`]: the connection-framing layer above raw datagrams.
//!   It takes a reliability tag plus a named payload and reports connection
//!   events back through callbacks.
//! - [`StringTable`]: read access to localized strings, used to seed new
//!   sessions.
//!
//! [`SessionSeeder`] joins the two: whenever a client connects it sends the
//! full string-table snapshot over the reliable layer.

use crate::error::{HookResult, ProcessError};
use crate::process::{Process, ProcessContext, ProcessHooks};
use async_trait::async_trait;
use dashmap::DashMap;
use keel_event_system::{Event, EventBus, EventError, EventKind, ProcessId, Subscription};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Message type name of the snapshot sent to new sessions.
pub const STRING_TABLE_SNAPSHOT: &str = "StringTableSnapshot";

/// Channel the snapshot is sent on.
pub const SNAPSHOT_CHANNEL: u8 = 0;

// ============================================================================
// Reliable Messaging
// ============================================================================

/// Delivery guarantee requested for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reliability {
    Unreliable,
    UnreliableSequenced,
    Reliable,
    ReliableOrdered,
}

/// Callback payload of the reliable layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReliableEvent {
    Connected { client_id: u32 },
    Closed { client_id: u32 },
    Received {
        client_id: u32,
        channel: u8,
        message_type: String,
        payload: Vec<u8>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("messaging layer is closed")]
    Closed,
    #[error("failed to encode {message_type}: {reason}")]
    Encode { message_type: String, reason: String },
}

pub type ReliableCallback = Arc<dyn Fn(&ReliableEvent) + Send + Sync>;

pub trait ReliableMessaging: Send + Sync + Debug {
    fn send(
        &self,
        client_id: u32,
        reliability: Reliability,
        channel: u8,
        message_type: &str,
        payload: Vec<u8>,
    ) -> Result<(), MessagingError>;

    /// Registers a callback for connection events.
    fn on_event(&self, callback: ReliableCallback);
}

/// A message handed to [`OutboxMessaging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub client_id: u32,
    pub reliability: Reliability,
    pub channel: u8,
    pub message_type: String,
    pub payload: Vec<u8>,
}

/// In-memory reliable layer that records everything it is asked to send.
#[derive(Default)]
pub struct OutboxMessaging {
    sent: Mutex<Vec<OutboundMessage>>,
    callbacks: RwLock<Vec<ReliableCallback>>,
    closed: std::sync::atomic::AtomicBool,
}

impl Debug for OutboxMessaging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxMessaging")
            .field("sent", &self.sent.lock().len())
            .field("callbacks", &self.callbacks.read().len())
            .finish()
    }
}

impl OutboxMessaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    pub fn take_sent(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Delivers `event` to every registered callback.
    pub fn emit(&self, event: &ReliableEvent) {
        for callback in self.callbacks.read().iter() {
            callback(event);
        }
    }

    /// Rejects all further sends.
    pub fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
    }
}

impl ReliableMessaging for OutboxMessaging {
    fn send(
        &self,
        client_id: u32,
        reliability: Reliability,
        channel: u8,
        message_type: &str,
        payload: Vec<u8>,
    ) -> Result<(), MessagingError> {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(MessagingError::Closed);
        }
        self.sent.lock().push(OutboundMessage {
            client_id,
            reliability,
            channel,
            message_type: message_type.to_string(),
            payload,
        });
        Ok(())
    }

    fn on_event(&self, callback: ReliableCallback) {
        self.callbacks.write().push(callback);
    }
}

// ============================================================================
// String Table
// ============================================================================

pub trait StringTable: Send + Sync + Debug {
    fn lookup(&self, id: u32) -> Option<String>;

    /// Every entry, ordered by ID.
    fn view(&self) -> BTreeMap<u32, String>;
}

#[derive(Debug, Default)]
pub struct InMemoryStringTable {
    entries: DashMap<u32, String>,
}

impl InMemoryStringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: u32, text: impl Into<String>) -> Option<String> {
        self.entries.insert(id, text.into())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(u32, S)> for InMemoryStringTable {
    fn from_iter<I: IntoIterator<Item = (u32, S)>>(iter: I) -> Self {
        let table = Self::new();
        for (id, text) in iter {
            table.insert(id, text);
        }
        table
    }
}

impl StringTable for InMemoryStringTable {
    fn lookup(&self, id: u32) -> Option<String> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    fn view(&self) -> BTreeMap<u32, String> {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}

/// Payload of the [`STRING_TABLE_SNAPSHOT`] message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringTableSnapshot {
    pub entries: BTreeMap<u32, String>,
}

// ============================================================================
// Session Seeder
// ============================================================================

#[derive(Debug)]
pub struct SeederHooks {
    messaging: Arc<dyn ReliableMessaging>,
    strings: Arc<dyn StringTable>,
    connections: Option<Subscription>,
    seeded: u64,
}

impl SeederHooks {
    pub fn new(messaging: Arc<dyn ReliableMessaging>, strings: Arc<dyn StringTable>) -> Self {
        Self { messaging, strings, connections: None, seeded: 0 }
    }

    /// Number of snapshots handed to the reliable layer.
    pub fn seeded(&self) -> u64 {
        self.seeded
    }

    fn seed(&mut self, client_id: u32) {
        match self.send_snapshot(client_id) {
            Ok(size) => {
                self.seeded += 1;
                debug!("Seeded client {} with a {} byte string table", client_id, size);
            }
            Err(e) => error!("❌ Failed to seed client {}: {}", client_id, e),
        }
    }

    fn send_snapshot(&self, client_id: u32) -> Result<usize, MessagingError> {
        let snapshot = StringTableSnapshot { entries: self.strings.view() };
        let payload = serde_json::to_vec(&snapshot).map_err(|e| MessagingError::Encode {
            message_type: STRING_TABLE_SNAPSHOT.to_string(),
            reason: e.to_string(),
        })?;
        let size = payload.len();
        self.messaging.send(
            client_id,
            Reliability::ReliableOrdered,
            SNAPSHOT_CHANNEL,
            STRING_TABLE_SNAPSHOT,
            payload,
        )?;
        Ok(size)
    }
}

#[async_trait]
impl ProcessHooks for SeederHooks {
    async fn on_start(&mut self, ctx: &ProcessContext<Self>) -> HookResult {
        let context = ctx.clone();
        self.connections = Some(ctx.bus().subscribe(EventKind::ClientConnected, move |event| {
            if let Event::ClientConnected(connected) = event {
                let client_id = connected.client_id;
                context
                    .dispatch_sync(move |hooks, _| hooks.seed(client_id))
                    .map_err(|e| EventError::HandlerExecution(e.to_string()))?;
            }
            Ok(())
        }));
        info!("📚 Session seeder {} ready", ctx.id());
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &ProcessContext<Self>) -> HookResult {
        if let Some(connections) = self.connections.take() {
            connections.dispose();
        }
        Ok(())
    }
}

pub type SessionSeeder = Process<SeederHooks>;

pub fn create_session_seeder(
    id: impl Into<ProcessId>,
    bus: Arc<EventBus>,
    messaging: Arc<dyn ReliableMessaging>,
    strings: Arc<dyn StringTable>,
) -> Result<SessionSeeder, ProcessError> {
    Process::new(id, bus, SeederHooks::new(messaging, strings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Lifecycle;
    use keel_event_system::{create_event_bus, current_timestamp, ClientConnectedEvent};

    fn connected(client_id: u32) -> ClientConnectedEvent {
        ClientConnectedEvent {
            client_id,
            name: format!("client-{}", client_id),
            address: "127.0.0.1:5000".parse().unwrap(),
            timestamp: current_timestamp(),
        }
    }

    #[test]
    fn test_string_table_lookup_and_view() {
        let table: InMemoryStringTable = [(2, "two"), (1, "one")].into_iter().collect();
        assert_eq!(table.lookup(1).as_deref(), Some("one"));
        assert_eq!(table.lookup(3), None);
        assert_eq!(table.view().into_keys().collect::<Vec<_>>(), vec![1, 2]);

        assert_eq!(table.insert(1, "uno").as_deref(), Some("one"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_outbox_callbacks_and_close() {
        let outbox = OutboxMessaging::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        outbox.on_event(Arc::new(move |event: &ReliableEvent| sink.lock().push(event.clone())));

        outbox.emit(&ReliableEvent::Connected { client_id: 4 });
        assert_eq!(*seen.lock(), vec![ReliableEvent::Connected { client_id: 4 }]);

        outbox.send(4, Reliability::Unreliable, 1, "Ping", vec![]).unwrap();
        outbox.close();
        assert!(matches!(
            outbox.send(4, Reliability::Unreliable, 1, "Ping", vec![]),
            Err(MessagingError::Closed)
        ));
        assert_eq!(outbox.take_sent().len(), 1);
        assert!(outbox.sent().is_empty());
    }

    #[tokio::test]
    async fn test_seeder_sends_snapshot_on_connect() {
        let bus = create_event_bus();
        let outbox = Arc::new(OutboxMessaging::new());
        let strings: Arc<InMemoryStringTable> = Arc::new([(1, "hello"), (7, "world")].into_iter().collect());

        let seeder = create_session_seeder("seeder", bus.clone(), outbox.clone(), strings).unwrap();
        seeder.initialize().unwrap().wait().await.unwrap();
        seeder.start().unwrap().wait().await.unwrap();

        bus.post(connected(42)).unwrap();
        assert_eq!(seeder.execute(|hooks, _| hooks.seeded()).await.unwrap(), 1);

        let sent = outbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].client_id, 42);
        assert_eq!(sent[0].reliability, Reliability::ReliableOrdered);
        assert_eq!(sent[0].message_type, STRING_TABLE_SNAPSHOT);

        let snapshot: StringTableSnapshot = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(snapshot.entries.get(&7).map(String::as_str), Some("world"));
    }

    #[tokio::test]
    async fn test_seeder_ignores_connections_after_stop() {
        let bus = create_event_bus();
        let outbox = Arc::new(OutboxMessaging::new());
        let seeder =
            create_session_seeder("seeder", bus.clone(), outbox.clone(), Arc::new(InMemoryStringTable::new()))
                .unwrap();
        seeder.initialize().unwrap().wait().await.unwrap();
        seeder.start().unwrap().wait().await.unwrap();
        seeder.stop().unwrap().wait().await.unwrap();

        bus.post(connected(1)).unwrap();
        assert_eq!(seeder.execute(|hooks, _| hooks.seeded()).await.unwrap(), 0);
        assert!(outbox.sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_does_not_stop_seeder() {
        let bus = create_event_bus();
        let outbox = Arc::new(OutboxMessaging::new());
        let seeder =
            create_session_seeder("seeder", bus.clone(), outbox.clone(), Arc::new(InMemoryStringTable::new()))
                .unwrap();
        seeder.initialize().unwrap().wait().await.unwrap();
        seeder.start().unwrap().wait().await.unwrap();

        outbox.close();
        bus.post(connected(1)).unwrap();
        assert_eq!(seeder.execute(|hooks, _| hooks.seeded()).await.unwrap(), 0);
        assert_eq!(seeder.state(), crate::process::ProcessState::Started);
    }
}
