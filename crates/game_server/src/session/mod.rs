//! # Client Session Handler
//!
//! Process that owns the server-side packet source and runs the handshake.
//!
//! ## Lifecycle
//!
//! - **initialize**: binds the endpoint through the configured provider
//! - **start**: subscribes to ticks; every tick is re-dispatched onto the
//!   handler's own context, where the endpoint is polled
//! - **stop**: unsubscribes from ticks
//! - **destroy**: disconnects remaining sessions and closes the endpoint
//!
//! ## Handshake
//!
//! A `Hello { name }` from a new address allocates an unpredictable client ID,
//! replies `Hello(Ok { client_id })` and posts `ClientConnected`. A name that
//! is already live gets `Hello(Error { .. })` and nothing else happens.
//! Datagrams that fail to decode are logged and dropped.

pub mod protocol;
pub mod registry;

pub use protocol::{ClientPacket, HelloReply, ServerPacket, DEFAULT_MAX_MESSAGE_SIZE};
pub use registry::{ClientSession, SessionRegistry};

use crate::config::ServerConfig;
use crate::error::{HookResult, ServerError, SessionError};
use crate::process::{Process, ProcessContext, ProcessHooks};
use async_trait::async_trait;
use keel_event_system::{
    current_timestamp, ClientConnectedEvent, ClientDataEvent, ClientDisconnectedEvent, DisconnectReason,
    Event, EventBus, EventError, EventKind, ProcessId, Subscription,
};
use keel_network::{AddressConfig, Endpoint, NetworkProvider, UnpredictableIdPool};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Settings for a [`ClientSessionHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandlerConfig {
    pub endpoint: AddressConfig,
    /// Idle time before a session is dropped; zero disables expiry
    pub session_timeout: Duration,
    pub max_message_size: usize,
    pub client_id_min: u32,
    pub client_id_max: u32,
}

impl Default for SessionHandlerConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for SessionHandlerConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            session_timeout: config.session_timeout(),
            max_message_size: config.max_message_size,
            client_id_min: config.client_id_min,
            client_id_max: config.client_id_max,
        }
    }
}

/// Traffic counters for monitoring.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub datagrams_received: u64,
    pub malformed_datagrams: u64,
    pub handshakes_accepted: u64,
    pub handshakes_rejected: u64,
    pub disconnects: u64,
    pub active_sessions: usize,
}

pub struct SessionHooks {
    provider: Arc<dyn NetworkProvider>,
    config: SessionHandlerConfig,
    endpoint: Option<Box<dyn Endpoint>>,
    sessions: SessionRegistry,
    scratch: Vec<u8>,
    ticks: Option<Subscription>,
    stats: SessionStats,
}

impl std::fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHooks")
            .field("provider", &self.provider.name())
            .field("endpoint", &self.local_addr())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl SessionHooks {
    pub fn new(provider: Arc<dyn NetworkProvider>, config: SessionHandlerConfig) -> Result<Self, SessionError> {
        let ids = UnpredictableIdPool::new(config.client_id_min, config.client_id_max)?;
        Ok(Self {
            provider,
            scratch: Vec::with_capacity(config.max_message_size),
            config,
            endpoint: None,
            sessions: SessionRegistry::new(ids),
            ticks: None,
            stats: SessionStats::default(),
        })
    }

    /// Address of the bound endpoint, once initialized.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.as_ref().map(|e| e.local_addr())
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats { active_sessions: self.sessions.len(), ..self.stats.clone() }
    }

    /// One tick of work: drain the endpoint, then expire idle sessions.
    pub fn service(&mut self, ctx: &ProcessContext<Self>, now: Instant) {
        let Some(endpoint) = self.endpoint.as_mut() else {
            return;
        };

        let mut inbound = Vec::new();
        if let Err(e) = endpoint.poll(&mut |from, data| inbound.push((from, data.to_vec()))) {
            warn!("⚠️ Poll on {} failed: {}", endpoint.local_addr(), e);
        }

        for (from, datagram) in inbound {
            self.handle_datagram(ctx, from, &datagram, now);
        }
        self.expire_idle(ctx, now);
    }

    fn handle_datagram(&mut self, ctx: &ProcessContext<Self>, from: SocketAddr, datagram: &[u8], now: Instant) {
        self.stats.datagrams_received += 1;
        let packet = match protocol::decode::<ClientPacket>(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.malformed_datagrams += 1;
                warn!("⚠️ Dropped {} byte datagram from {}: {}", datagram.len(), from, e);
                return;
            }
        };

        match packet {
            ClientPacket::Hello { name } => self.handle_hello(ctx, from, name, now),
            ClientPacket::Data { payload } => match self.sessions.touch(&from, now) {
                Some(client_id) => post(ctx, ClientDataEvent { client_id, payload }),
                None => debug!("Dropped data from {} without a session", from),
            },
            ClientPacket::Goodbye => match self.sessions.id_for_address(&from) {
                Some(client_id) => self.disconnect(ctx, client_id, DisconnectReason::Requested),
                None => debug!("Goodbye from {} without a session", from),
            },
        }
    }

    fn handle_hello(&mut self, ctx: &ProcessContext<Self>, from: SocketAddr, name: String, now: Instant) {
        let client_id = match self.sessions.register(&name, from, now) {
            Ok(client_id) => client_id,
            Err(e) => {
                self.stats.handshakes_rejected += 1;
                match &e {
                    SessionError::Pool(_) => error!("❌ Cannot admit '{}' from {}: {}", name, from, e),
                    _ => warn!("⚠️ Rejected hello '{}' from {}: {}", name, from, e),
                }
                self.reply(from, HelloReply::Error { message: e.to_string() });
                return;
            }
        };

        // The client only has a session once it has been told its ID.
        if let Err(e) = self.send(from, &ServerPacket::Hello(HelloReply::Ok { client_id })) {
            self.sessions.remove(client_id);
            self.stats.handshakes_rejected += 1;
            error!("❌ Cannot admit '{}' from {}: {}", name, from, e);
            return;
        }

        self.stats.handshakes_accepted += 1;
        info!("👋 Client {} connected as '{}' from {}", client_id, name, from);
        post(
            ctx,
            ClientConnectedEvent {
                client_id,
                name,
                address: from,
                timestamp: current_timestamp(),
            },
        );
    }

    fn reply(&mut self, to: SocketAddr, reply: HelloReply) {
        if let Err(e) = self.send(to, &ServerPacket::Hello(reply)) {
            error!("❌ Failed to reply to {}: {}", to, e);
        }
    }

    fn send(&mut self, to: SocketAddr, packet: &ServerPacket) -> Result<(), SessionError> {
        protocol::encode_into(&mut self.scratch, self.config.max_message_size, packet)?;
        if let Some(endpoint) = self.endpoint.as_mut() {
            endpoint.send_to(to, &self.scratch)?;
        }
        Ok(())
    }

    fn disconnect(&mut self, ctx: &ProcessContext<Self>, client_id: u32, reason: DisconnectReason) {
        let Some(session) = self.sessions.remove(client_id) else {
            return;
        };
        self.stats.disconnects += 1;
        info!("👋 Client {} ('{}') disconnected: {:?}", client_id, session.name, reason);
        post(
            ctx,
            ClientDisconnectedEvent {
                client_id,
                name: session.name,
                reason,
                timestamp: current_timestamp(),
            },
        );
    }

    fn expire_idle(&mut self, ctx: &ProcessContext<Self>, now: Instant) {
        if self.config.session_timeout.is_zero() {
            return;
        }
        for client_id in self.sessions.idle(now, self.config.session_timeout) {
            self.disconnect(ctx, client_id, DisconnectReason::TimedOut);
        }
    }
}

fn post<H>(ctx: &ProcessContext<H>, event: impl Into<Event>) {
    let event = event.into();
    let kind = event.kind();
    if let Err(e) = ctx.bus().post(event) {
        debug!("{} could not post {}: {}", ctx.id(), kind, e);
    }
}

#[async_trait]
impl ProcessHooks for SessionHooks {
    async fn on_initialize(&mut self, ctx: &ProcessContext<Self>) -> HookResult {
        let endpoint = self.provider.create_packet_source(&self.config.endpoint)?;
        info!(
            "🌐 Session handler {} listening on {} ({})",
            ctx.id(),
            endpoint.local_addr(),
            self.provider.name()
        );
        self.endpoint = Some(endpoint);
        Ok(())
    }

    async fn on_start(&mut self, ctx: &ProcessContext<Self>) -> HookResult {
        let context = ctx.clone();
        self.ticks = Some(ctx.bus().subscribe(EventKind::Tick, move |_| {
            context
                .dispatch_sync(|hooks, ctx| hooks.service(ctx, Instant::now()))
                .map_err(|e| EventError::HandlerExecution(e.to_string()))
        }));
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &ProcessContext<Self>) -> HookResult {
        if let Some(ticks) = self.ticks.take() {
            ticks.dispose();
        }
        Ok(())
    }

    async fn on_destroy(&mut self, ctx: &ProcessContext<Self>) -> HookResult {
        for client_id in self.sessions.client_ids() {
            self.disconnect(ctx, client_id, DisconnectReason::Server);
        }
        if let Some(mut endpoint) = self.endpoint.take() {
            endpoint.close();
            info!("🌐 Session handler {} closed {}", ctx.id(), endpoint.local_addr());
        }
        Ok(())
    }
}

pub type ClientSessionHandler = Process<SessionHooks>;

pub fn create_session_handler(
    id: impl Into<ProcessId>,
    bus: Arc<EventBus>,
    provider: Arc<dyn NetworkProvider>,
    config: SessionHandlerConfig,
) -> Result<ClientSessionHandler, ServerError> {
    let hooks = SessionHooks::new(provider, config)?;
    Ok(Process::new(id, bus, hooks)?)
}
