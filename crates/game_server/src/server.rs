//! Composition root.
//!
//! [`GameServer`] owns the event bus, the network provider and every process,
//! and drives them through their lifecycle together.

use crate::collaborators::{
    create_session_seeder, InMemoryStringTable, OutboxMessaging, ReliableMessaging, SessionSeeder, StringTable,
};
use crate::config::ServerConfig;
use crate::error::{ProcessError, ServerError};
use crate::process::{Completion, Lifecycle, ProcessState};
use crate::session::{create_session_handler, ClientSessionHandler, SessionHandlerConfig, SessionStats};
use crate::supervisor::{create_supervisor, Supervisor};
use crate::tick::{create_tick_source, TickSource};
use keel_event_system::{create_event_bus, EventBus, ProcessId};
use keel_network::{create_provider, NetworkProvider};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const SESSION_PROCESS: &str = "sessions";
pub const SEEDER_PROCESS: &str = "seeder";
pub const TICK_PROCESS: &str = "tick";
pub const SUPERVISOR_PROCESS: &str = "supervisor";

/// The assembled server.
///
/// Processes are started in the order session handler, seeder, tick source,
/// supervisor and shut down in reverse, so ticks stop before the handler
/// closes its endpoint and the supervisor never reports a process that is
/// going away on purpose.
pub struct GameServer {
    config: ServerConfig,
    bus: Arc<EventBus>,
    provider: Arc<dyn NetworkProvider>,
    sessions: ClientSessionHandler,
    seeder: SessionSeeder,
    tick: TickSource,
    supervisor: Supervisor,
}

impl std::fmt::Debug for GameServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameServer")
            .field("provider", &self.provider.name())
            .field("processes", &self.process_states())
            .finish()
    }
}

impl GameServer {
    /// Builds a server with in-memory collaborators.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        Self::with_collaborators(config, Arc::new(OutboxMessaging::new()), Arc::new(InMemoryStringTable::new()))
    }

    pub fn with_collaborators(
        config: ServerConfig,
        messaging: Arc<dyn ReliableMessaging>,
        strings: Arc<dyn StringTable>,
    ) -> Result<Self, ServerError> {
        let bus = create_event_bus();
        let provider = create_provider(config.network);
        Self::assemble(config, bus, provider, messaging, strings)
    }

    /// Builds a server on an existing bus and provider.
    pub fn assemble(
        config: ServerConfig,
        bus: Arc<EventBus>,
        provider: Arc<dyn NetworkProvider>,
        messaging: Arc<dyn ReliableMessaging>,
        strings: Arc<dyn StringTable>,
    ) -> Result<Self, ServerError> {
        let sessions = create_session_handler(
            SESSION_PROCESS,
            bus.clone(),
            provider.clone(),
            SessionHandlerConfig::from(&config),
        )?;
        let seeder = create_session_seeder(SEEDER_PROCESS, bus.clone(), messaging, strings)?;
        let tick = create_tick_source(TICK_PROCESS, bus.clone(), config.tick_interval())?;

        let watched = [SESSION_PROCESS, SEEDER_PROCESS, TICK_PROCESS, SUPERVISOR_PROCESS].map(ProcessId::from);
        let supervisor = create_supervisor(SUPERVISOR_PROCESS, bus.clone(), watched, config.supervisor_period())?;

        Ok(Self { config, bus, provider, sessions, seeder, tick, supervisor })
    }

    fn processes(&self) -> [&dyn Lifecycle; 4] {
        [&self.sessions, &self.seeder, &self.tick, &self.supervisor]
    }

    /// Initializes every process, then starts every process.
    ///
    /// A hook failure aborts startup; a process that is merely slow is logged
    /// and left to finish on its own.
    pub async fn start(&self) -> Result<(), ServerError> {
        info!("🚀 Starting game server ({} network)", self.provider.name());

        for process in self.processes() {
            self.settle(process.initialize()).await?;
        }
        for process in self.processes() {
            self.settle(process.start()).await?;
        }

        match self.session_addr().await {
            Some(addr) => info!("✅ Game server accepting clients on {}", addr),
            None => warn!("⚠️ Game server started without a session endpoint"),
        }
        Ok(())
    }

    /// Stops then destroys every process in reverse start order, then shuts
    /// the bus down.
    ///
    /// Keeps going past failures and returns the first one.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down game server");
        let mut first_error = None;

        for process in self.processes().into_iter().rev() {
            if let Err(e) = self.settle(process.stop()).await {
                error!("❌ Failed to stop {}: {}", process.id(), e);
                first_error = first_error.or(Some(e));
            }
        }
        for process in self.processes().into_iter().rev() {
            if let Err(e) = self.settle(process.destroy()).await {
                error!("❌ Failed to destroy {}: {}", process.id(), e);
                first_error = first_error.or(Some(e));
            }
        }

        self.bus.shut_down();
        info!("✅ Game server shutdown complete");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Waits out one lifecycle operation. Slow processes and processes that
    /// are already torn down are logged, not failed.
    async fn settle(&self, completion: Result<Completion, ProcessError>) -> Result<(), ProcessError> {
        let mut completion = match completion {
            Ok(completion) => completion,
            Err(ProcessError::AlreadyStopped(id)) => {
                debug!("{} is already torn down", id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        match completion.wait_timeout(self.config.lifecycle_timeout()).await {
            Err(e @ ProcessError::WaitTimedOut { .. }) => {
                warn!("⚠️ {}", e);
                Ok(())
            }
            other => other,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn provider(&self) -> &Arc<dyn NetworkProvider> {
        &self.provider
    }

    pub fn process_states(&self) -> Vec<(ProcessId, ProcessState)> {
        self.processes()
            .iter()
            .map(|process| (process.id().clone(), process.state()))
            .collect()
    }

    /// Address the session handler is bound to, once initialized.
    pub async fn session_addr(&self) -> Option<SocketAddr> {
        self.sessions.execute(|hooks, _| hooks.local_addr()).await.ok().flatten()
    }

    pub async fn session_stats(&self) -> Result<SessionStats, ServerError> {
        Ok(self.sessions.execute(|hooks, _| hooks.stats()).await?)
    }
}
