//! # Game Server - Runtime Core
//!
//! The long-lived subsystems of a Keel server and the root that wires them
//! together. Every subsystem is a [`Process`]: a named unit with a four-state
//! lifecycle and its own sequential execution context, talking to the others
//! only through the shared [`EventBus`](keel_event_system::EventBus).
//!
//! ## Processes
//!
//! * **Client session handler** - owns the packet source, runs the hello
//!   handshake and tracks connected clients
//! * **Session seeder** - sends every new client the string-table snapshot
//!   over the reliable messaging layer
//! * **Tick source** - posts `Tick` events at a fixed interval
//! * **Supervisor** - polls every process for heartbeats and reports the ones
//!   that stop answering
//!
//! ## Message Flow
//!
//! 1. The tick source posts a `Tick`
//! 2. The session handler re-dispatches onto its own context and polls its
//!    endpoint
//! 3. Each datagram is decoded; a `Hello` allocates a client ID, is answered
//!    and announced with `ClientConnected`
//! 4. Independently, the supervisor posts `HeartbeatRequest` every period and
//!    collects the responses
//!
//! ## Error Handling
//!
//! Each layer has its own error enum ([`ProcessError`], [`SessionError`],
//! [`ServerError`]). Protocol errors are logged and the datagram is dropped;
//! capacity errors fail only the operation that hit them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use game_server::{create_server, ServerConfig};
//!
//! # async fn run() -> Result<(), game_server::ServerError> {
//! let server = create_server(ServerConfig::default())?;
//! server.start().await?;
//! // ... serve until asked to stop ...
//! server.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub use collaborators::{
    InMemoryStringTable, OutboxMessaging, Reliability, ReliableEvent, ReliableMessaging, SessionSeeder,
    StringTable, StringTableSnapshot,
};
pub use config::ServerConfig;
pub use error::{HookError, HookResult, ProcessError, ServerError, SessionError};
pub use process::{Completion, Lifecycle, Process, ProcessContext, ProcessHooks, ProcessState};
pub use server::GameServer;
pub use session::{ClientPacket, ClientSessionHandler, HelloReply, ServerPacket, SessionHandlerConfig, SessionStats};
pub use supervisor::{HeartbeatMonitor, Supervisor};
pub use tick::TickSource;

pub mod collaborators;
pub mod config;
pub mod error;
pub mod process;
pub mod server;
pub mod session;
pub mod supervisor;
pub mod tick;

/// Builds a server from `config` with in-memory collaborators.
///
/// Must be called inside a Tokio runtime.
pub fn create_server(config: ServerConfig) -> Result<GameServer, ServerError> {
    GameServer::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_event_system::ProcessId;

    fn quiet_config() -> ServerConfig {
        ServerConfig {
            tick_interval_ms: 10,
            supervisor_period_ms: 50,
            lifecycle_timeout_ms: 1000,
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_lifecycle_states() {
        let server = create_server(quiet_config()).unwrap();
        assert!(server
            .process_states()
            .iter()
            .all(|(_, state)| *state == ProcessState::Uninitialized));

        server.start().await.unwrap();
        let states = server.process_states();
        assert_eq!(states.len(), 4);
        assert!(states.iter().all(|(_, state)| *state == ProcessState::Started));
        assert_eq!(states[0].0, ProcessId::new(server::SESSION_PROCESS));

        server.shutdown().await.unwrap();
        assert!(server
            .process_states()
            .iter()
            .all(|(_, state)| *state == ProcessState::Destroyed));
        assert!(server.event_bus().is_shut_down());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_twice_is_harmless() {
        let server = create_server(quiet_config()).unwrap();
        server.start().await.unwrap();
        server.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_client_id_range_is_rejected() {
        let config = ServerConfig { client_id_min: 10, client_id_max: 1, ..quiet_config() };
        assert!(matches!(
            create_server(config),
            Err(ServerError::Session(SessionError::Pool(_)))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_zero_supervisor_period_fails_start() {
        let server = create_server(ServerConfig { supervisor_period_ms: 0, ..quiet_config() }).unwrap();
        assert!(matches!(
            server.start().await,
            Err(ServerError::Process(ProcessError::Hook { operation: "start", .. }))
        ));
        server.shutdown().await.unwrap();
    }

    #[test]
    fn test_create_server_needs_runtime() {
        assert!(matches!(
            create_server(ServerConfig::default()),
            Err(ServerError::Process(ProcessError::NoRuntime(_)))
        ));
    }
}
