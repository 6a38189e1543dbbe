//! Termination signals for the Keel binary.
//!
//! The server is only torn down properly through [`game_server::GameServer::shutdown`]:
//! connected clients get a server disconnect, the session endpoint is closed
//! and the bus is shut down. The binary therefore waits for a signal and runs
//! that shutdown instead of letting the default handler kill the process.

use std::fmt;
use tokio::signal;
use tracing::info;

/// Which signal asked the server to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => f.write_str("interrupt"),
            ShutdownSignal::Terminate => f.write_str("terminate"),
        }
    }
}

/// Returns once a termination signal arrives.
///
/// SIGINT and SIGTERM on Unix, Ctrl+C elsewhere. Fails only if the handlers
/// cannot be installed.
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    #[cfg(unix)]
    let received = {
        use signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = interrupt.recv() => ShutdownSignal::Interrupt,
            _ = terminate.recv() => ShutdownSignal::Terminate,
        }
    };

    #[cfg(not(unix))]
    let received = {
        signal::ctrl_c().await?;
        ShutdownSignal::Interrupt
    };

    info!("📡 Received {} signal", received);
    Ok(received)
}
