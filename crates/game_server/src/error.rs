//! Error types for processes, client sessions and the server as a whole.

use keel_event_system::{EventError, ProcessId};
use keel_network::{NetworkError, PoolError};
use std::net::SocketAddr;
use std::time::Duration;

/// Error type returned by process hooks.
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type returned by process hooks.
pub type HookResult = Result<(), HookError>;

/// Errors from the process lifecycle and execution context.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The execution context was torn down; nothing was queued
    #[error("process {0} has already stopped")]
    AlreadyStopped(ProcessId),
    /// The caller stopped waiting; the work itself still runs
    #[error("timed out after {timeout:?} waiting for {process} to {operation}")]
    WaitTimedOut {
        process: ProcessId,
        operation: &'static str,
        timeout: Duration,
    },
    #[error("{operation} hook of {process} failed: {message}")]
    Hook {
        process: ProcessId,
        operation: &'static str,
        message: String,
    },
    #[error("{operation} of {process} panicked: {message}")]
    Panicked {
        process: ProcessId,
        operation: &'static str,
        message: String,
    },
    #[error("no Tokio runtime available to host process {0}")]
    NoRuntime(ProcessId),
    #[error("event bus error: {0}")]
    Event(#[from] EventError),
}

/// Errors from the client session handler.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("encoded message is {size} bytes, limit is {limit}")]
    MessageTooLarge { size: u64, limit: usize },
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to decode datagram: {0}")]
    Decode(String),
    #[error("name '{0}' is already in use")]
    NameTaken(String),
    #[error("{0} already has an active session")]
    AlreadyConnected(SocketAddr),
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
    #[error("client id allocation failed: {0}")]
    Pool(#[from] PoolError),
}

/// Errors surfaced by [`crate::GameServer`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
    #[error("process error: {0}")]
    Process(#[from] ProcessError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// Renders a caught panic payload for logs and errors.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
