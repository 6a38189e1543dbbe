//! Errors produced by the event bus and its channels.

use crate::events::EntityId;

/// Errors that can occur during event bus operations.
///
/// Posting after shutdown is always surfaced to the caller; the bus never
/// swallows an event silently.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// The bus has been shut down and no longer accepts events
    #[error("event bus has been shut down")]
    BusShutDown,
    /// A sub-channel was closed while the caller still held it
    #[error("channel '{0}' is closed")]
    ChannelClosed(String),
    /// No live sub-channel exists for the entity
    #[error("no channel for entity {0}")]
    UnknownEntity(EntityId),
    /// A subscriber reported a failure while handling an event
    #[error("handler execution error: {0}")]
    HandlerExecution(String),
}
