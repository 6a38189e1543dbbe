//! # Heartbeat Protocol
//!
//! Shared vocabulary between the supervisor and every supervised process.
//! Both sides depend on this module instead of on each other:
//!
//! ```text
//! Supervisor ──HeartbeatRequest──► bus ──► Process (own context)
//!     ▲                                        │
//!     └────────── HeartbeatResponse ◄── bus ◄──┘
//! ```
//!
//! A process that misses a full cycle is reported with [`ProcessTimedOut`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a process, used to tag heartbeat responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub String);

impl ProcessId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ProcessId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Broadcast by the supervisor once per cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Monotonic cycle counter of the issuing supervisor
    pub cycle: u64,
    pub timestamp: u64,
}

/// Answer to a [`HeartbeatRequest`], produced on the responder's own context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub process: ProcessId,
    /// Cycle of the request being answered
    pub cycle: u64,
}

/// A watched process failed to answer within one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessTimedOut {
    pub process: ProcessId,
    /// Cycle in which the request went unanswered
    pub cycle: u64,
    pub timestamp: u64,
}
