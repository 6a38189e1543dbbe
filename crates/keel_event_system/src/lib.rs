//! # Keel Event System
//!
//! The typed publish/subscribe backbone of the Keel runtime core. Every
//! long-lived process talks to every other process exclusively through an
//! [`EventBus`].
//!
//! ## Core Features
//!
//! - **Tagged events**: all events are variants of [`Event`], filtered by a
//!   stable [`EventKind`] discriminant
//! - **Synchronous fan-out**: [`EventBus::post`] delivers on the caller's
//!   thread; nothing is queued per subscriber
//! - **Entity sub-channels**: one private [`Channel`] per live entity, driven
//!   by entity lifecycle events
//! - **Heartbeat protocol**: the request/response/timed-out vocabulary shared
//!   by the supervisor and supervised processes
//!
//! ## Quick Start Example
//!
//! ```rust
//! use keel_event_system::*;
//!
//! let bus = create_event_bus();
//!
//! let subscription = bus.subscribe(EventKind::Tick, |event| {
//!     println!("tick: {:?}", event);
//!     Ok(())
//! });
//!
//! bus.post(TickEvent { sequence: 1, timestamp: current_timestamp() })?;
//! subscription.dispose();
//!
//! bus.shut_down();
//! assert_eq!(bus.post(TickEvent { sequence: 2, timestamp: 0 }), Err(EventError::BusShutDown));
//! # Ok::<(), EventError>(())
//! ```

pub mod bus;
pub mod channel;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod utils;

pub use bus::{EventBus, EventBusStats};
pub use channel::{Channel, EventHandler, Subscription};
pub use error::EventError;
pub use events::*;
pub use heartbeat::{HeartbeatRequest, HeartbeatResponse, ProcessId, ProcessTimedOut};
pub use utils::current_timestamp;

use std::sync::Arc;

/// Creates a new shared event bus.
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::new())
}
