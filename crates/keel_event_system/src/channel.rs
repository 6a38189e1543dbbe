//! Broadcast channel with synchronous fan-out.
//!
//! A [`Channel`] delivers each posted event to every matching subscriber on
//! the posting thread. Handlers are snapshotted before delivery, so a handler
//! may post, subscribe or dispose its own subscription without deadlocking.

use crate::error::EventError;
use crate::events::{Event, EventFilter};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error};

/// Callback invoked for every matching event.
pub type EventHandler = Arc<dyn Fn(&Event) -> Result<(), EventError> + Send + Sync>;

struct Subscriber {
    id: u64,
    filter: EventFilter,
    handler: EventHandler,
}

/// A named publish/subscribe channel.
pub struct Channel {
    label: String,
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("label", &self.label)
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Channel {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Registers a handler for events matching `filter`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// disposed or dropped.
    pub fn subscribe<F>(self: &Arc<Self>, filter: impl Into<EventFilter>, handler: F) -> Subscription
    where
        F: Fn(&Event) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push(Subscriber {
            id,
            filter: filter.into(),
            handler: Arc::new(handler),
        });
        debug!("📝 Subscribed #{} on channel {}", id, self.label);
        Subscription { channel: Arc::downgrade(self), id: Some(id) }
    }

    /// Delivers `event` to every matching subscriber and returns how many
    /// handlers were invoked.
    ///
    /// Handler failures are logged and do not stop delivery to the rest.
    pub fn post(&self, event: &Event) -> Result<usize, EventError> {
        if self.is_closed() {
            return Err(EventError::ChannelClosed(self.label.clone()));
        }

        let kind = event.kind();
        let handlers: Vec<EventHandler> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.filter.matches(kind))
            .map(|s| s.handler.clone())
            .collect();

        for handler in &handlers {
            if let Err(e) = handler(event) {
                error!("❌ Handler on {} failed for {}: {}", self.label, kind, e);
            }
        }

        Ok(handlers.len())
    }

    /// Closes the channel and drops all subscribers. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.subscribers.write().clear();
            debug!("Channel {} closed", self.label);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.write().retain(|s| s.id != id);
    }
}

/// Handle to a registered subscriber. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes the handler"]
pub struct Subscription {
    channel: Weak<Channel>,
    id: Option<u64>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    /// Removes the handler from its channel.
    pub fn dispose(mut self) {
        self.release();
    }

    /// Keeps the handler registered for the lifetime of the channel.
    pub fn detach(mut self) {
        self.id = None;
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            if let Some(channel) = self.channel.upgrade() {
                channel.unsubscribe(id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
