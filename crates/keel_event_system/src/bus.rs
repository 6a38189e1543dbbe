//! # Event Bus
//!
//! The process-wide publish/subscribe hub. [`EventBus::post`] fans out
//! synchronously on the caller's thread; subscribers that own state must hop
//! onto their own execution context before touching it.
//!
//! The bus also tracks one private sub-channel per live entity:
//!
//! | lifecycle event | effect on sub-channels |
//! |---|---|
//! | `Created` | channel created before fan-out |
//! | `TraitsChanged` | forwarded to an existing channel, otherwise ignored |
//! | `Destroyed` | forwarded, then removed and closed |

use crate::channel::{Channel, Subscription};
use crate::error::EventError;
use crate::events::{EntityId, EntityLifecycle, Event, EventFilter};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Snapshot of bus activity for monitoring.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBusStats {
    /// Events accepted by [`EventBus::post`]
    pub events_posted: u64,
    /// Handler invocations on the main channel
    pub deliveries: u64,
    /// Currently registered main-channel subscribers
    pub subscribers: usize,
    /// Live entity sub-channels
    pub entity_channels: usize,
}

/// Typed broadcast bus shared by every process.
pub struct EventBus {
    main: Arc<Channel>,
    entities: Mutex<HashMap<EntityId, Arc<Channel>>>,
    events_posted: AtomicU64,
    deliveries: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("main", &self.main)
            .field("entity_channels", &self.entity_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            main: Channel::new("main"),
            entities: Mutex::new(HashMap::new()),
            events_posted: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
        }
    }

    /// Registers a handler on the main channel.
    pub fn subscribe<F>(&self, filter: impl Into<EventFilter>, handler: F) -> Subscription
    where
        F: Fn(&Event) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.main.subscribe(filter, handler)
    }

    /// Posts an event to every current subscriber.
    ///
    /// Fails with [`EventError::BusShutDown`] once [`EventBus::shut_down`]
    /// has been called.
    pub fn post(&self, event: impl Into<Event>) -> Result<(), EventError> {
        let event = event.into();
        if self.main.is_closed() {
            return Err(EventError::BusShutDown);
        }

        let lifecycle = match &event {
            Event::EntityLifecycle(e) => Some((e.entity_id, e.lifecycle)),
            _ => None,
        };

        if let Some((entity_id, EntityLifecycle::Created)) = lifecycle {
            self.open_entity_channel(entity_id)?;
        }

        let delivered = self.main.post(&event).map_err(|_| EventError::BusShutDown)?;
        self.events_posted.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);

        match lifecycle {
            Some((entity_id, EntityLifecycle::TraitsChanged)) => {
                if let Some(channel) = self.entity_channel(entity_id) {
                    forward(&channel, &event);
                }
            }
            Some((entity_id, EntityLifecycle::Destroyed)) => {
                let removed = self.entities.lock().remove(&entity_id);
                if let Some(channel) = removed {
                    forward(&channel, &event);
                    channel.close();
                    debug!("🗑️ Closed channel for entity {}", entity_id);
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Posts directly to an entity's sub-channel.
    pub fn post_to_entity(&self, entity_id: EntityId, event: impl Into<Event>) -> Result<usize, EventError> {
        if self.main.is_closed() {
            return Err(EventError::BusShutDown);
        }
        let channel = self
            .entity_channel(entity_id)
            .ok_or(EventError::UnknownEntity(entity_id))?;
        channel.post(&event.into())
    }

    /// Looks up the sub-channel of a live entity.
    pub fn entity_channel(&self, entity_id: EntityId) -> Option<Arc<Channel>> {
        self.entities.lock().get(&entity_id).cloned()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.lock().len()
    }

    /// Closes the main channel and every remaining sub-channel. Idempotent.
    pub fn shut_down(&self) {
        if self.main.is_closed() {
            return;
        }
        self.main.close();
        let remaining: Vec<Arc<Channel>> = self.entities.lock().drain().map(|(_, c)| c).collect();
        for channel in &remaining {
            channel.close();
        }
        info!("🛑 Event bus shut down ({} entity channels closed)", remaining.len());
    }

    pub fn is_shut_down(&self) -> bool {
        self.main.is_closed()
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            events_posted: self.events_posted.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            subscribers: self.main.subscriber_count(),
            entity_channels: self.entity_count(),
        }
    }

    fn open_entity_channel(&self, entity_id: EntityId) -> Result<(), EventError> {
        let mut entities = self.entities.lock();
        // shut_down closes main before draining, so this check under the
        // lock never leaves a channel behind the drain.
        if self.main.is_closed() {
            return Err(EventError::BusShutDown);
        }
        if entities.contains_key(&entity_id) {
            warn!("⚠️ Entity {} created twice; keeping existing channel", entity_id);
            return Ok(());
        }
        entities.insert(entity_id, Channel::new(format!("entity:{}", entity_id)));
        debug!("📡 Opened channel for entity {}", entity_id);
        Ok(())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn forward(channel: &Channel, event: &Event) {
    if let Err(e) = channel.post(event) {
        debug!("Dropped {} for {}: {}", event.kind(), channel.label(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EntityLifecycleEvent, EventKind, TickEvent};
    use std::sync::atomic::AtomicUsize;

    fn tick() -> TickEvent {
        TickEvent { sequence: 1, timestamp: 0 }
    }

    #[test]
    fn test_entity_channel_lifecycle() {
        let bus = EventBus::new();

        bus.post(EntityLifecycleEvent::created(EntityId(7))).unwrap();
        let channel = bus.entity_channel(EntityId(7)).expect("channel should exist");

        bus.post(EntityLifecycleEvent::destroyed(EntityId(7))).unwrap();
        assert!(bus.entity_channel(EntityId(7)).is_none());
        assert!(channel.is_closed());
    }

    #[test]
    fn test_traits_changed_for_unknown_entity_is_ignored() {
        let bus = EventBus::new();
        bus.post(EntityLifecycleEvent::traits_changed(EntityId(99))).unwrap();
        assert_eq!(bus.entity_count(), 0);
        assert!(bus.entity_channel(EntityId(99)).is_none());
    }

    #[test]
    fn test_entity_channel_sees_traits_and_destroy() {
        let bus = EventBus::new();
        bus.post(EntityLifecycleEvent::created(EntityId(3))).unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let channel = bus.entity_channel(EntityId(3)).unwrap();
        let _sub = channel.subscribe(EventKind::EntityLifecycle, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.post(EntityLifecycleEvent::traits_changed(EntityId(3))).unwrap();
        bus.post(EntityLifecycleEvent::destroyed(EntityId(3))).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_create_keeps_one_channel() {
        let bus = EventBus::new();
        bus.post(EntityLifecycleEvent::created(EntityId(1))).unwrap();
        let first = bus.entity_channel(EntityId(1)).unwrap();
        bus.post(EntityLifecycleEvent::created(EntityId(1))).unwrap();
        let second = bus.entity_channel(EntityId(1)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(bus.entity_count(), 1);
    }

    #[test]
    fn test_created_channel_visible_to_created_subscribers() {
        let bus = Arc::new(EventBus::new());
        let found = Arc::new(AtomicUsize::new(0));
        let inner = bus.clone();
        let counter = found.clone();
        let _sub = bus.subscribe(EventKind::EntityLifecycle, move |event| {
            if let Some(id) = event.entity_id() {
                if inner.entity_channel(id).is_some() {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
            Ok(())
        });

        bus.post(EntityLifecycleEvent::created(EntityId(5))).unwrap();
        assert_eq!(found.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_post_to_entity() {
        let bus = EventBus::new();
        assert_eq!(
            bus.post_to_entity(EntityId(4), tick()),
            Err(EventError::UnknownEntity(EntityId(4)))
        );
        bus.post(EntityLifecycleEvent::created(EntityId(4))).unwrap();
        assert_eq!(bus.post_to_entity(EntityId(4), tick()), Ok(0));
    }

    #[test]
    fn test_post_after_shutdown_fails() {
        let bus = EventBus::new();
        bus.post(EntityLifecycleEvent::created(EntityId(1))).unwrap();
        let channel = bus.entity_channel(EntityId(1)).unwrap();

        bus.shut_down();

        assert_eq!(bus.post(tick()), Err(EventError::BusShutDown));
        assert!(channel.is_closed());
        assert_eq!(bus.entity_count(), 0);
        bus.shut_down();
    }

    #[test]
    fn test_stats_track_posts_and_deliveries() {
        let bus = EventBus::new();
        let _a = bus.subscribe(EventKind::Tick, |_| Ok(()));
        let _b = bus.subscribe(EventFilter::All, |_| Ok(()));

        bus.post(tick()).unwrap();
        bus.post(EntityLifecycleEvent::created(EntityId(2))).unwrap();

        let stats = bus.stats();
        assert_eq!(stats.events_posted, 2);
        assert_eq!(stats.deliveries, 3);
        assert_eq!(stats.subscribers, 2);
        assert_eq!(stats.entity_channels, 1);
    }

    #[test]
    fn test_concurrent_posts_and_subscribes() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let _sub = bus.subscribe(EventKind::Tick, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        bus.post(tick()).unwrap();
                        let transient = bus.subscribe(EventKind::ClientData, |_| Ok(()));
                        transient.dispose();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(seen.load(Ordering::SeqCst), 1000);
        assert_eq!(bus.stats().subscribers, 1);
    }

    #[test]
    fn test_shutdown_racing_entity_creation_leaves_no_channels() {
        let bus = Arc::new(EventBus::new());
        let creators: Vec<_> = (0..4u32)
            .map(|worker| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let entity_id = EntityId(worker * 1000 + i);
                        if bus.post(EntityLifecycleEvent::created(entity_id)).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();

        std::thread::yield_now();
        bus.shut_down();
        for creator in creators {
            creator.join().unwrap();
        }

        assert_eq!(bus.entity_count(), 0);
        assert_eq!(
            bus.post(EntityLifecycleEvent::created(EntityId(99_999))),
            Err(EventError::BusShutDown)
        );
        assert_eq!(bus.entity_count(), 0);
    }
}
