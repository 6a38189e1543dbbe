//! Tick source process.
//!
//! While started, posts a [`TickEvent`] every interval. Processes that need
//! periodic work subscribe to [`EventKind::Tick`](keel_event_system::EventKind)
//! and re-dispatch onto their own context.

use crate::error::{HookResult, ProcessError};
use crate::process::{PeriodicTask, Process, ProcessContext, ProcessHooks};
use async_trait::async_trait;
use keel_event_system::{current_timestamp, EventBus, ProcessId, TickEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug)]
pub struct TickHooks {
    interval: Duration,
    sequence: u64,
    timer: Option<PeriodicTask>,
}

impl TickHooks {
    /// An interval of zero disables ticking.
    pub fn new(interval: Duration) -> Self {
        Self { interval, sequence: 0, timer: None }
    }

    /// Number of ticks posted so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn emit(&mut self, ctx: &ProcessContext<Self>) {
        self.sequence += 1;
        let tick = TickEvent { sequence: self.sequence, timestamp: current_timestamp() };
        if let Err(e) = ctx.bus().post(tick) {
            error!("Failed to post tick {}: {}", self.sequence, e);
        }
    }
}

#[async_trait]
impl ProcessHooks for TickHooks {
    async fn on_start(&mut self, ctx: &ProcessContext<Self>) -> HookResult {
        if self.interval.is_zero() {
            info!("⏸️ Server tick disabled (interval: 0ms)");
            return Ok(());
        }
        self.timer = Some(ctx.every(self.interval, |hooks, ctx| hooks.emit(ctx)));
        info!("🕒 Server tick started with interval: {:?}", self.interval);
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &ProcessContext<Self>) -> HookResult {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
            info!("🕒 Server tick stopped after {} tick(s)", self.sequence);
        }
        Ok(())
    }
}

pub type TickSource = Process<TickHooks>;

pub fn create_tick_source(
    id: impl Into<ProcessId>,
    bus: Arc<EventBus>,
    interval: Duration,
) -> Result<TickSource, ProcessError> {
    Process::new(id, bus, TickHooks::new(interval))
}
