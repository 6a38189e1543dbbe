//! # Supervisor
//!
//! Watchdog process that detects hung subsystems. Every period it:
//!
//! 1. reports each watched process that has not answered the previous
//!    request with a [`ProcessTimedOut`] event,
//! 2. marks every watched process inactive again,
//! 3. posts a new [`HeartbeatRequest`].
//!
//! Responses clear their sender from the inactive set. A response to an
//! older cycle does not count for the current one. Nothing is restarted;
//! reacting to a timeout is left to whoever subscribes.

use crate::error::{HookResult, ProcessError};
use crate::process::{PeriodicTask, Process, ProcessContext, ProcessHooks, ProcessState};
use async_trait::async_trait;
use keel_event_system::{
    current_timestamp, Event, EventBus, EventError, EventKind, HeartbeatRequest, HeartbeatResponse,
    ProcessId, ProcessTimedOut, Subscription,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default time between heartbeat requests.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct MonitorState {
    /// Cycle of the outstanding request; 0 before the first tick
    cycle: u64,
    inactive: BTreeSet<ProcessId>,
}

/// Heartbeat bookkeeping shared by the supervisor's timer and its response
/// handler.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    watched: BTreeSet<ProcessId>,
    state: Mutex<MonitorState>,
}

impl HeartbeatMonitor {
    pub fn new(watched: impl IntoIterator<Item = ProcessId>) -> Self {
        Self {
            watched: watched.into_iter().collect(),
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn watched(&self) -> &BTreeSet<ProcessId> {
        &self.watched
    }

    /// Processes that have not answered the outstanding request.
    pub fn inactive(&self) -> BTreeSet<ProcessId> {
        self.state.lock().inactive.clone()
    }

    pub fn cycle(&self) -> u64 {
        self.state.lock().cycle
    }

    /// Forgets any outstanding request.
    pub fn reset(&self) {
        self.state.lock().inactive.clear();
    }

    /// Clears `response.process` if it answers the outstanding request.
    pub fn record_response(&self, response: &HeartbeatResponse) -> bool {
        let mut state = self.state.lock();
        if response.cycle != state.cycle {
            debug!(
                "Ignoring stale heartbeat from {} (cycle {}, current {})",
                response.process, response.cycle, state.cycle
            );
            return false;
        }
        state.inactive.remove(&response.process)
    }

    /// Runs one supervision cycle and returns the processes that timed out.
    pub fn tick(&self, bus: &EventBus) -> Result<Vec<ProcessId>, EventError> {
        let (timed_out, expired_cycle, cycle) = {
            let mut state = self.state.lock();
            let timed_out = std::mem::replace(&mut state.inactive, self.watched.clone());
            let expired_cycle = state.cycle;
            state.cycle += 1;
            (timed_out, expired_cycle, state.cycle)
        };

        let timestamp = current_timestamp();
        for process in &timed_out {
            warn!("⚠️ Process {} missed heartbeat cycle {}", process, expired_cycle);
            bus.post(ProcessTimedOut {
                process: process.clone(),
                cycle: expired_cycle,
                timestamp,
            })?;
        }
        bus.post(HeartbeatRequest { cycle, timestamp })?;

        Ok(timed_out.into_iter().collect())
    }
}

/// Hooks of the supervisor process.
#[derive(Debug)]
pub struct SupervisorHooks {
    monitor: Arc<HeartbeatMonitor>,
    period: Duration,
    responses: Option<Subscription>,
    timer: Option<PeriodicTask>,
}

impl SupervisorHooks {
    pub fn new(watched: impl IntoIterator<Item = ProcessId>, period: Duration) -> Self {
        Self {
            monitor: Arc::new(HeartbeatMonitor::new(watched)),
            period,
            responses: None,
            timer: None,
        }
    }

    pub fn monitor(&self) -> &Arc<HeartbeatMonitor> {
        &self.monitor
    }
}

#[async_trait]
impl ProcessHooks for SupervisorHooks {
    async fn on_start(&mut self, ctx: &ProcessContext<Self>) -> HookResult {
        if self.period.is_zero() {
            return Err(format!("supervisor {} needs a non-zero heartbeat period", ctx.id()).into());
        }
        self.monitor.reset();

        let monitor = self.monitor.clone();
        self.responses = Some(ctx.bus().subscribe(EventKind::HeartbeatResponse, move |event| {
            if let Event::HeartbeatResponse(response) = event {
                monitor.record_response(response);
            }
            Ok(())
        }));

        self.timer = Some(ctx.every(self.period, |hooks, ctx| {
            // A tick queued just before the timer was cancelled.
            if ctx.state() != ProcessState::Started {
                return;
            }
            if let Err(e) = hooks.monitor.tick(ctx.bus()) {
                debug!("Supervisor {} skipped a cycle: {}", ctx.id(), e);
            }
        }));

        info!(
            "🩺 Supervisor {} watching {} process(es) every {:?}",
            ctx.id(),
            self.monitor.watched().len(),
            self.period
        );
        Ok(())
    }

    async fn on_stop(&mut self, ctx: &ProcessContext<Self>) -> HookResult {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        if let Some(responses) = self.responses.take() {
            responses.dispose();
        }
        info!("🛑 Supervisor {} stopped", ctx.id());
        Ok(())
    }
}

/// A supervisor process.
pub type Supervisor = Process<SupervisorHooks>;

/// Creates a supervisor watching `watched`, ticking every `period`.
pub fn create_supervisor(
    id: impl Into<ProcessId>,
    bus: Arc<EventBus>,
    watched: impl IntoIterator<Item = ProcessId>,
    period: Duration,
) -> Result<Supervisor, ProcessError> {
    Process::new(id, bus, SupervisorHooks::new(watched, period))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Lifecycle;
    use keel_event_system::create_event_bus;

    struct Idle;

    #[async_trait]
    impl ProcessHooks for Idle {}

    fn ids(names: &[&str]) -> Vec<ProcessId> {
        names.iter().map(|n| ProcessId::new(*n)).collect()
    }

    fn record_timeouts(bus: &EventBus) -> (Arc<Mutex<Vec<ProcessId>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = bus.subscribe(EventKind::ProcessTimedOut, move |event| {
            if let Event::ProcessTimedOut(t) = event {
                sink.lock().push(t.process.clone());
            }
            Ok(())
        });
        (seen, sub)
    }

    fn respond(monitor: &HeartbeatMonitor, name: &str) -> bool {
        monitor.record_response(&HeartbeatResponse {
            process: ProcessId::new(name),
            cycle: monitor.cycle(),
        })
    }

    #[test]
    fn test_first_tick_reports_nothing() {
        let bus = create_event_bus();
        let (timeouts, _sub) = record_timeouts(&bus);
        let monitor = HeartbeatMonitor::new(ids(&["a", "b"]));

        assert!(monitor.tick(&bus).unwrap().is_empty());
        assert!(timeouts.lock().is_empty());
        assert_eq!(monitor.inactive().len(), 2);
        assert_eq!(monitor.cycle(), 1);
    }

    #[test]
    fn test_only_silent_process_times_out() {
        let bus = create_event_bus();
        let (timeouts, _sub) = record_timeouts(&bus);
        let monitor = HeartbeatMonitor::new(ids(&["a", "b"]));

        monitor.tick(&bus).unwrap();
        assert!(respond(&monitor, "a"));
        assert_eq!(monitor.tick(&bus).unwrap(), ids(&["b"]));
        assert_eq!(*timeouts.lock(), ids(&["b"]));

        // b recovers
        respond(&monitor, "a");
        respond(&monitor, "b");
        assert!(monitor.tick(&bus).unwrap().is_empty());
        assert_eq!(timeouts.lock().len(), 1);
    }

    #[test]
    fn test_stale_and_unknown_responses_are_ignored() {
        let bus = create_event_bus();
        let monitor = HeartbeatMonitor::new(ids(&["a"]));
        monitor.tick(&bus).unwrap();
        monitor.tick(&bus).unwrap();

        let stale = HeartbeatResponse { process: ProcessId::new("a"), cycle: 1 };
        assert!(!monitor.record_response(&stale));
        assert!(!respond(&monitor, "stranger"));
        assert_eq!(monitor.inactive(), ids(&["a"]).into_iter().collect());
    }

    #[test]
    fn test_tick_posts_request_with_cycle() {
        let bus = create_event_bus();
        let cycles = Arc::new(Mutex::new(Vec::new()));
        let sink = cycles.clone();
        let _sub = bus.subscribe(EventKind::HeartbeatRequest, move |event| {
            if let Event::HeartbeatRequest(r) = event {
                sink.lock().push(r.cycle);
            }
            Ok(())
        });

        let monitor = HeartbeatMonitor::new(ids(&["a"]));
        monitor.tick(&bus).unwrap();
        monitor.tick(&bus).unwrap();
        assert_eq!(*cycles.lock(), vec![1, 2]);
    }

    #[test]
    fn test_tick_after_bus_shutdown_fails() {
        let bus = create_event_bus();
        bus.shut_down();
        let monitor = HeartbeatMonitor::new(ids(&["a"]));
        assert_eq!(monitor.tick(&bus), Err(EventError::BusShutDown));
    }

    #[tokio::test]
    async fn test_zero_period_fails_start() {
        let bus = create_event_bus();
        let supervisor = create_supervisor("supervisor", bus, ids(&["a"]), Duration::ZERO).unwrap();
        supervisor.initialize().unwrap().wait().await.unwrap();

        let err = supervisor.start().unwrap().wait().await.unwrap_err();
        assert!(matches!(err, ProcessError::Hook { operation: "start", .. }));
        assert_eq!(supervisor.state(), ProcessState::Initialized);
        assert_eq!(supervisor.execute(|hooks, _| hooks.monitor().cycle()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_no_requests_after_stop() {
        let bus = create_event_bus();
        let supervisor =
            create_supervisor("supervisor", bus.clone(), ids(&["a"]), Duration::from_millis(10)).unwrap();

        let ctx = supervisor.context().clone();
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        let _sub = bus.subscribe(EventKind::HeartbeatRequest, move |_| {
            sink.lock().push(ctx.state());
            Ok(())
        });

        supervisor.initialize().unwrap().wait().await.unwrap();
        supervisor.start().unwrap().wait().await.unwrap();

        // Keep the context busy so ticks pile up on both sides of the stop.
        supervisor
            .context()
            .dispatch(|_, _| Box::pin(tokio::time::sleep(Duration::from_millis(100))))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        supervisor.stop().unwrap().wait().await.unwrap();
        supervisor.execute(|_, _| ()).await.unwrap();

        let states = states.lock();
        assert!(!states.is_empty());
        assert!(states.iter().all(|s| *s == ProcessState::Started), "{:?}", states);
    }

    #[tokio::test]
    async fn test_detects_hung_process_and_recovery() {
        let bus = create_event_bus();
        let (timeouts, _sub) = record_timeouts(&bus);

        let a = Process::new("a", bus.clone(), Idle).unwrap();
        let b = Process::new("b", bus.clone(), Idle).unwrap();
        a.initialize().unwrap().wait().await.unwrap();
        b.initialize().unwrap().wait().await.unwrap();

        // Park b's context so it cannot answer.
        b.context()
            .dispatch(|_, _| Box::pin(tokio::time::sleep(Duration::from_millis(300))))
            .unwrap();

        let supervisor =
            create_supervisor("supervisor", bus.clone(), ids(&["a", "b"]), Duration::from_millis(40))
                .unwrap();
        supervisor.initialize().unwrap().wait().await.unwrap();
        supervisor.start().unwrap().wait().await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        {
            let seen = timeouts.lock();
            assert!(seen.contains(&ProcessId::new("b")));
            assert!(!seen.contains(&ProcessId::new("a")));
        }

        // b drains its backlog after the sleep and answers again.
        tokio::time::sleep(Duration::from_millis(400)).await;
        timeouts.lock().clear();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(timeouts.lock().is_empty());

        supervisor.stop().unwrap().wait().await.unwrap();
        let cycle = supervisor.execute(|hooks, _| hooks.monitor().cycle()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        let after = supervisor.execute(|hooks, _| hooks.monitor().cycle()).await.unwrap();
        assert_eq!(cycle, after);
    }
}
