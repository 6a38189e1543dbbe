//! The sequential execution context owned by every process.
//!
//! Each process runs a single Tokio task that drains an unbounded job queue.
//! Jobs receive `&mut` access to the process hooks, so hook state never
//! needs a lock: if it is touched, it is touched from this task.

use super::ProcessState;
use crate::error::{panic_message, ProcessError};
use futures::future::{BoxFuture, FutureExt};
use keel_event_system::{
    Event, EventBus, EventError, EventKind, HeartbeatResponse, ProcessId, Subscription,
};
use parking_lot::{Mutex, RwLock};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error};

/// What the executor does after a job finishes.
pub(crate) enum Flow {
    Continue,
    Shutdown,
}

pub(crate) type Job<H> =
    Box<dyn for<'a> FnOnce(&'a mut H, &'a ProcessContext<H>) -> BoxFuture<'a, Flow> + Send>;

/// Pins down the higher-ranked signature so closures infer it.
pub(crate) fn job<H, F>(f: F) -> Job<H>
where
    F: for<'a> FnOnce(&'a mut H, &'a ProcessContext<H>) -> BoxFuture<'a, Flow> + Send + 'static,
{
    Box::new(f)
}

struct ContextInner<H> {
    id: ProcessId,
    bus: Arc<EventBus>,
    jobs: mpsc::UnboundedSender<Job<H>>,
    state: RwLock<ProcessState>,
    closed: AtomicBool,
    heartbeat: Mutex<Option<Subscription>>,
}

/// Handle to a process's execution context.
///
/// Cheap to clone. Subscription callbacks capture a clone and use
/// [`ProcessContext::dispatch`] to hop onto the context before touching
/// process state.
pub struct ProcessContext<H> {
    inner: Arc<ContextInner<H>>,
}

impl<H> Clone for ProcessContext<H> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<H> std::fmt::Debug for ProcessContext<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<H> ProcessContext<H> {
    pub fn id(&self) -> &ProcessId {
        &self.inner.id
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn state(&self) -> ProcessState {
        *self.inner.state.read()
    }

    /// True once the execution context has been torn down.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, state: ProcessState) {
        *self.inner.state.write() = state;
    }

    pub(crate) fn submit(&self, job: Job<H>) -> Result<(), ProcessError> {
        if self.is_closed() {
            return Err(ProcessError::AlreadyStopped(self.inner.id.clone()));
        }
        self.inner
            .jobs
            .send(job)
            .map_err(|_| ProcessError::AlreadyStopped(self.inner.id.clone()))
    }

    /// Stops accepting work and releases the heartbeat subscription.
    pub(crate) fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.stop_answering_heartbeats();
    }

    pub(crate) fn stop_answering_heartbeats(&self) {
        if let Some(subscription) = self.inner.heartbeat.lock().take() {
            subscription.dispose();
        }
    }
}

impl<H: Send + 'static> ProcessContext<H> {
    /// Creates the context and spawns its executor task.
    pub(crate) fn spawn(
        id: ProcessId,
        bus: Arc<EventBus>,
        hooks: H,
    ) -> Result<Self, ProcessError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ProcessError::NoRuntime(id.clone()))?;
        let (jobs, queue) = mpsc::unbounded_channel();
        let context = Self {
            inner: Arc::new(ContextInner {
                id,
                bus,
                jobs,
                state: RwLock::new(ProcessState::Uninitialized),
                closed: AtomicBool::new(false),
                heartbeat: Mutex::new(None),
            }),
        };
        runtime.spawn(run(hooks, context.clone(), queue));
        Ok(context)
    }

    /// Queues async work on this context.
    ///
    /// ```rust,ignore
    /// ctx.dispatch(|hooks, ctx| Box::pin(async move {
    ///     hooks.refresh(ctx).await;
    /// }))?;
    /// ```
    pub fn dispatch<F>(&self, f: F) -> Result<(), ProcessError>
    where
        F: for<'a> FnOnce(&'a mut H, &'a ProcessContext<H>) -> BoxFuture<'a, ()> + Send + 'static,
    {
        self.submit(job(move |hooks, ctx| {
            async move {
                f(hooks, ctx).await;
                Flow::Continue
            }
            .boxed()
        }))
    }

    /// Queues synchronous work on this context.
    pub fn dispatch_sync<F>(&self, f: F) -> Result<(), ProcessError>
    where
        F: FnOnce(&mut H, &ProcessContext<H>) + Send + 'static,
    {
        self.submit(job(move |hooks, ctx| {
            f(hooks, ctx);
            futures::future::ready(Flow::Continue).boxed()
        }))
    }

    /// Runs `f` on this context every `period`, first after one period.
    ///
    /// The timer stops when the returned task is dropped or the context is
    /// torn down.
    pub fn every<F>(&self, period: Duration, f: F) -> PeriodicTask
    where
        F: Fn(&mut H, &ProcessContext<H>) + Send + Sync + 'static,
    {
        let context = self.clone();
        let f = Arc::new(f);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let f = f.clone();
                if context.dispatch_sync(move |hooks, ctx| f(hooks, ctx)).is_err() {
                    break;
                }
            }
        });
        PeriodicTask { handle }
    }

    /// Subscribes to heartbeat requests, answering each from this context.
    pub(crate) fn answer_heartbeats(&self) {
        let context = self.clone();
        let subscription = self.inner.bus.subscribe(EventKind::HeartbeatRequest, move |event| {
            if let Event::HeartbeatRequest(request) = event {
                let cycle = request.cycle;
                context
                    .dispatch_sync(move |_, ctx| {
                        let response = HeartbeatResponse { process: ctx.id().clone(), cycle };
                        if let Err(e) = ctx.bus().post(response) {
                            debug!("{} could not answer heartbeat {}: {}", ctx.id(), cycle, e);
                        }
                    })
                    .map_err(|e| EventError::HandlerExecution(e.to_string()))?;
            }
            Ok(())
        });

        if let Some(previous) = self.inner.heartbeat.lock().replace(subscription) {
            previous.dispose();
        }
    }
}

/// Background timer created by [`ProcessContext::every`]. Aborted on drop.
#[derive(Debug)]
pub struct PeriodicTask {
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Stops the timer now instead of at drop.
    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Executor loop. Jobs run strictly one after another.
async fn run<H: Send + 'static>(
    mut hooks: H,
    context: ProcessContext<H>,
    mut queue: mpsc::UnboundedReceiver<Job<H>>,
) {
    while let Some(job) = queue.recv().await {
        let hooks_ref = &mut hooks;
        let context_ref = &context;
        let flow = match std::panic::catch_unwind(AssertUnwindSafe(move || job(hooks_ref, context_ref))) {
            Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
            Err(payload) => Err(payload),
        };

        match flow {
            Ok(Flow::Continue) => {}
            Ok(Flow::Shutdown) => break,
            Err(payload) => {
                error!("❌ Job on {} panicked: {}", context.id(), panic_message(&*payload));
            }
        }
    }

    context.close();
    queue.close();
    debug!("Execution context of {} torn down", context.id());
}
