//! # Processes
//!
//! A process is a named, long-lived subsystem with a four-step lifecycle and
//! exactly one sequential execution context. Lifecycle hooks, subscription
//! callbacks and any other work dispatched to the process all run on that
//! context, one at a time.
//!
//! | state | initialize | start | stop | destroy |
//! |---|---|---|---|---|
//! | Uninitialized | → Initialized | no-op | no-op | no-op |
//! | Initialized | no-op | → Started | no-op | no-op |
//! | Started | no-op | no-op | → Stopped | no-op |
//! | Stopped | no-op | no-op | no-op | → Destroyed |
//! | Destroyed | no-op | no-op | no-op | no-op |
//!
//! `destroy` always tears the execution context down afterwards, even when
//! the hook was skipped, failed or panicked. Every operation submitted after
//! that fails with [`ProcessError::AlreadyStopped`].
//!
//! While initialized or started, a process answers heartbeat requests from
//! the supervisor on its own context. A hung context therefore shows up as a
//! missed heartbeat.

mod completion;
mod context;

pub use completion::Completion;
pub use context::{PeriodicTask, ProcessContext};

use crate::error::{panic_message, HookResult, ProcessError};
use async_trait::async_trait;
use context::{job, Flow};
use futures::future::FutureExt;
use keel_event_system::{EventBus, ProcessId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// Lifecycle state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    Uninitialized,
    Initialized,
    Started,
    Stopped,
    Destroyed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Uninitialized => "uninitialized",
            ProcessState::Initialized => "initialized",
            ProcessState::Started => "started",
            ProcessState::Stopped => "stopped",
            ProcessState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Behaviour plugged into a [`Process`]. Every hook is optional.
///
/// Hooks run on the process's execution context and get exclusive access to
/// `self`. A hook error leaves the lifecycle state unchanged.
#[async_trait]
pub trait ProcessHooks: Send + Sized + 'static {
    async fn on_initialize(&mut self, _ctx: &ProcessContext<Self>) -> HookResult {
        Ok(())
    }

    async fn on_start(&mut self, _ctx: &ProcessContext<Self>) -> HookResult {
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &ProcessContext<Self>) -> HookResult {
        Ok(())
    }

    async fn on_destroy(&mut self, _ctx: &ProcessContext<Self>) -> HookResult {
        Ok(())
    }
}

/// Uniform lifecycle surface, so heterogeneous processes can be driven from
/// one list.
pub trait Lifecycle: Send + Sync {
    fn id(&self) -> &ProcessId;
    fn state(&self) -> ProcessState;
    /// True once the execution context has been torn down.
    fn is_torn_down(&self) -> bool;
    fn initialize(&self) -> Result<Completion, ProcessError>;
    fn start(&self) -> Result<Completion, ProcessError>;
    fn stop(&self) -> Result<Completion, ProcessError>;
    fn destroy(&self) -> Result<Completion, ProcessError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Initialize,
    Start,
    Stop,
    Destroy,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Operation::Initialize => "initialize",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Destroy => "destroy",
        }
    }

    /// The only state this operation acts in, and where it leads.
    fn edge(self) -> (ProcessState, ProcessState) {
        match self {
            Operation::Initialize => (ProcessState::Uninitialized, ProcessState::Initialized),
            Operation::Start => (ProcessState::Initialized, ProcessState::Started),
            Operation::Stop => (ProcessState::Started, ProcessState::Stopped),
            Operation::Destroy => (ProcessState::Stopped, ProcessState::Destroyed),
        }
    }
}

/// A process hosting hooks of type `H`.
pub struct Process<H: ProcessHooks> {
    context: ProcessContext<H>,
}

impl<H: ProcessHooks> fmt::Debug for Process<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process").field("context", &self.context).finish()
    }
}

impl<H: ProcessHooks> Process<H> {
    /// Creates the process and spawns its execution context on the current
    /// Tokio runtime.
    pub fn new(id: impl Into<ProcessId>, bus: Arc<EventBus>, hooks: H) -> Result<Self, ProcessError> {
        let context = ProcessContext::spawn(id.into(), bus, hooks)?;
        Ok(Self { context })
    }

    pub fn context(&self) -> &ProcessContext<H> {
        &self.context
    }

    /// Runs `f` on the process's context and returns its result.
    pub async fn execute<R, F>(&self, f: F) -> Result<R, ProcessError>
    where
        F: FnOnce(&mut H, &ProcessContext<H>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.context.dispatch_sync(move |hooks, ctx| {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| f(hooks, ctx)));
            let _ = tx.send(outcome.map_err(|payload| panic_message(&*payload)));
        })?;

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(ProcessError::Panicked {
                process: self.id().clone(),
                operation: "execute",
                message,
            }),
            Err(_) => Err(ProcessError::AlreadyStopped(self.id().clone())),
        }
    }

    fn submit(&self, operation: Operation) -> Result<Completion, ProcessError> {
        let (completion, tx) = Completion::new(self.id().clone(), operation.name());
        self.context.submit(job(move |hooks, ctx| {
            async move {
                let result = apply(operation, hooks, ctx).await;
                let flow = if operation == Operation::Destroy {
                    ctx.close();
                    Flow::Shutdown
                } else {
                    Flow::Continue
                };
                let _ = tx.send(result);
                flow
            }
            .boxed()
        }))?;
        Ok(completion)
    }
}

impl<H: ProcessHooks> Lifecycle for Process<H> {
    fn id(&self) -> &ProcessId {
        self.context.id()
    }

    fn state(&self) -> ProcessState {
        self.context.state()
    }

    fn is_torn_down(&self) -> bool {
        self.context.is_closed()
    }

    fn initialize(&self) -> Result<Completion, ProcessError> {
        self.submit(Operation::Initialize)
    }

    fn start(&self) -> Result<Completion, ProcessError> {
        self.submit(Operation::Start)
    }

    fn stop(&self) -> Result<Completion, ProcessError> {
        self.submit(Operation::Stop)
    }

    fn destroy(&self) -> Result<Completion, ProcessError> {
        self.submit(Operation::Destroy)
    }
}

impl<H: ProcessHooks> Drop for Process<H> {
    fn drop(&mut self) {
        if self.context.is_closed() {
            return;
        }
        // Owner went away without destroy: tear down without running hooks.
        let teardown = job::<H, _>(|_, ctx| {
            ctx.close();
            futures::future::ready(Flow::Shutdown).boxed()
        });
        if self.context.submit(teardown).is_ok() {
            debug!("Process {} dropped before destroy", self.context.id());
        }
    }
}

/// Runs one lifecycle operation. Called on the process's context.
async fn apply<H: ProcessHooks>(
    operation: Operation,
    hooks: &mut H,
    ctx: &ProcessContext<H>,
) -> Result<(), ProcessError> {
    let (from, to) = operation.edge();
    let current = ctx.state();
    if current != from {
        debug!("{} of {} skipped while {}", operation.name(), ctx.id(), current);
        return Ok(());
    }

    let hook = match operation {
        Operation::Initialize => hooks.on_initialize(ctx),
        Operation::Start => hooks.on_start(ctx),
        Operation::Stop => hooks.on_stop(ctx),
        Operation::Destroy => hooks.on_destroy(ctx),
    };

    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(Ok(())) => {
            ctx.set_state(to);
            match operation {
                Operation::Initialize => ctx.answer_heartbeats(),
                Operation::Stop => ctx.stop_answering_heartbeats(),
                _ => {}
            }
            info!("✅ Process {} {}", ctx.id(), to);
            Ok(())
        }
        Ok(Err(e)) => {
            error!("❌ {} hook of {} failed: {}", operation.name(), ctx.id(), e);
            Err(ProcessError::Hook {
                process: ctx.id().clone(),
                operation: operation.name(),
                message: e.to_string(),
            })
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            error!("❌ {} hook of {} panicked: {}", operation.name(), ctx.id(), message);
            Err(ProcessError::Panicked {
                process: ctx.id().clone(),
                operation: operation.name(),
                message,
            })
        }
    }
}
