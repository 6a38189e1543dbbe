use crate::error::ProcessError;
use keel_event_system::ProcessId;
use std::time::Duration;
use tokio::sync::oneshot;

/// Resolves when a queued operation has run on the process's context.
///
/// Dropping a `Completion` or giving up on it does not cancel the
/// operation.
#[derive(Debug)]
#[must_use = "a Completion does nothing unless waited on; the operation runs either way"]
pub struct Completion {
    process: ProcessId,
    operation: &'static str,
    /// Taken once the result has been observed
    result: Option<oneshot::Receiver<Result<(), ProcessError>>>,
}

impl Completion {
    pub(crate) fn new(
        process: ProcessId,
        operation: &'static str,
    ) -> (Self, oneshot::Sender<Result<(), ProcessError>>) {
        let (tx, rx) = oneshot::channel();
        (Self { process, operation, result: Some(rx) }, tx)
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Waits for the operation to finish.
    pub async fn wait(self) -> Result<(), ProcessError> {
        match self.result {
            Some(result) => result
                .await
                .unwrap_or(Err(ProcessError::AlreadyStopped(self.process))),
            None => Err(ProcessError::AlreadyStopped(self.process)),
        }
    }

    /// Waits at most `timeout`. On timeout the handle stays usable and the
    /// operation keeps running.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<(), ProcessError> {
        let Some(result) = self.result.as_mut() else {
            return Err(ProcessError::AlreadyStopped(self.process.clone()));
        };
        match tokio::time::timeout(timeout, result).await {
            Ok(outcome) => {
                self.result = None;
                outcome.unwrap_or_else(|_| Err(ProcessError::AlreadyStopped(self.process.clone())))
            }
            Err(_) => Err(ProcessError::WaitTimedOut {
                process: self.process.clone(),
                operation: self.operation,
                timeout,
            }),
        }
    }
}
