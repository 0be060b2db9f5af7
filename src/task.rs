//! Background task slots
//!
//! A [`TaskSlot`] holds at most one spawned task together with the token
//! that cancels it. The share middleware keeps one slot for the in-flight
//! upload and one for the login-wait loop.

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Result of polling a task
pub enum PollResult<T> {
    /// No task to poll (slot is empty)
    NoTask,
    /// Task is still running
    Pending,
    /// Task completed with result (may be Ok or join error)
    Complete(Result<T, tokio::task::JoinError>),
}

/// Poll an optional task handle and return its result if finished.
///
/// A finished handle is taken out of `task`, so the slot is free again.
pub fn poll_task<T>(task: &mut Option<JoinHandle<T>>) -> PollResult<T> {
    let Some(handle) = task else {
        return PollResult::NoTask;
    };

    if !handle.is_finished() {
        return PollResult::Pending;
    }

    let Some(handle) = task.take() else {
        return PollResult::NoTask;
    };
    match handle.now_or_never() {
        Some(result) => PollResult::Complete(result),
        None => {
            tracing::warn!("Task not ready despite is_finished()");
            PollResult::Pending
        }
    }
}

/// At most one cancellable background task
pub struct TaskSlot {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl TaskSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Whether a task is still running. Reaps a finished one.
    pub fn is_running(&mut self) -> bool {
        match poll_task(&mut self.handle) {
            PollResult::Pending => true,
            PollResult::NoTask | PollResult::Complete(Ok(())) => false,
            PollResult::Complete(Err(e)) => {
                tracing::error!("{} task failed: {}", self.name, e);
                false
            }
        }
    }

    /// Spawn `make(token)` into the slot, cancelling any previous task.
    ///
    /// The token passed to `make` is a child of `parent`, so cancelling the
    /// parent also stops this task.
    pub fn start<F>(&mut self, parent: &CancellationToken, make: impl FnOnce(CancellationToken) -> F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.cancel = parent.child_token();
        self.handle = Some(tokio::spawn(make(self.cancel.clone())));
    }

    /// Cancel the running task, if any. Returns whether one was running.
    pub fn cancel(&mut self) -> bool {
        let running = self.is_running();
        self.cancel.cancel();
        if running {
            tracing::debug!("Cancelled {} task", self.name);
        }
        running
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
