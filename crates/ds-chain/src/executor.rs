//! Worker pool and the owned handle for one scheduled backend call.

use ds_core::config::WaitBudget;
use ds_core::error::{DsError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Shared pool every backend call is dispatched on.
///
/// Cheap to clone; clones share the runtime, the in-flight limit and the
/// submission counter.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    handle: Handle,
    permits: Option<Arc<Semaphore>>,
    submitted: Arc<AtomicU64>,
}

impl TaskExecutor {
    /// Executor on the runtime the caller is running in.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::from_handle)
            .map_err(|e| DsError::InvalidConfig(format!("no tokio runtime available: {e}")))
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self { handle, permits: None, submitted: Arc::new(AtomicU64::new(0)) }
    }

    /// Let at most `max` backend calls run at once; the rest queue inside the pool.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.permits = Some(Arc::new(Semaphore::new(max.max(1))));
        self
    }

    /// Total number of calls submitted through this executor and its clones.
    pub fn submitted_calls(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Schedule `work` and return its handle. Never blocks the caller, even
    /// when the in-flight limit is reached.
    pub fn submit<T, F>(&self, label: impl Into<String>, work: F) -> BackendCall<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let label = label.into();
        let started = Arc::new(AtomicBool::new(false));
        let permits = self.permits.clone();
        let task_started = started.clone();
        self.submitted.fetch_add(1, Ordering::Relaxed);

        let handle = self.handle.spawn(async move {
            let _permit = match permits {
                Some(permits) => Some(
                    permits
                        .acquire_owned()
                        .await
                        .map_err(|e| DsError::Storage(format!("executor closed: {e}")))?,
                ),
                None => None,
            };
            task_started.store(true, Ordering::Release);
            work.await
        });

        BackendCall { label, handle: Some(handle), started, state: CallState::Submitted }
    }

    /// Run bookkeeping work that is not a backend call (it takes no in-flight permit).
    pub(crate) fn spawn_detached<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(work);
    }
}

/// Where a backend call stands, as seen by whoever holds its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Submitted,
    Running,
    Succeeded,
    Failed,
    /// Overran a wait; the call may still be waited on again.
    TimedOut,
    Cancelled,
}

/// Result of waiting on a call once.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Succeeded(T),
    Failed(DsError),
    TimedOut,
    Cancelled,
    /// The waiter's own cancellation token fired; the call was left untouched.
    Interrupted,
}

impl<T> CallOutcome<T> {
    /// Collapse into a `Result`, attributing timeouts and cancellation to `backend`.
    pub fn into_result(self, backend: &str, budget: WaitBudget) -> Result<T> {
        match self {
            CallOutcome::Succeeded(value) => Ok(value),
            CallOutcome::Failed(e) => Err(e),
            CallOutcome::TimedOut => Err(DsError::BackendTimeout {
                backend: backend.to_string(),
                budget: budget.as_duration().unwrap_or_default(),
            }),
            CallOutcome::Cancelled => Err(DsError::BackendCancelled { backend: backend.to_string() }),
            CallOutcome::Interrupted => Err(DsError::CallerCancelled),
        }
    }
}

/// Owned handle for one scheduled backend call.
///
/// Cancelling is cooperative: the backend future is dropped at its next
/// suspension point, and side effects it already performed stay. Dropping an
/// unsettled handle cancels the call.
pub struct BackendCall<T> {
    label: String,
    handle: Option<JoinHandle<Result<T>>>,
    started: Arc<AtomicBool>,
    state: CallState,
}

impl<T> BackendCall<T> {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> CallState {
        match self.state {
            CallState::Submitted if self.started.load(Ordering::Acquire) => CallState::Running,
            state => state,
        }
    }

    /// Whether the call no longer needs waiting on (its task ended or the handle already settled).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait up to `budget` for the call to settle.
    ///
    /// A call whose result was already handed out (or that was cancelled)
    /// reports `Cancelled`.
    pub async fn wait(&mut self, budget: WaitBudget) -> CallOutcome<T> {
        let Some(handle) = self.handle.as_mut() else {
            return CallOutcome::Cancelled;
        };
        let joined = match budget.as_duration() {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    self.state = CallState::TimedOut;
                    return CallOutcome::TimedOut;
                }
            },
            None => handle.await,
        };
        self.handle = None;
        self.settle(joined)
    }

    /// Like [`wait`](Self::wait), but gives up as soon as `interrupt` fires.
    pub async fn wait_or_interrupt(
        &mut self,
        budget: WaitBudget,
        interrupt: &CancellationToken,
    ) -> CallOutcome<T> {
        tokio::select! {
            biased;
            _ = interrupt.cancelled() => CallOutcome::Interrupted,
            outcome = self.wait(budget) => outcome,
        }
    }

    /// Best-effort cancellation. A call that already settled keeps its state.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            self.state = CallState::Cancelled;
        }
    }

    /// One more bounded wait for a call that overran. Cancelled if it overruns
    /// again or `interrupt` fires first.
    pub async fn grace(mut self, budget: WaitBudget, interrupt: &CancellationToken) -> CallOutcome<T> {
        let outcome = self.wait_or_interrupt(budget, interrupt).await;
        if matches!(outcome, CallOutcome::TimedOut | CallOutcome::Interrupted) {
            self.cancel();
        }
        outcome
    }

    fn settle(&mut self, joined: std::result::Result<Result<T>, JoinError>) -> CallOutcome<T> {
        match joined {
            Ok(Ok(value)) => {
                self.state = CallState::Succeeded;
                CallOutcome::Succeeded(value)
            }
            Ok(Err(e)) => {
                self.state = CallState::Failed;
                CallOutcome::Failed(e)
            }
            Err(e) if e.is_cancelled() => {
                self.state = CallState::Cancelled;
                CallOutcome::Cancelled
            }
            Err(e) => {
                self.state = CallState::Failed;
                CallOutcome::Failed(DsError::backend_failure(&self.label, format!("task panicked: {e}")))
            }
        }
    }
}

impl<T> Drop for BackendCall<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl<T> std::fmt::Debug for BackendCall<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendCall")
            .field("label", &self.label)
            .field("state", &self.state())
            .finish()
    }
}
