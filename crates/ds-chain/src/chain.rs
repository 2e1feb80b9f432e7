//! A persister that runs every operation against an ordered chain of backends.
//!
//! Writes and invalidations are broadcast to all backends at once and waited
//! on collectively. Reads race the backends in priority order with a small
//! look-ahead window, so a slow backend does not hold up the next one. A
//! misbehaving backend is logged and skipped; it never fails the caller.

use crate::executor::{BackendCall, CallOutcome, TaskExecutor};
use crate::lookahead::LookAhead;
use async_trait::async_trait;
use ds_core::config::WaitBudget;
use ds_core::error::{DsError, Result};
use ds_core::record::SessionRecord;
use ds_persist::traits::{Persister, SessionIds, SharedPersister};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration every operation works against. Replaced wholesale, never mutated.
#[derive(Clone)]
struct ChainSnapshot {
    persisters: Vec<SharedPersister>,
    budget: WaitBudget,
    executor: TaskExecutor,
    retry_timed_out_writes: bool,
}

pub struct ChainPersister {
    name: String,
    snapshot: RwLock<Arc<ChainSnapshot>>,
}

impl std::fmt::Debug for ChainPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainPersister").field("name", &self.name).finish_non_exhaustive()
    }
}

impl ChainPersister {
    pub fn new(executor: TaskExecutor) -> Self {
        Self::with_persisters(executor, Vec::new())
    }

    pub fn with_persisters(executor: TaskExecutor, persisters: Vec<SharedPersister>) -> Self {
        let snapshot = ChainSnapshot {
            persisters,
            budget: WaitBudget::default(),
            executor,
            retry_timed_out_writes: true,
        };
        Self { name: "chain".into(), snapshot: RwLock::new(Arc::new(snapshot)) }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn snapshot(&self) -> Arc<ChainSnapshot> {
        self.snapshot.read().clone()
    }

    /// Build the next snapshot from the current one and swap it in. Operations
    /// already running keep the snapshot they started with.
    fn reconfigure<R>(&self, change: impl FnOnce(&mut ChainSnapshot) -> R) -> R {
        let mut current = self.snapshot.write();
        let mut next = ChainSnapshot::clone(&current);
        let out = change(&mut next);
        *current = Arc::new(next);
        out
    }

    pub fn persisters(&self) -> Vec<SharedPersister> {
        self.snapshot().persisters.clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().persisters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_persisters(&self, persisters: Vec<SharedPersister>) {
        self.reconfigure(|s| s.persisters = persisters);
    }

    /// Append a backend with the lowest priority.
    pub fn add_persister(&self, persister: SharedPersister) {
        self.reconfigure(|s| s.persisters.push(persister));
    }

    pub fn insert_persister(&self, index: usize, persister: SharedPersister) -> Result<()> {
        self.reconfigure(|s| {
            if index > s.persisters.len() {
                return Err(DsError::InvalidConfig(format!(
                    "cannot insert persister at {index}, chain has {}",
                    s.persisters.len()
                )));
            }
            s.persisters.insert(index, persister);
            Ok(())
        })
    }

    pub fn wait_budget(&self) -> WaitBudget {
        self.snapshot().budget
    }

    pub fn set_wait_budget(&self, budget: impl Into<WaitBudget>) {
        let budget = budget.into();
        self.reconfigure(|s| s.budget = budget);
    }

    pub fn executor(&self) -> TaskExecutor {
        self.snapshot().executor.clone()
    }

    pub fn set_executor(&self, executor: TaskExecutor) {
        self.reconfigure(|s| s.executor = executor);
    }

    pub fn retry_timed_out_writes(&self) -> bool {
        self.snapshot().retry_timed_out_writes
    }

    pub fn set_retry_timed_out_writes(&self, retry: bool) {
        self.reconfigure(|s| s.retry_timed_out_writes = retry);
    }

    /// Write `record` to every backend. Returns once all backends answered or
    /// the budget ran out; only `CallerCancelled` is ever returned.
    pub async fn persist_cancellable(&self, record: &SessionRecord, cancel: &CancellationToken) -> Result<()> {
        let snap = self.snapshot();
        debug!(chain = %self.name, session_id = %record.session_id(), backends = snap.persisters.len(), "persisting session to chain");
        let record = Arc::new(record.clone());
        let what = format!("persisting session {}", record.session_id());
        self.broadcast(&snap, &what, cancel, |p| {
            let record = record.clone();
            async move { p.persist(&record).await }
        })
        .await
    }

    pub async fn invalidate_cancellable(&self, session_id: &str, cancel: &CancellationToken) -> Result<()> {
        let snap = self.snapshot();
        debug!(chain = %self.name, session_id, "invalidating session across chain");
        let id: Arc<str> = Arc::from(session_id);
        let what = format!("invalidating session {session_id}");
        self.broadcast(&snap, &what, cancel, |p| {
            let id = id.clone();
            async move { p.invalidate(&id).await }
        })
        .await
    }

    /// First record any backend produces, preferring backends in chain order.
    ///
    /// At most [`LOOKAHEAD_DEPTH`](crate::LOOKAHEAD_DEPTH) backend calls are in
    /// flight at once. Each call gets its own full budget once it becomes the
    /// oldest pending call.
    pub async fn fetch_cancellable(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<SessionRecord>> {
        let snap = self.snapshot();
        let mut backends = snap.persisters.iter();
        let submit = |p: &SharedPersister| -> BackendCall<Option<SessionRecord>> {
            let p = p.clone();
            let id = session_id.to_string();
            snap.executor.submit(
                format!("fetching session {id} from {}", p.name()),
                async move { p.fetch(&id).await },
            )
        };

        let mut window = LookAhead::new();
        for p in backends.by_ref().take(2) {
            window.push(submit(p));
        }

        let mut found = None;
        loop {
            if let Some(p) = backends.next() {
                window.push(submit(p));
            }
            let Some(current) = window.oldest_mut() else {
                break;
            };
            let outcome = current.wait_or_interrupt(snap.budget, cancel).await;
            match outcome {
                CallOutcome::Succeeded(Some(record)) => {
                    debug!(call = %current.label(), "found session");
                    found = Some(record);
                }
                CallOutcome::Succeeded(None) => {
                    debug!(call = %current.label(), "session not in backend");
                }
                CallOutcome::Failed(e) => {
                    warn!(call = %current.label(), error = %e, "backend failed while fetching session");
                }
                CallOutcome::TimedOut => {
                    warn!(call = %current.label(), budget = %snap.budget, "timed out fetching session");
                    current.cancel();
                }
                CallOutcome::Cancelled => {
                    info!(call = %current.label(), "fetch was cancelled");
                }
                CallOutcome::Interrupted => {
                    warn!(chain = %self.name, session_id, "interrupted while fetching session, cancelling pending calls");
                    window.cancel_all();
                    return Err(DsError::CallerCancelled);
                }
            }
            drop(window.pop_oldest());
            if found.is_some() {
                break;
            }
        }

        // Look-aheads still pending behind the answer are no longer needed.
        window.cancel_all();

        match &found {
            Some(record) => debug!(chain = %self.name, session_id, "found {record} in chain"),
            None => debug!(chain = %self.name, session_id, "no session found in chain"),
        }
        Ok(found)
    }

    /// Dispatch one call per backend and wait for all of them together.
    async fn broadcast<F, Fut>(
        &self,
        snap: &ChainSnapshot,
        what: &str,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<()>
    where
        F: Fn(SharedPersister) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let calls: Vec<BackendCall<()>> = snap
            .persisters
            .iter()
            .map(|p| snap.executor.submit(format!("{what} on {}", p.name()), call(p.clone())))
            .collect();

        let deadline = deadline_for(snap.budget);
        let mut pending = calls.into_iter();
        while let Some(mut current) = pending.next() {
            // Every call shares the one deadline; late ones still get polled once.
            match current.wait_or_interrupt(remaining_until(deadline), cancel).await {
                CallOutcome::Succeeded(()) => {
                    debug!(call = %current.label(), "completed");
                }
                CallOutcome::Failed(e) => {
                    error!(call = %current.label(), error = %e, "backend failed");
                }
                CallOutcome::Cancelled => {
                    debug!(call = %current.label(), "found cancelled call, ignoring");
                }
                CallOutcome::TimedOut => {
                    info!(call = %current.label(), budget = %snap.budget, "timed out");
                    self.settle_late(snap, current, cancel);
                }
                CallOutcome::Interrupted => {
                    warn!(chain = %self.name, "interrupted during {what}, cancelling outstanding calls");
                    current.cancel();
                    for mut rest in pending {
                        rest.cancel();
                    }
                    return Err(DsError::CallerCancelled);
                }
            }
        }
        Ok(())
    }

    /// A broadcast call overran the budget: give it one more bounded wait in
    /// the background, or abandon it right away when retries are off. The
    /// watcher follows the caller's token, so cancelling later still reaches
    /// the call.
    fn settle_late(&self, snap: &ChainSnapshot, mut call: BackendCall<()>, cancel: &CancellationToken) {
        if !snap.retry_timed_out_writes {
            warn!(call = %call.label(), "abandoning call");
            call.cancel();
            return;
        }
        let grace = snap.budget.grace();
        let interrupt = cancel.child_token();
        snap.executor.spawn_detached(async move {
            let label = call.label().to_string();
            match call.grace(grace, &interrupt).await.into_result(&label, grace) {
                Ok(()) => debug!(call = %label, "completed on second wait"),
                Err(e @ DsError::BackendTimeout { .. }) => warn!(call = %label, error = %e, "cancelling"),
                Err(e @ (DsError::BackendCancelled { .. } | DsError::CallerCancelled)) => {
                    debug!(call = %label, error = %e, "gave up on second wait")
                }
                Err(e) => error!(call = %label, error = %e, "backend failed on second wait"),
            }
        });
    }
}

/// Absolute deadline for a collective wait. A budget too large to represent
/// as an instant is treated as no deadline at all.
fn deadline_for(budget: WaitBudget) -> Option<Instant> {
    budget.as_duration().and_then(|d| Instant::now().checked_add(d))
}

fn remaining_until(deadline: Option<Instant>) -> WaitBudget {
    match deadline {
        Some(deadline) => WaitBudget::Bounded(deadline.saturating_duration_since(Instant::now())),
        None => WaitBudget::Unbounded,
    }
}

#[async_trait]
impl Persister for ChainPersister {
    fn name(&self) -> &str {
        &self.name
    }

    async fn persist(&self, record: &SessionRecord) -> Result<()> {
        self.persist_cancellable(record, &CancellationToken::new()).await
    }

    async fn fetch(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.fetch_cancellable(session_id, &CancellationToken::new()).await
    }

    async fn invalidate(&self, session_id: &str) -> Result<()> {
        self.invalidate_cancellable(session_id, &CancellationToken::new()).await
    }

    /// Asks each backend in turn, on the caller's task, stopping at the first `true`.
    /// A failing backend counts as not knowing the session.
    async fn is_valid(&self, session_id: &str) -> Result<bool> {
        let snap = self.snapshot();
        for p in &snap.persisters {
            match p.is_valid(session_id).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    warn!(backend = %p.name(), session_id, error = %e, "validity check failed");
                }
            }
        }
        Ok(false)
    }

    /// Ids known to any backend, in chain order, each reported once.
    ///
    /// Listings run on the executor under one shared deadline; a backend that
    /// fails or overruns it is left out.
    async fn list_ids(&self) -> Result<SessionIds> {
        let snap = self.snapshot();
        let calls: Vec<BackendCall<SessionIds>> = snap
            .persisters
            .iter()
            .map(|p| {
                let p = p.clone();
                snap.executor.submit(format!("listing session ids on {}", p.name()), async move {
                    p.list_ids().await
                })
            })
            .collect();

        let deadline = deadline_for(snap.budget);
        let mut sources = Vec::with_capacity(calls.len());
        for mut call in calls {
            match call.wait(remaining_until(deadline)).await {
                CallOutcome::Succeeded(ids) => sources.push(ids),
                CallOutcome::TimedOut => {
                    warn!(call = %call.label(), budget = %snap.budget, "timed out listing session ids");
                    call.cancel();
                }
                CallOutcome::Failed(e) => warn!(call = %call.label(), error = %e, "could not list session ids"),
                CallOutcome::Cancelled | CallOutcome::Interrupted => {
                    debug!(call = %call.label(), "listing was cancelled");
                }
            }
        }
        let mut seen = HashSet::new();
        Ok(Box::new(sources.into_iter().flatten().filter(move |id| seen.insert(id.clone()))))
    }

    async fn release_resources(&self) -> Result<()> {
        let snap = self.snapshot();
        info!(chain = %self.name, backends = snap.persisters.len(), "releasing chain resources");
        self.broadcast(&snap, "releasing resources", &CancellationToken::new(), |p| async move {
            p.release_resources().await
        })
        .await
    }
}
