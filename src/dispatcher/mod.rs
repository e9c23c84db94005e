//! Bounded worker pool driving the enrichment backlog
//!
//! Workers pull items from a shared pending queue, acquire a credential,
//! invoke the client, and apply the retry/eviction/backoff policy. Every
//! terminal outcome produces exactly one checkpoint row. Queue state lives
//! behind one mutex with a Notify for wakeups; workers never spin.
//!
//! Per-item state machine: pending -> in-flight -> {succeeded, sentinel,
//! unresolved}, with a bounded requeue loop back to pending on transient
//! failures. Pool exhaustion is fatal for the whole run: workers stop
//! pulling, in-flight attempts finish, and `run` returns an error carrying
//! the done/pending counts.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, eyre};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::client::{AnnotationClient, Outcome, SkipReason, UnavailableReason};
use crate::pool::{CredentialPool, Lease, PoolError};
use crate::record::{
    ArticleRecord, MARKER_UNRESOLVED, SENTINEL_EMPTY, SENTINEL_POLICY, SENTINEL_TOO_SHORT, WorkItem,
};

/// Dispatcher tuning knobs, all supplied by configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of concurrent workers (independent of credential count).
    pub workers: usize,
    /// Attempt budget per item, transient failures only.
    pub max_attempts: u32,
    /// Pause before requeueing a transient failure.
    pub retry_backoff: Duration,
    /// Grace pause after observing pool exhaustion before declaring the run
    /// fatal.
    pub exhausted_pause: Duration,
    /// Payloads shorter than this never reach the service.
    pub min_payload_chars: usize,
    /// Payloads are truncated to this many characters.
    pub max_payload_chars: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_attempts: 5,
            retry_backoff: Duration::from_millis(1000),
            exhausted_pause: Duration::from_millis(2000),
            min_payload_chars: 50,
            max_payload_chars: 15000,
        }
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub succeeded: usize,
    pub sentinels: usize,
    pub unresolved: usize,
    /// Items still queued when the run stopped (only nonzero on fatal exit).
    pub pending: usize,
}

impl RunSummary {
    pub fn done(&self) -> usize {
        self.succeeded + self.sentinels
    }
}

/// Why the run stopped early.
#[derive(Debug, Clone)]
enum FatalReason {
    PoolExhausted,
    Store(String),
}

/// One queued attempt-bearing item.
struct QueueItem {
    item: WorkItem,
    attempts: u32,
}

struct DispatchInner {
    queue: VecDeque<QueueItem>,
    in_flight: usize,
    fatal: Option<FatalReason>,
    summary: RunSummary,
}

/// Orchestrating core: owns the queue, the pool handle, the client, and the
/// store, and drives the backlog to completion or fatal exhaustion.
pub struct Dispatcher {
    config: DispatcherConfig,
    pool: Arc<CredentialPool>,
    client: Arc<dyn AnnotationClient>,
    store: Arc<CheckpointStore>,
    inner: Mutex<DispatchInner>,
    notify: Notify,
}

/// How often an idle worker re-checks the queue in case a wakeup was missed.
const IDLE_POLL: Duration = Duration::from_millis(100);

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        pool: Arc<CredentialPool>,
        client: Arc<dyn AnnotationClient>,
        store: Arc<CheckpointStore>,
    ) -> Self {
        Self {
            config,
            pool,
            client,
            store,
            inner: Mutex::new(DispatchInner {
                queue: VecDeque::new(),
                in_flight: 0,
                fatal: None,
                summary: RunSummary::default(),
            }),
            notify: Notify::new(),
        }
    }

    /// Drive a backlog of input rows to completion.
    ///
    /// Rows with payloads below the minimum are checkpointed as too-short
    /// sentinels without dispatching; everything else is enqueued and worked
    /// by `config.workers` concurrent tasks. Returns the run summary, or an
    /// error carrying the counts when the credential pool is exhausted.
    pub async fn run(self: &Arc<Self>, records: Vec<ArticleRecord>) -> Result<RunSummary> {
        let mut enqueued = 0usize;
        for record in records {
            match WorkItem::from_record(
                record.clone(),
                self.config.min_payload_chars,
                self.config.max_payload_chars,
            ) {
                Some(item) => {
                    let mut inner = self.inner.lock().await;
                    inner.queue.push_back(QueueItem { item, attempts: 0 });
                    enqueued += 1;
                }
                None => {
                    let mut row = record;
                    row.keywords = SENTINEL_TOO_SHORT.to_string();
                    self.store.append(&row).await?;
                    self.inner.lock().await.summary.sentinels += 1;
                }
            }
        }

        info!(enqueued, workers = self.config.workers, "dispatch starting");

        let worker_count = self.config.workers.max(1);
        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move { this.worker_loop(id).await }));
        }

        for handle in handles {
            handle.await.map_err(|e| eyre!("worker panicked: {e}"))?;
        }

        let inner = self.inner.lock().await;
        let mut summary = inner.summary;
        summary.pending = inner.queue.len();

        match &inner.fatal {
            Some(FatalReason::PoolExhausted) => Err(eyre!(
                "credential pool exhausted: {} done, {} pending; safe to resume once quota recovers",
                summary.done(),
                summary.pending + summary.unresolved
            )),
            Some(FatalReason::Store(msg)) => Err(eyre!("checkpoint store failure: {msg}")),
            None => {
                info!(
                    succeeded = summary.succeeded,
                    sentinels = summary.sentinels,
                    unresolved = summary.unresolved,
                    "dispatch complete"
                );
                Ok(summary)
            }
        }
    }

    async fn worker_loop(self: Arc<Self>, id: usize) {
        debug!(worker = id, "worker started");
        loop {
            let next = {
                let mut inner = self.inner.lock().await;
                if inner.fatal.is_some() {
                    debug!(worker = id, "worker stopping on fatal state");
                    return;
                }
                match inner.queue.pop_front() {
                    Some(entry) => {
                        inner.in_flight += 1;
                        Some(entry)
                    }
                    None if inner.in_flight == 0 => {
                        debug!(worker = id, "backlog drained, worker stopping");
                        return;
                    }
                    None => None,
                }
            };

            let Some(entry) = next else {
                // Queue momentarily empty while peers are in flight; their
                // requeues arrive via notify, with a poll as a backstop.
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                }
                continue;
            };

            self.process(entry).await;

            let mut inner = self.inner.lock().await;
            inner.in_flight -= 1;
            drop(inner);
            self.notify.notify_waiters();
        }
    }

    /// Run one attempt for one item and apply the outcome policy.
    async fn process(&self, entry: QueueItem) {
        let lease = match self.acquire_with_grace().await {
            Ok(lease) => lease,
            Err(PoolError::Exhausted) => {
                error!("no active credentials remain, stopping dispatch");
                let mut inner = self.inner.lock().await;
                inner.fatal = Some(FatalReason::PoolExhausted);
                // The item was never attempted; keep it pending.
                inner.queue.push_back(entry);
                drop(inner);
                self.notify.notify_waiters();
                return;
            }
        };

        let outcome = self.client.annotate(&entry.item, &lease.token).await;
        debug!(url = %entry.item.key(), key = %lease.suffix(), ?outcome, "attempt finished");

        match outcome {
            Outcome::Success(annotation) => {
                self.pool.clear_strikes(&lease).await;
                let mut row = entry.item.record;
                row.keywords = annotation;
                self.write_terminal(row, |s| s.succeeded += 1).await;
            }
            Outcome::InvalidInput(reason) => {
                // The credential worked; the input is the problem.
                self.pool.clear_strikes(&lease).await;
                let mut row = entry.item.record;
                row.keywords = match reason {
                    SkipReason::Policy => SENTINEL_POLICY.to_string(),
                    SkipReason::EmptyAnnotation => SENTINEL_EMPTY.to_string(),
                };
                self.write_terminal(row, |s| s.sentinels += 1).await;
            }
            Outcome::RateLimited => {
                self.requeue_or_abandon(entry).await;
            }
            Outcome::ServiceUnavailable(reason) => {
                if reason == UnavailableReason::NoVariant && self.pool.record_strike(&lease).await {
                    warn!(key = %lease.suffix(), "credential evicted after repeated variant misses");
                }
                self.requeue_or_abandon(entry).await;
            }
        }
    }

    /// Acquire a credential, allowing one grace pause across an exhausted
    /// pool observation before giving up.
    async fn acquire_with_grace(&self) -> Result<Lease, PoolError> {
        match self.pool.acquire().await {
            Ok(lease) => Ok(lease),
            Err(PoolError::Exhausted) => {
                warn!(
                    pause_ms = self.config.exhausted_pause.as_millis() as u64,
                    "pool exhausted, pausing before final check"
                );
                tokio::time::sleep(self.config.exhausted_pause).await;
                self.pool.acquire().await
            }
        }
    }

    /// Requeue a transient failure, or write the unresolved marker once the
    /// attempt budget is spent.
    async fn requeue_or_abandon(&self, mut entry: QueueItem) {
        entry.attempts += 1;
        if entry.attempts < self.config.max_attempts {
            debug!(
                url = %entry.item.key(),
                attempts = entry.attempts,
                "transient failure, requeueing"
            );
            tokio::time::sleep(self.config.retry_backoff).await;
            let mut inner = self.inner.lock().await;
            inner.queue.push_back(entry);
            drop(inner);
            self.notify.notify_waiters();
        } else {
            warn!(url = %entry.item.key(), "attempt budget spent, marking unresolved");
            let mut row = entry.item.record;
            row.keywords = MARKER_UNRESOLVED.to_string();
            self.write_terminal(row, |s| s.unresolved += 1).await;
        }
    }

    /// Append one terminal row; a failed append poisons the run.
    async fn write_terminal(&self, row: ArticleRecord, bump: impl FnOnce(&mut RunSummary)) {
        match self.store.append(&row).await {
            Ok(()) => {
                let mut inner = self.inner.lock().await;
                bump(&mut inner.summary);
            }
            Err(e) => {
                error!(url = %row.url, error = %e, "failed to append checkpoint row");
                let mut inner = self.inner.lock().await;
                inner.fatal = Some(FatalReason::Store(e.to_string()));
                drop(inner);
                self.notify.notify_waiters();
            }
        }
    }
}
