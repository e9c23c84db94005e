//! End-to-end pipeline tests
//!
//! These exercise resume-across-restarts behavior: a run is simulated,
//! interrupted, and restarted against the same input and output store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use enrichd::checkpoint::{CheckpointStore, read_records};
use enrichd::client::{AnnotationClient, Outcome, SkipReason, UnavailableReason};
use enrichd::dispatcher::{Dispatcher, DispatcherConfig};
use enrichd::pool::CredentialPool;
use enrichd::record::{ArticleRecord, MARKER_UNRESOLVED, SENTINEL_POLICY, WorkItem};

fn article(n: usize) -> ArticleRecord {
    ArticleRecord {
        topic: "news".to_string(),
        title: format!("article {n}"),
        url: format!("http://example.com/{n}"),
        content: format!("body of article {n} {}", "x".repeat(120)),
        ..Default::default()
    }
}

fn inputs(n: usize) -> Vec<ArticleRecord> {
    (0..n).map(article).collect()
}

fn config(workers: usize) -> DispatcherConfig {
    DispatcherConfig {
        workers,
        max_attempts: 3,
        retry_backoff: Duration::from_millis(1),
        exhausted_pause: Duration::from_millis(1),
        ..Default::default()
    }
}

fn harness(
    temp: &TempDir,
    workers: usize,
    keys: usize,
    client: Arc<dyn AnnotationClient>,
) -> (Arc<Dispatcher>, Arc<CheckpointStore>, Arc<CredentialPool>) {
    let store = Arc::new(CheckpointStore::new(temp.path().join("out.csv")));
    let tokens = (0..keys).map(|i| format!("key-{i}")).collect();
    let pool = Arc::new(CredentialPool::new(tokens, Duration::ZERO, 2));
    let dispatcher = Arc::new(Dispatcher::new(
        config(workers),
        Arc::clone(&pool),
        client,
        Arc::clone(&store),
    ));
    (dispatcher, store, pool)
}

/// Succeeds everywhere, counting calls per key.
#[derive(Default)]
struct CountingClient {
    calls: std::sync::Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl AnnotationClient for CountingClient {
    async fn annotate(&self, item: &WorkItem, token: &str) -> Outcome {
        *self.calls.lock().unwrap().entry(token.to_string()).or_insert(0) += 1;
        Outcome::Success(format!("keywords for {}", item.key()))
    }
}

/// Transient-fails specific URLs a limited number of times each.
struct PartialFailClient {
    fail_urls: Vec<String>,
    budget: AtomicUsize,
}

#[async_trait]
impl AnnotationClient for PartialFailClient {
    async fn annotate(&self, item: &WorkItem, _token: &str) -> Outcome {
        if self.fail_urls.iter().any(|u| u == item.key())
            && self
                .budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Outcome::ServiceUnavailable(UnavailableReason::Api("503".to_string()));
        }
        Outcome::Success("recovered keywords".to_string())
    }
}

struct AlwaysRateLimited;

#[async_trait]
impl AnnotationClient for AlwaysRateLimited {
    async fn annotate(&self, _item: &WorkItem, _token: &str) -> Outcome {
        Outcome::RateLimited
    }
}

struct PolicyRejectsEverything;

#[async_trait]
impl AnnotationClient for PolicyRejectsEverything {
    async fn annotate(&self, _item: &WorkItem, _token: &str) -> Outcome {
        Outcome::InvalidInput(SkipReason::Policy)
    }
}

#[tokio::test]
async fn test_resume_skips_completed_rows() {
    let temp = TempDir::new().unwrap();

    // First run: complete 6 of 10, then "crash" (simulated by only feeding
    // the first 6 rows).
    let client = Arc::new(CountingClient::default());
    let (dispatcher, store, _pool) = harness(&temp, 4, 2, Arc::clone(&client) as Arc<dyn AnnotationClient>);
    let all = inputs(10);
    let summary = dispatcher.run(store.remaining(all[..6].to_vec()).unwrap()).await.unwrap();
    assert_eq!(summary.succeeded, 6);

    // Second run against the full input: only the 4 missing rows dispatch.
    let client2 = Arc::new(CountingClient::default());
    let (dispatcher2, store2, _pool2) = harness_with_store(&temp, 4, 2, Arc::clone(&client2) as _);
    let pending = store2.remaining(all).unwrap();
    assert_eq!(pending.len(), 4);
    let summary2 = dispatcher2.run(pending).await.unwrap();
    assert_eq!(summary2.succeeded, 4);

    let total_calls: usize = client2.calls.lock().unwrap().values().sum();
    assert_eq!(total_calls, 4, "completed rows must not be re-invoked");

    // One terminal row per key overall.
    let rows = read_records(store.path()).unwrap();
    assert_eq!(rows.len(), 10);
    let mut urls: Vec<_> = rows.iter().map(|r| r.url.clone()).collect();
    urls.sort();
    urls.dedup();
    assert_eq!(urls.len(), 10);
}

/// Like `harness` but reusing the store file already in `temp`.
fn harness_with_store(
    temp: &TempDir,
    workers: usize,
    keys: usize,
    client: Arc<dyn AnnotationClient>,
) -> (Arc<Dispatcher>, Arc<CheckpointStore>, Arc<CredentialPool>) {
    harness(temp, workers, keys, client)
}

#[tokio::test]
async fn test_unresolved_rows_are_retried_after_restart() {
    let temp = TempDir::new().unwrap();
    let all = inputs(4);

    // First run: everything rate limited, so every row exhausts its budget
    // and lands as an unresolved marker.
    let (dispatcher, store, _pool) = harness(&temp, 2, 2, Arc::new(AlwaysRateLimited));
    let summary = dispatcher.run(store.remaining(all.clone()).unwrap()).await.unwrap();
    assert_eq!(summary.unresolved, 4);

    let rows = read_records(store.path()).unwrap();
    assert!(rows.iter().all(|r| r.keywords == MARKER_UNRESOLVED));

    // Restart: unresolved rows are pending again. Prune first, as the run
    // command does, then everything succeeds.
    let (dispatcher2, store2, _pool2) = harness_with_store(&temp, 2, 2, Arc::new(CountingClient::default()));
    let removed = store2.prune_and_rewrite().await.unwrap();
    assert_eq!(removed, 4);

    let pending = store2.remaining(all).unwrap();
    assert_eq!(pending.len(), 4);
    let summary2 = dispatcher2.run(pending).await.unwrap();
    assert_eq!(summary2.succeeded, 4);

    let rows = read_records(store2.path()).unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.is_done()));
}

#[tokio::test]
async fn test_sentinel_rows_are_final_across_restarts() {
    let temp = TempDir::new().unwrap();
    let all = inputs(3);

    let (dispatcher, store, _pool) = harness(&temp, 2, 2, Arc::new(PolicyRejectsEverything));
    let summary = dispatcher.run(store.remaining(all.clone()).unwrap()).await.unwrap();
    assert_eq!(summary.sentinels, 3);

    // Restart with a client that would succeed: nothing is pending.
    let client = Arc::new(CountingClient::default());
    let (_dispatcher2, store2, _pool2) = harness_with_store(&temp, 2, 2, Arc::clone(&client) as _);
    store2.prune_and_rewrite().await.unwrap();
    let pending = store2.remaining(all).unwrap();
    assert!(pending.is_empty(), "sentinel rows must never be retried");

    let rows = read_records(store2.path()).unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.keywords == SENTINEL_POLICY));
}

#[tokio::test]
async fn test_transient_failures_recover_in_one_run() {
    let temp = TempDir::new().unwrap();
    let client = Arc::new(PartialFailClient {
        fail_urls: vec!["http://example.com/1".to_string(), "http://example.com/3".to_string()],
        budget: AtomicUsize::new(2),
    });
    let (dispatcher, store, _pool) = harness(&temp, 3, 3, client);

    let summary = dispatcher.run(inputs(6)).await.unwrap();
    assert_eq!(summary.succeeded, 6);
    assert_eq!(summary.unresolved, 0);
    assert_eq!(read_records(store.path()).unwrap().len(), 6);
}

#[tokio::test]
async fn test_exhaustion_surfaces_within_bounded_time() {
    struct EvictEverything;

    #[async_trait]
    impl AnnotationClient for EvictEverything {
        async fn annotate(&self, _item: &WorkItem, _token: &str) -> Outcome {
            Outcome::ServiceUnavailable(UnavailableReason::NoVariant)
        }
    }

    let temp = TempDir::new().unwrap();
    let (dispatcher, _store, pool) = harness(&temp, 2, 2, Arc::new(EvictEverything));

    let result = tokio::time::timeout(Duration::from_secs(10), dispatcher.run(inputs(20))).await;
    let err = result.expect("run must terminate, not spin").unwrap_err();
    assert!(err.to_string().contains("pool exhausted"));
    assert_eq!(pool.active_count().await, 0);
}

#[tokio::test]
async fn test_many_workers_serialize_store_writes() {
    let temp = TempDir::new().unwrap();
    let (dispatcher, store, _pool) = harness(&temp, 16, 4, Arc::new(CountingClient::default()));

    let summary = dispatcher.run(inputs(60)).await.unwrap();
    assert_eq!(summary.succeeded, 60);

    // Every row parses back cleanly and the header appears exactly once.
    let rows = read_records(store.path()).unwrap();
    assert_eq!(rows.len(), 60);
    let text = std::fs::read_to_string(store.path()).unwrap();
    assert_eq!(text.matches("topic,title,summary,url").count(), 1);
}
