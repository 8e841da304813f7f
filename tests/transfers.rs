//! Transfer orchestrator integration tests.
//!
//! A scripted adapter stands in for the network so every property of the
//! job state machine (single-flight, retry cap, short-circuit,
//! cancellation, round-trip) is observable without a live backend.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use cidgate::backend::{AdapterFactory, BackendAdapter, TransferParams};
use cidgate::error::{GatewayError, Result};
use cidgate::orchestrator::{JobState, TransferConfig, TransferJob, TransferOrchestrator};
use cidgate::prober::{Reachability, StatusProber};
use cidgate::registry::BackendRegistry;
use cidgate::schema::BackendKind;
use cidgate::state::Database;
use cidgate::store::{ContentStore, FsStore};

#[derive(Clone, Copy, PartialEq)]
enum MockMode {
    /// pull returns the fixed payload; push returns a fixed locator.
    Echo,
    /// pull/push read and write a shared in-memory "remote" keyed by `key`.
    Remote,
    /// Every call fails with a transient error.
    FailTransient,
    /// Every call fails with a permanent error.
    FailPermanent,
    /// Every call blocks until cancelled or timed out.
    Hang,
}

struct MockAdapter {
    mode: MockMode,
    payload: Vec<u8>,
    probe_ok: bool,
    pulls: AtomicU32,
    pushes: AtomicU32,
    remote: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MockAdapter {
    fn new(mode: MockMode) -> Self {
        Self {
            mode,
            payload: b"payload".to_vec(),
            probe_ok: true,
            pulls: AtomicU32::new(0),
            pushes: AtomicU32::new(0),
            remote: Mutex::new(BTreeMap::new()),
        }
    }

    fn probe_down(mut self) -> Self {
        self.probe_ok = false;
        self
    }

    fn calls(&self) -> u32 {
        self.pulls.load(Ordering::SeqCst) + self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendAdapter for MockAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Gateway
    }

    async fn probe(&self) -> Result<()> {
        if self.probe_ok {
            Ok(())
        } else {
            Err(GatewayError::backend_transient("injected probe failure"))
        }
    }

    async fn pull(&self, params: &TransferParams) -> Result<Vec<u8>> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            MockMode::Echo => Ok(self.payload.clone()),
            MockMode::Remote => {
                let key = params.get("key").cloned().unwrap_or_default();
                self.remote
                    .lock()
                    .unwrap()
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| GatewayError::backend_permanent(format!("no object at `{key}`")))
            }
            MockMode::FailTransient => Err(GatewayError::backend_transient("injected failure")),
            MockMode::FailPermanent => Err(GatewayError::backend_permanent("injected failure")),
            MockMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("hang adapter should be cancelled or timed out")
            }
        }
    }

    async fn push(&self, data: &[u8], params: &TransferParams) -> Result<String> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            MockMode::Echo => Ok("mock-locator".to_string()),
            MockMode::Remote => {
                let key = params.get("key").cloned().unwrap_or_default();
                self.remote.lock().unwrap().insert(key.clone(), data.to_vec());
                Ok(key)
            }
            MockMode::FailTransient => Err(GatewayError::backend_transient("injected failure")),
            MockMode::FailPermanent => Err(GatewayError::backend_permanent("injected failure")),
            MockMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("hang adapter should be cancelled or timed out")
            }
        }
    }
}

struct Harness {
    orchestrator: Arc<TransferOrchestrator>,
    prober: Arc<StatusProber>,
    store: Arc<FsStore>,
    adapter: Arc<MockAdapter>,
    db: Database,
    _dir: tempfile::TempDir,
}

fn fast_config() -> TransferConfig {
    TransferConfig {
        retry_cap: 2,
        backoff_ms: 1,
        call_timeout_secs: 5,
        job_deadline_secs: 60,
        max_history: 100,
    }
}

async fn harness(adapter: MockAdapter, cfg: TransferConfig) -> Harness {
    harness_with_ttl(adapter, cfg, Duration::from_secs(60)).await
}

async fn harness_with_ttl(adapter: MockAdapter, cfg: TransferConfig, ttl: Duration) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::connect(&dir.path().join("gateway.db")).await.unwrap();
    db.migrate().await.unwrap();

    let store = Arc::new(FsStore::open(dir.path().join("store")).unwrap());
    let registry = Arc::new(BackendRegistry::new(db.clone()));

    let fields: BTreeMap<String, String> = [("base_url", "http://127.0.0.1:9")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    registry
        .create_or_update("demo", "gateway", fields)
        .await
        .unwrap();

    let adapter = Arc::new(adapter);
    let factory: AdapterFactory = {
        let adapter = adapter.clone();
        Arc::new(move |_def| Ok(adapter.clone() as Arc<dyn BackendAdapter>))
    };

    let prober = Arc::new(StatusProber::new(
        registry.clone(),
        factory.clone(),
        ttl,
        Duration::from_secs(1),
    ));

    let orchestrator = Arc::new(TransferOrchestrator::new(
        registry,
        prober.clone(),
        store.clone(),
        db.clone(),
        factory,
        cfg,
    ));

    Harness {
        orchestrator,
        prober,
        store,
        adapter,
        db,
        _dir: dir,
    }
}

fn params(pairs: &[(&str, &str)]) -> TransferParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn wait_terminal(orchestrator: &Arc<TransferOrchestrator>, id: Uuid) -> TransferJob {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = orchestrator.get_job(id).await.unwrap();
        if job.state.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} did not reach a terminal state"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn to_store_lands_bytes_in_content_store() {
    let h = harness(MockAdapter::new(MockMode::Echo), fast_config()).await;

    let id = h
        .orchestrator
        .to_store("demo", params(&[("path", "obj-1")]))
        .await
        .unwrap();

    let job = wait_terminal(&h.orchestrator, id).await;
    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.object_ref, "path=obj-1");

    let cid = job.result_ref.expect("succeeded to_store records a CID");
    assert_eq!(h.store.get(&cid).unwrap(), b"payload");
}

#[tokio::test]
async fn round_trip_preserves_bytes() {
    let h = harness(MockAdapter::new(MockMode::Remote), fast_config()).await;

    let original = b"round trip bytes".to_vec();
    let cid = h.store.put(&original).unwrap();

    // Push out of the store, then pull back through a fresh job.
    let push = h
        .orchestrator
        .from_store("demo", &cid, params(&[("key", "slot-a")]))
        .await
        .unwrap();
    let push_job = wait_terminal(&h.orchestrator, push).await;
    assert_eq!(push_job.state, JobState::Succeeded);
    assert_eq!(push_job.result_ref.as_deref(), Some("slot-a"));

    let pull = h
        .orchestrator
        .to_store("demo", params(&[("key", "slot-a")]))
        .await
        .unwrap();
    let pull_job = wait_terminal(&h.orchestrator, pull).await;
    assert_eq!(pull_job.state, JobState::Succeeded);

    let retrieved = h.store.get(pull_job.result_ref.as_deref().unwrap()).unwrap();
    assert_eq!(retrieved, original);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_identical_requests_collapse_to_one_job() {
    let mut cfg = fast_config();
    cfg.call_timeout_secs = 3600;
    let h = harness(MockAdapter::new(MockMode::Hang), cfg).await;

    let mut ids = Vec::new();
    let mut handles = Vec::new();
    for _ in 0..5 {
        let orchestrator = h.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .to_store("demo", params(&[("path", "same-object")]))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        ids.push(handle.await.unwrap());
    }

    let first = ids[0];
    assert!(ids.iter().all(|id| *id == first), "all callers share one job");

    // A request with different params is a different fingerprint.
    let other = h
        .orchestrator
        .to_store("demo", params(&[("path", "other-object")]))
        .await
        .unwrap();
    assert_ne!(other, first);

    // Exactly one adapter call is in flight for the shared fingerprint.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.adapter.pulls.load(Ordering::SeqCst), 2);

    h.orchestrator.cancel(first).await.unwrap();
    h.orchestrator.cancel(other).await.unwrap();
}

#[tokio::test]
async fn transient_failures_retry_up_to_cap() {
    let cfg = fast_config();
    let h = harness(MockAdapter::new(MockMode::FailTransient), cfg.clone()).await;

    let id = h
        .orchestrator
        .to_store("demo", params(&[("path", "x")]))
        .await
        .unwrap();

    let job = wait_terminal(&h.orchestrator, id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, cfg.retry_cap + 1);
    assert_eq!(h.adapter.calls(), cfg.retry_cap + 1);
    assert!(job.last_error.unwrap().contains("injected failure"));
}

#[tokio::test]
async fn permanent_failures_do_not_retry() {
    let h = harness(MockAdapter::new(MockMode::FailPermanent), fast_config()).await;

    let id = h
        .orchestrator
        .to_store("demo", params(&[("path", "x")]))
        .await
        .unwrap();

    let job = wait_terminal(&h.orchestrator, id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(h.adapter.calls(), 1);
}

#[tokio::test]
async fn failed_fingerprint_can_be_resubmitted() {
    let h = harness(MockAdapter::new(MockMode::FailPermanent), fast_config()).await;

    let first = h
        .orchestrator
        .to_store("demo", params(&[("path", "x")]))
        .await
        .unwrap();
    wait_terminal(&h.orchestrator, first).await;

    // Same request again: the fingerprint is free, so a new job is created.
    let second = h
        .orchestrator
        .to_store("demo", params(&[("path", "x")]))
        .await
        .unwrap();
    assert_ne!(second, first);
    wait_terminal(&h.orchestrator, second).await;
}

#[tokio::test]
async fn empty_refs_are_rejected_before_any_backend_call() {
    let h = harness(MockAdapter::new(MockMode::Echo), fast_config()).await;

    let err = h
        .orchestrator
        .from_store("demo", "   ", params(&[("key", "k")]))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));

    let err = h
        .orchestrator
        .to_store("demo", TransferParams::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));

    assert_eq!(h.adapter.calls(), 0);
}

#[tokio::test]
async fn unknown_backend_is_a_synchronous_error() {
    let h = harness(MockAdapter::new(MockMode::Echo), fast_config()).await;

    let err = h
        .orchestrator
        .to_store("nope", params(&[("path", "x")]))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::BackendNotFound(_)));
}

#[tokio::test]
async fn unreachable_backend_short_circuits_without_a_call() {
    let h = harness(
        MockAdapter::new(MockMode::Echo).probe_down(),
        fast_config(),
    )
    .await;

    // Seed the cache with a fresh negative probe result.
    let status = h.prober.probe("demo").await.unwrap();
    assert_eq!(status.reachability, Reachability::Unreachable);

    let id = h
        .orchestrator
        .to_store("demo", params(&[("path", "x")]))
        .await
        .unwrap();

    let job = wait_terminal(&h.orchestrator, id).await;
    assert_eq!(job.state, JobState::Failed);
    assert!(job.last_error.unwrap().contains("backend unavailable"));
    assert_eq!(h.adapter.calls(), 0);
}

#[tokio::test]
async fn missing_cid_fails_the_job_without_an_adapter_call() {
    let h = harness(MockAdapter::new(MockMode::Remote), fast_config()).await;

    let absent = cidgate::store::cid_for(b"never stored");
    let id = h
        .orchestrator
        .from_store("demo", &absent, params(&[("key", "k")]))
        .await
        .unwrap();

    let job = wait_terminal(&h.orchestrator, id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(h.adapter.pushes.load(Ordering::SeqCst), 0);
    assert!(job.last_error.unwrap().contains("not in content store"));
}

#[tokio::test]
async fn cancellation_is_cooperative_and_terminal() {
    let mut cfg = fast_config();
    cfg.call_timeout_secs = 3600;
    let h = harness(MockAdapter::new(MockMode::Hang), cfg).await;

    let id = h
        .orchestrator
        .to_store("demo", params(&[("path", "x")]))
        .await
        .unwrap();

    // Let the job reach its adapter call before cancelling.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = h.orchestrator.get_job(id).await.unwrap();
        if job.state == JobState::Running {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(h.orchestrator.cancel(id).await.unwrap());

    let job = wait_terminal(&h.orchestrator, id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.last_error.as_deref(), Some("cancelled"));

    // Cancelling a finished job reports false.
    assert!(!h.orchestrator.cancel(id).await.unwrap());
}

#[tokio::test]
async fn cancel_unknown_job_is_not_found() {
    let h = harness(MockAdapter::new(MockMode::Echo), fast_config()).await;
    let err = h.orchestrator.cancel(Uuid::now_v7()).await.unwrap_err();
    assert!(matches!(err, GatewayError::JobNotFound(_)));
}

#[tokio::test]
async fn status_cache_honors_ttl() {
    let h = harness_with_ttl(
        MockAdapter::new(MockMode::Echo),
        fast_config(),
        Duration::from_millis(50),
    )
    .await;

    // Cold cache reads unknown.
    assert_eq!(h.prober.get_cached("demo").reachability, Reachability::Unknown);

    let probed = h.prober.probe("demo").await.unwrap();
    assert_eq!(probed.reachability, Reachability::Reachable);
    assert!(probed.latency_ms.is_some());

    let cached = h.prober.get_cached("demo");
    assert_eq!(cached.reachability, Reachability::Reachable);
    assert_eq!(cached.checked_at, probed.checked_at);

    // Past the TTL the same entry reads unknown, not healthy.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let stale = h.prober.get_cached("demo");
    assert_eq!(stale.reachability, Reachability::Unknown);

    // Invalidation clears the entry outright.
    h.prober.probe("demo").await.unwrap();
    h.prober.invalidate("demo");
    assert_eq!(h.prober.get_cached("demo").reachability, Reachability::Unknown);
}

#[tokio::test]
async fn jobs_survive_in_durable_history() {
    let h = harness(MockAdapter::new(MockMode::Echo), fast_config()).await;

    let id = h
        .orchestrator
        .to_store("demo", params(&[("path", "obj")]))
        .await
        .unwrap();
    let job = wait_terminal(&h.orchestrator, id).await;

    // The durable row matches the in-memory record.
    let row = cidgate::state::repository::get_job(h.db.pool(), &id.to_string())
        .await
        .unwrap()
        .expect("job row persisted");
    assert_eq!(row.state, "succeeded");
    assert_eq!(row.result_ref, job.result_ref);
}
