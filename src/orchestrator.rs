/// Transfer orchestrator.
///
/// Executes `to_store` / `from_store` jobs against registered backends:
///
/// 1. Validate the request and resolve the backend definition snapshot
/// 2. Deduplicate against in-flight jobs by fingerprint (single-flight)
/// 3. Run the adapter call with per-call timeouts, transient-only retries
///    with exponential backoff, and an overall wall-clock budget
/// 4. Record every state transition on the job, in memory and durably
///
/// Submission is fire-and-track: callers always get a job id back
/// immediately and discover the outcome by polling `get_job`. Jobs bind to
/// the definition snapshot taken at submit time; registry updates never
/// affect a running transfer.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{AdapterFactory, BackendAdapter, TransferParams};
use crate::error::{GatewayError, Result};
use crate::prober::StatusProber;
use crate::registry::BackendRegistry;
use crate::schema::FieldError;
use crate::state::models::TransferJobRow;
use crate::state::{repository, Database};
use crate::store::ContentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    ToStore,
    FromStore,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::ToStore => "to_store",
            TransferDirection::FromStore => "from_store",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "to_store" => Some(Self::ToStore),
            "from_store" => Some(Self::FromStore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A transfer job record.
#[derive(Debug, Clone, Serialize)]
pub struct TransferJob {
    pub id: Uuid,
    pub backend_name: String,
    pub direction: TransferDirection,
    /// Backend-native locator for `to_store`, CID for `from_store`.
    pub object_ref: String,
    pub fingerprint: String,
    pub state: JobState,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Produced CID for `to_store`, backend-native locator for `from_store`.
    pub result_ref: Option<String>,
    pub params: TransferParams,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Retry, timeout, and retention policy for transfers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Number of retries after the first attempt (attempts = cap + 1).
    pub retry_cap: u32,
    /// Base backoff; doubles per attempt.
    pub backoff_ms: u64,
    /// Timeout for a single adapter call.
    pub call_timeout_secs: u64,
    /// Wall-clock budget for a job across all attempts.
    pub job_deadline_secs: u64,
    /// Terminal jobs retained in history; oldest evicted beyond this.
    pub max_history: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            retry_cap: 3,
            backoff_ms: 500,
            call_timeout_secs: 60,
            job_deadline_secs: 600,
            max_history: 1000,
        }
    }
}

/// Derive the single-flight fingerprint for a transfer request.
///
/// Equal inputs must collide and nothing else may, so components and
/// param pairs are separator-delimited before hashing.
pub fn fingerprint(
    backend: &str,
    direction: TransferDirection,
    object_ref: &str,
    params: &TransferParams,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(backend.as_bytes());
    hasher.update(&[0]);
    hasher.update(direction.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(object_ref.as_bytes());
    for (k, v) in params {
        hasher.update(&[0]);
        hasher.update(k.as_bytes());
        hasher.update(&[1]);
        hasher.update(v.as_bytes());
    }
    hex::encode(hasher.finalize().as_bytes())
}

/// Canonical backend-native reference for a `to_store` request, derived
/// from its parameters. BTreeMap ordering makes this deterministic.
fn canonical_ref(params: &TransferParams) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

pub struct TransferOrchestrator {
    registry: Arc<BackendRegistry>,
    prober: Arc<StatusProber>,
    store: Arc<dyn ContentStore>,
    db: Database,
    adapters: AdapterFactory,
    cfg: TransferConfig,
    jobs: RwLock<HashMap<Uuid, TransferJob>>,
    /// fingerprint -> in-flight job id. Guards the single-flight invariant.
    inflight: Mutex<HashMap<String, Uuid>>,
    cancels: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl TransferOrchestrator {
    pub fn new(
        registry: Arc<BackendRegistry>,
        prober: Arc<StatusProber>,
        store: Arc<dyn ContentStore>,
        db: Database,
        adapters: AdapterFactory,
        cfg: TransferConfig,
    ) -> Self {
        Self {
            registry,
            prober,
            store,
            db,
            adapters,
            cfg,
            jobs: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Pull an object out of `backend` into the content-addressed store.
    pub async fn to_store(self: &Arc<Self>, backend: &str, params: TransferParams) -> Result<Uuid> {
        if params.is_empty() {
            return Err(GatewayError::Validation(vec![FieldError::missing("params")]));
        }
        let object_ref = canonical_ref(&params);
        self.submit(backend, TransferDirection::ToStore, object_ref, params)
            .await
    }

    /// Push the object identified by `cid` from the content-addressed
    /// store into `backend`.
    pub async fn from_store(
        self: &Arc<Self>,
        backend: &str,
        cid: &str,
        params: TransferParams,
    ) -> Result<Uuid> {
        if cid.trim().is_empty() {
            return Err(GatewayError::Validation(vec![FieldError::invalid(
                "cid",
                "must not be empty",
            )]));
        }
        self.submit(backend, TransferDirection::FromStore, cid.to_string(), params)
            .await
    }

    async fn submit(
        self: &Arc<Self>,
        backend: &str,
        direction: TransferDirection,
        object_ref: String,
        params: TransferParams,
    ) -> Result<Uuid> {
        // Snapshot the definition before anything else; unknown backends
        // fail synchronously, and the snapshot is what the job binds to.
        let def = self.registry.get_raw(backend).await?;

        let fp = fingerprint(backend, direction, &object_ref, &params);
        let id = Uuid::now_v7();

        {
            let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
            if let Some(existing) = inflight.get(&fp) {
                debug!(job = %existing, fingerprint = %fp, "transfer already in flight");
                return Ok(*existing);
            }
            inflight.insert(fp.clone(), id);
        }

        let job = TransferJob {
            id,
            backend_name: backend.to_string(),
            direction,
            object_ref,
            fingerprint: fp.clone(),
            state: JobState::Pending,
            attempts: 0,
            last_error: None,
            result_ref: None,
            params,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        self.jobs
            .write()
            .expect("jobs lock poisoned")
            .insert(id, job.clone());

        if let Err(e) = repository::insert_job(self.db.pool(), &job_to_row(&job)).await {
            self.inflight.lock().expect("inflight lock poisoned").remove(&fp);
            self.jobs.write().expect("jobs lock poisoned").remove(&id);
            return Err(e);
        }

        // Pre-flight: a fresh negative probe result short-circuits to
        // Failed without a network call. Unknown (cold or stale cache)
        // proceeds; refusing on a cold cache would make the prober a hard
        // dependency of every transfer.
        if self.prober.is_unreachable(backend) {
            warn!(job = %id, backend = %backend, "short-circuiting transfer: backend unavailable");
            let reason = GatewayError::BackendUnavailable(backend.to_string()).to_string();
            self.finish(id, &fp, JobState::Failed, None, Some(reason)).await;
            return Ok(id);
        }

        let adapter = match (self.adapters)(&def) {
            Ok(adapter) => adapter,
            Err(e) => {
                self.finish(id, &fp, JobState::Failed, None, Some(e.to_string())).await;
                return Ok(id);
            }
        };

        let token = CancellationToken::new();
        self.cancels
            .lock()
            .expect("cancel lock poisoned")
            .insert(id, token.clone());

        let this = Arc::clone(self);
        let fp_task = fp.clone();
        tokio::spawn(async move {
            this.run_job(id, fp_task, adapter, token).await;
        });

        Ok(id)
    }

    async fn run_job(
        self: Arc<Self>,
        id: Uuid,
        fp: String,
        adapter: Arc<dyn BackendAdapter>,
        token: CancellationToken,
    ) {
        let Some((backend, direction, object_ref, params)) = ({
            let jobs = self.jobs.read().expect("jobs lock poisoned");
            jobs.get(&id).map(|job| {
                (
                    job.backend_name.clone(),
                    job.direction,
                    job.object_ref.clone(),
                    job.params.clone(),
                )
            })
        }) else {
            return;
        };

        self.update(id, |job| {
            job.state = JobState::Running;
            job.started_at = Some(Utc::now());
        })
        .await;

        info!(
            job = %id,
            backend = %backend,
            direction = direction.as_str(),
            object_ref = %object_ref,
            "transfer started"
        );

        let call_timeout = Duration::from_secs(self.cfg.call_timeout_secs);
        let deadline = Instant::now() + Duration::from_secs(self.cfg.job_deadline_secs);

        let mut attempt: u32 = 0;
        let outcome = loop {
            attempt += 1;
            self.update(id, |job| job.attempts = attempt).await;

            let result = tokio::select! {
                _ = token.cancelled() => Err(GatewayError::Cancelled),
                attempt_result = tokio::time::timeout(
                    call_timeout,
                    self.execute(direction, &object_ref, &params, adapter.as_ref()),
                ) => match attempt_result {
                    Ok(r) => r,
                    Err(_) => Err(GatewayError::backend_transient(format!(
                        "adapter call timed out after {}s",
                        call_timeout.as_secs()
                    ))),
                },
            };

            match result {
                Ok(result_ref) => break Ok(result_ref),
                Err(GatewayError::Cancelled) => break Err(GatewayError::Cancelled),
                Err(e) => {
                    if !e.is_transient() || attempt > self.cfg.retry_cap {
                        break Err(e);
                    }

                    let shift = (attempt - 1).min(16);
                    let backoff = Duration::from_millis(self.cfg.backoff_ms << shift);
                    if Instant::now() + backoff >= deadline {
                        break Err(GatewayError::backend_permanent(format!(
                            "job deadline exhausted after {attempt} attempts; last error: {e}"
                        )));
                    }

                    warn!(
                        job = %id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "transfer attempt failed, retrying"
                    );

                    tokio::select! {
                        _ = token.cancelled() => break Err(GatewayError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        };

        match outcome {
            Ok(result_ref) => {
                info!(job = %id, result_ref = %result_ref, "transfer succeeded");
                self.finish(id, &fp, JobState::Succeeded, Some(result_ref), None)
                    .await;
            }
            Err(GatewayError::Cancelled) => {
                info!(job = %id, "transfer cancelled");
                self.finish(id, &fp, JobState::Failed, None, Some("cancelled".to_string()))
                    .await;
            }
            Err(e) => {
                warn!(job = %id, error = %e, "transfer failed");
                self.finish(id, &fp, JobState::Failed, None, Some(e.to_string()))
                    .await;
            }
        }
    }

    /// One adapter round trip. `to_store` pulls from the backend and lands
    /// the bytes in the content store; `from_store` reads the store and
    /// pushes to the backend.
    async fn execute(
        &self,
        direction: TransferDirection,
        object_ref: &str,
        params: &TransferParams,
        adapter: &dyn BackendAdapter,
    ) -> Result<String> {
        match direction {
            TransferDirection::ToStore => {
                let bytes = adapter.pull(params).await?;
                let cid = self.store.put(&bytes)?;
                Ok(cid)
            }
            TransferDirection::FromStore => {
                let bytes = self.store.get(object_ref)?;
                adapter.push(&bytes, params).await
            }
        }
    }

    /// Apply a mutation to the in-memory job and persist the new row.
    /// Persistence failures are logged, not raised: the in-memory record
    /// stays authoritative for in-flight jobs.
    async fn update(&self, id: Uuid, mutate: impl FnOnce(&mut TransferJob)) {
        let row = {
            let mut jobs = self.jobs.write().expect("jobs lock poisoned");
            let Some(job) = jobs.get_mut(&id) else {
                return;
            };
            mutate(job);
            job_to_row(job)
        };

        if let Err(e) = repository::update_job(self.db.pool(), &row).await {
            warn!(job = %id, error = %e, "failed to persist job update");
        }
    }

    async fn finish(
        &self,
        id: Uuid,
        fp: &str,
        state: JobState,
        result_ref: Option<String>,
        last_error: Option<String>,
    ) {
        self.update(id, |job| {
            job.state = state;
            job.result_ref = result_ref;
            job.last_error = last_error;
            job.finished_at = Some(Utc::now());
        })
        .await;

        {
            let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
            if inflight.get(fp) == Some(&id) {
                inflight.remove(fp);
            }
        }
        self.cancels.lock().expect("cancel lock poisoned").remove(&id);

        match repository::prune_jobs(self.db.pool(), self.cfg.max_history as i64).await {
            Ok(evicted) if evicted > 0 => {
                debug!(evicted, "pruned transfer job history");
                // Mirror eviction in memory: oldest terminal jobs fall out
                // once the database no longer knows them.
                let mut jobs = self.jobs.write().expect("jobs lock poisoned");
                if jobs.len() > self.cfg.max_history as usize {
                    let mut terminal: Vec<(Uuid, DateTime<Utc>)> = jobs
                        .values()
                        .filter(|j| j.state.is_terminal())
                        .map(|j| (j.id, j.created_at))
                        .collect();
                    terminal.sort_by_key(|(_, created)| *created);
                    let excess = jobs.len() - self.cfg.max_history as usize;
                    for (old, _) in terminal.into_iter().take(excess) {
                        jobs.remove(&old);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to prune job history"),
        }
    }

    /// Fetch a job by id, falling back to the durable history for jobs
    /// that predate this process.
    pub async fn get_job(&self, id: Uuid) -> Result<TransferJob> {
        if let Some(job) = self.jobs.read().expect("jobs lock poisoned").get(&id) {
            return Ok(job.clone());
        }

        match repository::get_job(self.db.pool(), &id.to_string()).await? {
            Some(row) => row_to_job(row),
            None => Err(GatewayError::JobNotFound(id.to_string())),
        }
    }

    /// Request cooperative cancellation of a running job. Returns whether a
    /// cancellation signal was delivered; terminal jobs return `false`.
    pub async fn cancel(&self, id: Uuid) -> Result<bool> {
        let token = self.cancels.lock().expect("cancel lock poisoned").get(&id).cloned();
        match token {
            Some(token) => {
                token.cancel();
                Ok(true)
            }
            None => {
                // Distinguish "already finished" from "never existed".
                self.get_job(id).await?;
                Ok(false)
            }
        }
    }
}

fn job_to_row(job: &TransferJob) -> TransferJobRow {
    TransferJobRow {
        id: job.id.to_string(),
        backend_name: job.backend_name.clone(),
        direction: job.direction.as_str().to_string(),
        object_ref: job.object_ref.clone(),
        fingerprint: job.fingerprint.clone(),
        state: job.state.as_str().to_string(),
        attempts: job.attempts as i64,
        last_error: job.last_error.clone(),
        result_ref: job.result_ref.clone(),
        params: serde_json::to_string(&job.params).unwrap_or_else(|_| "{}".to_string()),
        created_at: job.created_at,
        started_at: job.started_at,
        finished_at: job.finished_at,
    }
}

fn row_to_job(row: TransferJobRow) -> Result<TransferJob> {
    let id = Uuid::parse_str(&row.id)
        .map_err(|e| GatewayError::Serialization(format!("stored job id: {e}")))?;
    let direction = TransferDirection::parse(&row.direction).ok_or_else(|| {
        GatewayError::Serialization(format!("stored job direction `{}`", row.direction))
    })?;
    let state = JobState::parse(&row.state)
        .ok_or_else(|| GatewayError::Serialization(format!("stored job state `{}`", row.state)))?;
    let params: BTreeMap<String, String> = serde_json::from_str(&row.params)
        .map_err(|e| GatewayError::Serialization(format!("stored job params: {e}")))?;

    Ok(TransferJob {
        id,
        backend_name: row.backend_name,
        direction,
        object_ref: row.object_ref,
        fingerprint: row.fingerprint,
        state,
        attempts: row.attempts as u32,
        last_error: row.last_error,
        result_ref: row.result_ref,
        params,
        created_at: row.created_at,
        started_at: row.started_at,
        finished_at: row.finished_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> TransferParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let p = params(&[("bucket", "b"), ("key", "k")]);
        let a = fingerprint("s3", TransferDirection::ToStore, "ref", &p);
        let b = fingerprint("s3", TransferDirection::ToStore, "ref", &p);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_separates_components() {
        let p = params(&[("key", "k")]);
        let base = fingerprint("s3", TransferDirection::ToStore, "ref", &p);

        assert_ne!(base, fingerprint("s4", TransferDirection::ToStore, "ref", &p));
        assert_ne!(base, fingerprint("s3", TransferDirection::FromStore, "ref", &p));
        assert_ne!(base, fingerprint("s3", TransferDirection::ToStore, "ref2", &p));
        assert_ne!(
            base,
            fingerprint("s3", TransferDirection::ToStore, "ref", &params(&[("key", "other")]))
        );
    }

    #[test]
    fn test_fingerprint_param_order_is_canonical() {
        // BTreeMap iteration is sorted, so insertion order cannot matter.
        let mut a = TransferParams::new();
        a.insert("a".to_string(), "1".to_string());
        a.insert("b".to_string(), "2".to_string());
        let mut b = TransferParams::new();
        b.insert("b".to_string(), "2".to_string());
        b.insert("a".to_string(), "1".to_string());

        assert_eq!(
            fingerprint("x", TransferDirection::ToStore, "r", &a),
            fingerprint("x", TransferDirection::ToStore, "r", &b)
        );
    }

    #[test]
    fn test_canonical_ref() {
        let p = params(&[("key", "file.txt"), ("bucket", "demo")]);
        assert_eq!(canonical_ref(&p), "bucket=demo&key=file.txt");
    }

    #[test]
    fn test_state_round_trip() {
        for state in [JobState::Pending, JobState::Running, JobState::Succeeded, JobState::Failed] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        for direction in [TransferDirection::ToStore, TransferDirection::FromStore] {
            assert_eq!(TransferDirection::parse(direction.as_str()), Some(direction));
        }
    }
}
