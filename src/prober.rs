/// Backend status prober.
///
/// Maintains a TTL-bounded cache of per-backend reachability, refreshed by
/// a background cycle and on demand. The prober is the sole writer of
/// `BackendStatus`; consumers read the cache and never trigger network
/// traffic. A stale entry is reported as `unknown` rather than assumed
/// healthy.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::AdapterFactory;
use crate::error::Result;
use crate::registry::BackendRegistry;

/// Three-valued reachability: `unknown` covers both "never probed" and
/// "probe result older than the TTL".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Reachable,
    Unreachable,
    Unknown,
}

/// Cached probe result for one backend.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub backend_name: String,
    pub reachability: Reachability,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl BackendStatus {
    fn unknown(name: &str, checked_at: DateTime<Utc>) -> Self {
        Self {
            backend_name: name.to_string(),
            reachability: Reachability::Unknown,
            latency_ms: None,
            error: None,
            checked_at,
        }
    }
}

/// Cap on the stored error summary; probe failures can carry whole HTML
/// error pages.
const MAX_ERROR_LEN: usize = 200;

fn summarize_error(message: &str) -> String {
    let mut s: String = message.chars().take(MAX_ERROR_LEN).collect();
    if message.chars().count() > MAX_ERROR_LEN {
        s.push('…');
    }
    s
}

struct CacheEntry {
    status: BackendStatus,
    probed_at: Instant,
}

pub struct StatusProber {
    registry: Arc<BackendRegistry>,
    adapters: AdapterFactory,
    ttl: Duration,
    probe_timeout: Duration,
    statuses: RwLock<HashMap<String, CacheEntry>>,
}

impl StatusProber {
    pub fn new(
        registry: Arc<BackendRegistry>,
        adapters: AdapterFactory,
        ttl: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            adapters,
            ttl,
            probe_timeout,
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// Probe a backend now, bypassing the cache, and record the result.
    /// Errors out only when the backend is unknown or misconfigured; an
    /// unreachable backend is a successful probe with a negative answer.
    pub async fn probe(&self, name: &str) -> Result<BackendStatus> {
        let def = self.registry.get_raw(name).await?;
        let adapter = (self.adapters)(&def)?;

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.probe_timeout, adapter.probe()).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let status = match outcome {
            Ok(Ok(())) => BackendStatus {
                backend_name: name.to_string(),
                reachability: Reachability::Reachable,
                latency_ms: Some(latency_ms),
                error: None,
                checked_at: Utc::now(),
            },
            Ok(Err(e)) => BackendStatus {
                backend_name: name.to_string(),
                reachability: Reachability::Unreachable,
                latency_ms: Some(latency_ms),
                error: Some(summarize_error(&e.to_string())),
                checked_at: Utc::now(),
            },
            Err(_) => BackendStatus {
                backend_name: name.to_string(),
                reachability: Reachability::Unreachable,
                latency_ms: Some(latency_ms),
                error: Some(format!(
                    "probe timed out after {}ms",
                    self.probe_timeout.as_millis()
                )),
                checked_at: Utc::now(),
            },
        };

        debug!(
            backend = %name,
            reachability = ?status.reachability,
            latency_ms = status.latency_ms,
            "probe completed"
        );

        self.statuses
            .write()
            .expect("prober cache lock poisoned")
            .insert(
                name.to_string(),
                CacheEntry {
                    status: status.clone(),
                    probed_at: Instant::now(),
                },
            );

        Ok(status)
    }

    /// TTL-bounded cached status. Never touches the network.
    pub fn get_cached(&self, name: &str) -> BackendStatus {
        let statuses = self.statuses.read().expect("prober cache lock poisoned");
        match statuses.get(name) {
            Some(entry) if entry.probed_at.elapsed() <= self.ttl => entry.status.clone(),
            Some(entry) => BackendStatus::unknown(name, entry.status.checked_at),
            None => BackendStatus::unknown(name, DateTime::<Utc>::UNIX_EPOCH),
        }
    }

    /// Whether the cache holds a fresh negative result. `unknown` is not
    /// unreachable: a cold cache must not block transfers.
    pub fn is_unreachable(&self, name: &str) -> bool {
        self.get_cached(name).reachability == Reachability::Unreachable
    }

    /// Drop the cached status for a backend (configuration changed).
    pub fn invalidate(&self, name: &str) {
        self.statuses
            .write()
            .expect("prober cache lock poisoned")
            .remove(name);
    }

    /// Run the background probe cycle until the task is aborted.
    pub fn run(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.cycle().await;
            }
        })
    }

    async fn cycle(&self) {
        let backends = match self.registry.list().await {
            Ok(backends) => backends,
            Err(e) => {
                warn!(error = %e, "probe cycle could not list backends");
                return;
            }
        };

        for def in backends {
            if let Err(e) = self.probe(&def.name).await {
                warn!(backend = %def.name, error = %e, "probe failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_summary_is_bounded() {
        let long = "x".repeat(1000);
        let summary = summarize_error(&long);
        assert_eq!(summary.chars().count(), MAX_ERROR_LEN + 1);
        assert!(summary.ends_with('…'));

        assert_eq!(summarize_error("short"), "short");
    }
}
