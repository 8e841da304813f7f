/// Pluggable backend adapter abstraction for cidgate.
///
/// An adapter is the only component that speaks a backend's native
/// protocol. The orchestrator and the status prober depend solely on the
/// `BackendAdapter` trait; adding a backend type means implementing the
/// trait and registering a schema, with zero orchestrator changes.
pub mod gateway;
pub mod ipfs;
pub mod model_hub;
pub mod object_store;
pub mod retrieval;
pub mod shared_drive;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{GatewayError, Result};
use crate::registry::BackendDefinition;
use crate::schema::{BackendKind, FieldError};

/// Backend-type-specific transfer parameters (object key, repo path, CID, …).
pub type TransferParams = BTreeMap<String, String>;

/// Capability interface every backend type implements.
///
/// `pull`/`push` move whole objects; `probe` is a lightweight reachability
/// check, never a full transfer. Adapters encapsulate authentication and
/// request shaping and report failures as transient or permanent so the
/// orchestrator's retry policy stays protocol-agnostic.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// The backend type this adapter serves.
    fn kind(&self) -> BackendKind;

    /// Cheap reachability check.
    async fn probe(&self) -> Result<()>;

    /// Fetch an object from the backend.
    async fn pull(&self, params: &TransferParams) -> Result<Vec<u8>>;

    /// Store an object in the backend. Returns the backend-native locator.
    async fn push(&self, data: &[u8], params: &TransferParams) -> Result<String>;
}

/// Constructor used by the orchestrator and prober to resolve adapters.
/// Injectable so tests can substitute scripted adapters.
pub type AdapterFactory =
    Arc<dyn Fn(&BackendDefinition) -> Result<Arc<dyn BackendAdapter>> + Send + Sync>;

/// Build the adapter for a definition. Dispatch is a tagged-variant match
/// over the kind; the field map has already passed schema validation.
pub fn build(def: &BackendDefinition) -> Result<Arc<dyn BackendAdapter>> {
    let fields = &def.fields;
    let adapter: Arc<dyn BackendAdapter> = match def.kind {
        BackendKind::ObjectStore => Arc::new(object_store::ObjectStoreAdapter::from_fields(fields)?),
        BackendKind::ModelHub => Arc::new(model_hub::ModelHubAdapter::from_fields(fields)?),
        BackendKind::SharedDrive => Arc::new(shared_drive::SharedDriveAdapter::from_fields(fields)?),
        BackendKind::Gateway => Arc::new(gateway::GatewayAdapter::from_fields(fields)?),
        BackendKind::DecentralizedRetrieval => {
            Arc::new(retrieval::RetrievalAdapter::from_fields(fields)?)
        }
        BackendKind::GenericIpfs => Arc::new(ipfs::IpfsAdapter::from_fields(fields)?),
    };
    Ok(adapter)
}

/// The production adapter factory.
pub fn default_factory() -> AdapterFactory {
    Arc::new(build)
}

/// Look up a required transfer parameter.
pub(crate) fn require<'a>(params: &'a TransferParams, key: &str) -> Result<&'a str> {
    match params.get(key).map(String::as_str) {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(GatewayError::Validation(vec![FieldError::missing(key)])),
    }
}

/// Look up a required configuration field. Validation happens before a
/// definition is persisted, so a miss here is a programming error surfaced
/// as a permanent backend failure rather than a panic.
pub(crate) fn field<'a>(fields: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    fields
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| GatewayError::backend_permanent(format!("missing backend field `{key}`")))
}

/// Map a reqwest transport error. Timeouts and connection failures are
/// transient; everything else (TLS, malformed URL) is permanent.
pub(crate) fn send_err(context: &str, e: reqwest::Error) -> GatewayError {
    let message = format!("{context}: {e}");
    if e.is_timeout() || e.is_connect() {
        GatewayError::backend_transient(message)
    } else {
        GatewayError::backend_permanent(message)
    }
}

/// Turn a non-success HTTP response into a classified backend error.
/// Rate-limit and server-side statuses are transient; client errors are not.
pub(crate) async fn status_err(context: &str, resp: reqwest::Response) -> GatewayError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = format!("{context} ({status}): {body}");
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        GatewayError::backend_transient(message)
    } else {
        GatewayError::backend_permanent(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_rejects_missing_and_blank() {
        let mut params = TransferParams::new();
        assert!(require(&params, "key").is_err());
        params.insert("key".to_string(), "  ".to_string());
        assert!(require(&params, "key").is_err());
        params.insert("key".to_string(), "file.txt".to_string());
        assert_eq!(require(&params, "key").unwrap(), "file.txt");
    }
}
