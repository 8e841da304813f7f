/// REST API routes for cidgate.
///
/// Configuration errors resolve fully at this boundary with field-level
/// detail; transfer failures are recorded on the job and surfaced by
/// polling, never thrown back from the submission call.
use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::backend::TransferParams;
use crate::error::GatewayError;
use crate::orchestrator::TransferJob;
use crate::prober::BackendStatus;
use crate::registry::BackendDefinition;
use crate::schema::{FieldError, TypeDescriptor};

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
}

/// Map a gateway error to an HTTP response.
fn error_response(e: GatewayError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, fields) = match &e {
        GatewayError::Validation(errors) => (StatusCode::BAD_REQUEST, Some(errors.clone())),
        GatewayError::UnknownBackendType(_) => (StatusCode::BAD_REQUEST, None),
        GatewayError::BackendNotFound(_) | GatewayError::JobNotFound(_) => {
            (StatusCode::NOT_FOUND, None)
        }
        GatewayError::BackendUnavailable(_) => (StatusCode::CONFLICT, None),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, None),
    };

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            fields,
        }),
    )
}

// ─── Health ──────────────────────────────────────────────

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

// ─── Configuration ───────────────────────────────────────

/// Full configuration view: gateway settings plus the masked backend catalog.
#[derive(Debug, Serialize)]
struct ConfigResponse {
    main: serde_json::Value,
    backends: BTreeMap<String, BackendDefinition>,
}

/// GET /config
async fn get_config(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ConfigResponse>, (StatusCode, Json<ErrorResponse>)> {
    let backends = state
        .registry
        .list()
        .await
        .map_err(error_response)?
        .into_iter()
        .map(|def| (def.name.clone(), def))
        .collect();

    let main = serde_json::to_value(&state.config)
        .map_err(|e| error_response(GatewayError::Serialization(e.to_string())))?;

    Ok(Json(ConfigResponse { main, backends }))
}

/// Backend type catalog response.
#[derive(Debug, Serialize)]
struct TypesResponse {
    types: Vec<TypeDescriptor>,
}

/// GET /backends/types
async fn list_types() -> Json<TypesResponse> {
    Json(TypesResponse {
        types: crate::registry::BackendRegistry::list_types(),
    })
}

/// Request to create or update a backend definition.
#[derive(Debug, Deserialize)]
struct UpsertBackendRequest {
    #[serde(rename = "type")]
    kind: String,
    config: BTreeMap<String, String>,
}

/// Outcome of a backend configuration submission. Validation failures are
/// a `success: false` answer, not a transport error.
#[derive(Debug, Serialize)]
struct UpsertBackendResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<BackendDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Vec<FieldError>>,
}

/// POST /config/backends/{name}
async fn upsert_backend(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpsertBackendRequest>,
) -> Result<Json<UpsertBackendResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state
        .registry
        .create_or_update(&name, &req.kind, req.config)
        .await
    {
        Ok(def) => {
            // The stored configuration changed; any cached status belongs
            // to the previous definition.
            state.prober.invalidate(&name);
            Ok(Json(UpsertBackendResponse {
                success: true,
                backend: Some(def),
                error: None,
            }))
        }
        Err(GatewayError::Validation(errors)) => Ok(Json(UpsertBackendResponse {
            success: false,
            backend: None,
            error: Some(errors),
        })),
        Err(GatewayError::UnknownBackendType(kind)) => Ok(Json(UpsertBackendResponse {
            success: false,
            backend: None,
            error: Some(vec![FieldError::invalid(
                "type",
                &format!("unknown backend type `{kind}`"),
            )]),
        })),
        Err(e) => Err(error_response(e)),
    }
}

pub fn config_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/config", get(get_config))
        .route("/backends/types", get(list_types))
        .route("/config/backends/{name}", post(upsert_backend))
}

// ─── Transfers ───────────────────────────────────────────

/// Request to pull an object from a backend into the store.
#[derive(Debug, Deserialize)]
struct ToStoreRequest {
    #[serde(default)]
    params: TransferParams,
}

/// Request to push a stored object to a backend.
#[derive(Debug, Deserialize)]
struct FromStoreRequest {
    cid: String,
    #[serde(default)]
    params: TransferParams,
}

/// Submission response: the job id to poll.
#[derive(Debug, Serialize)]
struct JobSubmitResponse {
    job_id: Uuid,
}

/// POST /backends/{name}/to_store
async fn to_store(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ToStoreRequest>,
) -> Result<(StatusCode, Json<JobSubmitResponse>), (StatusCode, Json<ErrorResponse>)> {
    let job_id = state
        .orchestrator
        .to_store(&name, req.params)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::ACCEPTED, Json(JobSubmitResponse { job_id })))
}

/// POST /backends/{name}/from_store
async fn from_store(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<FromStoreRequest>,
) -> Result<(StatusCode, Json<JobSubmitResponse>), (StatusCode, Json<ErrorResponse>)> {
    let job_id = state
        .orchestrator
        .from_store(&name, &req.cid, req.params)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::ACCEPTED, Json(JobSubmitResponse { job_id })))
}

/// GET /jobs/{job_id}
async fn get_job(
    Path(job_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<TransferJob>, (StatusCode, Json<ErrorResponse>)> {
    let job = state
        .orchestrator
        .get_job(job_id)
        .await
        .map_err(error_response)?;

    Ok(Json(job))
}

/// Cancellation outcome. `success: false` means the job had already
/// reached a terminal state.
#[derive(Debug, Serialize)]
struct CancelResponse {
    success: bool,
}

/// POST /jobs/{job_id}/cancel
async fn cancel_job(
    Path(job_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<CancelResponse>, (StatusCode, Json<ErrorResponse>)> {
    let success = state
        .orchestrator
        .cancel(job_id)
        .await
        .map_err(error_response)?;

    Ok(Json(CancelResponse { success }))
}

/// GET /backends/{name}/status
async fn backend_status(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<BackendStatus>, (StatusCode, Json<ErrorResponse>)> {
    // 404 for names that were never configured; the cache alone cannot
    // tell "unknown backend" apart from "not probed yet".
    state.registry.get(&name).await.map_err(error_response)?;

    Ok(Json(state.prober.get_cached(&name)))
}

pub fn transfer_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/backends/{name}/to_store", post(to_store))
        .route("/backends/{name}/from_store", post(from_store))
        .route("/backends/{name}/status", get(backend_status))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/cancel", post(cancel_job))
}
