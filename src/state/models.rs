/// Database rows for cidgate.
///
/// These structs map directly to SQLite tables via sqlx. Enum-ish columns
/// (backend kind, job direction and state) are stored as their canonical
/// strings and parsed back at the owning module's boundary, which keeps the
/// storage layer free of domain invariants.
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// A configured backend instance. `fields` is the JSON-encoded field map,
/// secrets included; masking happens on read in the registry.
#[derive(Debug, Clone, FromRow)]
pub struct BackendRow {
    pub name: String,
    pub kind: String,
    pub fields: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A transfer job record. `params` is the JSON-encoded parameter map.
#[derive(Debug, Clone, FromRow)]
pub struct TransferJobRow {
    pub id: String,
    pub backend_name: String,
    pub direction: String,
    pub object_ref: String,
    pub fingerprint: String,
    pub state: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub result_ref: Option<String>,
    pub params: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
