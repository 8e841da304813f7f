/// Backend registry: the durable catalog of configured backend instances.
///
/// The registry exclusively owns `BackendDefinition` records. All mutation
/// goes through `create_or_update`, which validates against the type's
/// schema and persists atomically under a per-name lock; reads are
/// lock-free and concurrent. Every read path masks secret fields — raw
/// fields are available only inside the crate, for adapter construction.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{GatewayError, Result};
use crate::schema::{self, BackendKind, FieldError, TypeDescriptor};
use crate::state::models::BackendRow;
use crate::state::{repository, Database};

/// A configured backend instance.
#[derive(Debug, Clone, Serialize)]
pub struct BackendDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BackendKind,
    pub fields: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackendDefinition {
    /// Copy of this definition with secret fields masked.
    pub fn masked(&self) -> Self {
        Self {
            fields: schema::mask_fields(self.kind, &self.fields),
            ..self.clone()
        }
    }

    fn from_row(row: BackendRow) -> Result<Self> {
        let kind = BackendKind::parse(&row.kind)
            .ok_or_else(|| GatewayError::Serialization(format!("stored backend `{}` has unknown type `{}`", row.name, row.kind)))?;
        let fields: BTreeMap<String, String> = serde_json::from_str(&row.fields)
            .map_err(|e| GatewayError::Serialization(format!("stored backend fields: {e}")))?;

        Ok(Self {
            name: row.name,
            kind,
            fields,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct BackendRegistry {
    db: Database,
    // Serializes validate+persist per name; unrelated names proceed in parallel.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl BackendRegistry {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn name_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("registry lock poisoned");
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Validate and persist a backend definition. Returns the stored
    /// definition with secrets masked. In-flight transfer jobs are
    /// unaffected: they hold a snapshot taken at submit time.
    pub async fn create_or_update(
        &self,
        name: &str,
        kind: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<BackendDefinition> {
        if name.trim().is_empty() || name.contains('/') {
            return Err(GatewayError::Validation(vec![FieldError::invalid(
                "name",
                "backend name must be non-empty and must not contain `/`",
            )]));
        }

        let kind = BackendKind::parse(kind)
            .ok_or_else(|| GatewayError::UnknownBackendType(kind.to_string()))?;

        let lock = self.name_lock(name);
        let _guard = lock.lock().await;

        let mut fields = fields;
        schema::apply_defaults(kind, &mut fields);
        schema::validate(kind, &fields).map_err(GatewayError::Validation)?;

        let fields_json = serde_json::to_string(&fields)
            .map_err(|e| GatewayError::Serialization(e.to_string()))?;
        let row =
            repository::upsert_backend(self.db.pool(), name, kind.as_str(), &fields_json, Utc::now())
                .await?;

        info!(backend = %name, kind = %kind, "backend definition stored");

        Ok(BackendDefinition::from_row(row)?.masked())
    }

    /// Fetch a definition with secrets masked.
    pub async fn get(&self, name: &str) -> Result<BackendDefinition> {
        Ok(self.get_raw(name).await?.masked())
    }

    /// Fetch a definition with raw field values. Crate-internal: used to
    /// construct adapters, never to answer API reads.
    pub(crate) async fn get_raw(&self, name: &str) -> Result<BackendDefinition> {
        match repository::get_backend(self.db.pool(), name).await? {
            Some(row) => BackendDefinition::from_row(row),
            None => Err(GatewayError::BackendNotFound(name.to_string())),
        }
    }

    /// All definitions, masked, ordered by name.
    pub async fn list(&self) -> Result<Vec<BackendDefinition>> {
        let rows = repository::list_backends(self.db.pool()).await?;
        rows.into_iter()
            .map(|row| Ok(BackendDefinition::from_row(row)?.masked()))
            .collect()
    }

    /// Static catalog of supported types and their schemas.
    pub fn list_types() -> Vec<TypeDescriptor> {
        schema::list_types()
    }
}
