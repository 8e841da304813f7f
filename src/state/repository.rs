/// Repository layer: typed database queries for cidgate.
///
/// All queries use sqlx runtime-checked queries (not compile-time checked)
/// to avoid requiring a live database during development builds.
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::models::*;
use crate::error::Result;

// ── Backends ──

pub async fn upsert_backend(
    pool: &SqlitePool,
    name: &str,
    kind: &str,
    fields_json: &str,
    now: DateTime<Utc>,
) -> Result<BackendRow> {
    let row = sqlx::query_as::<_, BackendRow>(
        r#"
        INSERT INTO backends (name, kind, fields, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $4)
        ON CONFLICT (name)
        DO UPDATE SET kind = $2, fields = $3, updated_at = $4
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(kind)
    .bind(fields_json)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

pub async fn get_backend(pool: &SqlitePool, name: &str) -> Result<Option<BackendRow>> {
    let row = sqlx::query_as::<_, BackendRow>("SELECT * FROM backends WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

pub async fn list_backends(pool: &SqlitePool) -> Result<Vec<BackendRow>> {
    let rows = sqlx::query_as::<_, BackendRow>("SELECT * FROM backends ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

// ── Transfer jobs ──

pub async fn insert_job(pool: &SqlitePool, job: &TransferJobRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO transfer_jobs
        (id, backend_name, direction, object_ref, fingerprint, state, attempts,
         last_error, result_ref, params, created_at, started_at, finished_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(&job.id)
    .bind(&job.backend_name)
    .bind(&job.direction)
    .bind(&job.object_ref)
    .bind(&job.fingerprint)
    .bind(&job.state)
    .bind(job.attempts)
    .bind(&job.last_error)
    .bind(&job.result_ref)
    .bind(&job.params)
    .bind(job.created_at)
    .bind(job.started_at)
    .bind(job.finished_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn update_job(pool: &SqlitePool, job: &TransferJobRow) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE transfer_jobs
        SET state = $2, attempts = $3, last_error = $4, result_ref = $5,
            started_at = $6, finished_at = $7
        WHERE id = $1
        "#,
    )
    .bind(&job.id)
    .bind(&job.state)
    .bind(job.attempts)
    .bind(&job.last_error)
    .bind(&job.result_ref)
    .bind(job.started_at)
    .bind(job.finished_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_job(pool: &SqlitePool, id: &str) -> Result<Option<TransferJobRow>> {
    let row = sqlx::query_as::<_, TransferJobRow>("SELECT * FROM transfer_jobs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

/// Evict terminal jobs beyond the newest `keep`, oldest first. In-flight
/// jobs are never evicted regardless of age.
pub async fn prune_jobs(pool: &SqlitePool, keep: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM transfer_jobs
        WHERE state IN ('succeeded', 'failed')
          AND id NOT IN (
            SELECT id FROM transfer_jobs ORDER BY created_at DESC LIMIT $1
          )
        "#,
    )
    .bind(keep)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
