use sqlx::{PgExecutor, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::decisions::models::{Decision, DecisionStatus};
use crate::errors::AppError;
use crate::models::decision::DecisionRow;

#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionFilter {
    pub project_id: Option<Uuid>,
    pub status: Option<DecisionStatus>,
}

fn into_decision(row: DecisionRow) -> Result<Decision, AppError> {
    Ok(Decision::try_from(row)?)
}

pub async fn insert<'e, E: PgExecutor<'e>>(executor: E, d: &Decision) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO decisions
            (id, owner_id, decision, context, status, outcome, meeting_id, personas,
             project_id, action, review_date, revises, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(d.id)
    .bind(d.owner_id)
    .bind(&d.decision)
    .bind(&d.context)
    .bind(d.status.as_str())
    .bind(d.outcome.map(|o| o.as_str()))
    .bind(d.meeting_id)
    .bind(&d.personas)
    .bind(d.project_id)
    .bind(&d.action)
    .bind(d.review_date)
    .bind(d.revises)
    .bind(d.created_at)
    .bind(d.updated_at)
    .execute(executor)
    .await?;

    info!("Recorded decision {} for owner {}", d.id, d.owner_id);
    Ok(())
}

pub async fn get(pool: &PgPool, owner_id: Uuid, id: Uuid) -> Result<Decision, AppError> {
    let row: Option<DecisionRow> =
        sqlx::query_as("SELECT * FROM decisions WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .fetch_optional(pool)
            .await?;
    let row = row.ok_or_else(|| AppError::NotFound(format!("Decision {id} not found")))?;
    into_decision(row)
}

/// Most recent first.
pub async fn list_by_owner(
    pool: &PgPool,
    owner_id: Uuid,
    filter: DecisionFilter,
) -> Result<Vec<Decision>, AppError> {
    let rows = sqlx::query_as::<_, DecisionRow>(
        r#"
        SELECT * FROM decisions
        WHERE owner_id = $1
          AND ($2::uuid IS NULL OR project_id = $2)
          AND ($3::text IS NULL OR status = $3)
        ORDER BY created_at DESC
        "#,
    )
    .bind(owner_id)
    .bind(filter.project_id)
    .bind(filter.status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(into_decision).collect()
}

/// Writes a status change made by the pipeline. The row must still be in
/// `expected`, so two concurrent changes cannot both apply.
pub async fn save_status(
    pool: &PgPool,
    d: &Decision,
    expected: DecisionStatus,
) -> Result<(), AppError> {
    let result = sqlx::query(
        r#"
        UPDATE decisions
        SET status = $3, outcome = $4, updated_at = $5
        WHERE id = $1 AND owner_id = $2 AND status = $6
        "#,
    )
    .bind(d.id)
    .bind(d.owner_id)
    .bind(d.status.as_str())
    .bind(d.outcome.map(|o| o.as_str()))
    .bind(d.updated_at)
    .bind(expected.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::InvalidTransition(format!(
            "decision {} is no longer {expected}",
            d.id
        )));
    }
    Ok(())
}

pub async fn delete(pool: &PgPool, owner_id: Uuid, id: Uuid) -> Result<bool, AppError> {
    let result = sqlx::query("DELETE FROM decisions WHERE id = $1 AND owner_id = $2")
        .bind(id)
        .bind(owner_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Leaves the owner's decisions in place when their project goes away.
pub async fn detach_project<'e, E: PgExecutor<'e>>(
    executor: E,
    owner_id: Uuid,
    project_id: Uuid,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        "UPDATE decisions SET project_id = NULL WHERE owner_id = $1 AND project_id = $2",
    )
    .bind(owner_id)
    .bind(project_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}
