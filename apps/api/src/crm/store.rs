use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::crm::models::{NorthStar, NorthStarInput, Project};
use crate::decisions::store::detach_project;
use crate::errors::AppError;
use crate::models::crm::{NorthStarRow, ProjectRow};

pub async fn insert_project(pool: &PgPool, p: &Project) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO projects
            (id, owner_id, name, stage, description, problem, audience, notes, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(p.id)
    .bind(p.owner_id)
    .bind(&p.name)
    .bind(p.stage.as_str())
    .bind(&p.description)
    .bind(&p.problem)
    .bind(&p.audience)
    .bind(&p.notes)
    .bind(p.created_at)
    .bind(p.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_project(pool: &PgPool, owner_id: Uuid, id: Uuid) -> Result<Project, AppError> {
    let row: Option<ProjectRow> =
        sqlx::query_as("SELECT * FROM projects WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .fetch_optional(pool)
            .await?;
    let row = row.ok_or_else(|| AppError::NotFound(format!("Project {id} not found")))?;
    Ok(Project::try_from(row)?)
}

/// Most recently updated first.
pub async fn list_projects(pool: &PgPool, owner_id: Uuid) -> Result<Vec<Project>, AppError> {
    let rows = sqlx::query_as::<_, ProjectRow>(
        "SELECT * FROM projects WHERE owner_id = $1 ORDER BY updated_at DESC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|r| Project::try_from(r).map_err(AppError::from))
        .collect()
}

pub async fn update_project(pool: &PgPool, p: &Project) -> Result<(), AppError> {
    let result = sqlx::query(
        r#"
        UPDATE projects
        SET name = $3, stage = $4, description = $5, problem = $6, audience = $7,
            notes = $8, updated_at = $9
        WHERE id = $1 AND owner_id = $2
        "#,
    )
    .bind(p.id)
    .bind(p.owner_id)
    .bind(&p.name)
    .bind(p.stage.as_str())
    .bind(&p.description)
    .bind(&p.problem)
    .bind(&p.audience)
    .bind(&p.notes)
    .bind(p.updated_at)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Project {} not found", p.id)));
    }
    Ok(())
}

/// Deletes a project and detaches, never deletes, the decisions filed under it.
pub async fn delete_project(pool: &PgPool, owner_id: Uuid, id: Uuid) -> Result<u64, AppError> {
    let mut tx = pool.begin().await?;
    let detached = detach_project(&mut *tx, owner_id, id).await?;
    let result = sqlx::query("DELETE FROM projects WHERE id = $1 AND owner_id = $2")
        .bind(id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Project {id} not found")));
    }
    tx.commit().await?;

    info!("Deleted project {id}, detached {detached} decision(s)");
    Ok(detached)
}

pub async fn get_north_star(pool: &PgPool, owner_id: Uuid) -> Result<Option<NorthStar>, AppError> {
    let row: Option<NorthStarRow> = sqlx::query_as("SELECT * FROM north_stars WHERE owner_id = $1")
        .bind(owner_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(NorthStar::from))
}

pub async fn upsert_north_star(
    pool: &PgPool,
    owner_id: Uuid,
    input: NorthStarInput,
    now: DateTime<Utc>,
) -> Result<NorthStar, AppError> {
    if input.statement.trim().is_empty() {
        return Err(AppError::Validation(
            "north star statement cannot be empty".to_string(),
        ));
    }
    let row: NorthStarRow = sqlx::query_as(
        r#"
        INSERT INTO north_stars (owner_id, statement, metric, horizon, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (owner_id) DO UPDATE
        SET statement = EXCLUDED.statement, metric = EXCLUDED.metric,
            horizon = EXCLUDED.horizon, updated_at = EXCLUDED.updated_at
        RETURNING *
        "#,
    )
    .bind(owner_id)
    .bind(input.statement.trim())
    .bind(input.metric.trim())
    .bind(input.horizon.trim())
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(row.into())
}

/// The owner's north star as a prompt line, if one is set.
pub async fn north_star_line(pool: &PgPool, owner_id: Uuid) -> Result<Option<String>, AppError> {
    Ok(get_north_star(pool, owner_id)
        .await?
        .map(|ns| ns.prompt_line()))
}
