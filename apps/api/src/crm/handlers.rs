use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::crm::models::{NorthStar, NorthStarInput, Project, ProjectInput};
use crate::crm::store;
use crate::errors::AppError;
use crate::events::{ChangeOp, Collection};
use crate::state::AppState;

/// GET /api/v1/projects
pub async fn handle_list_projects(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Project>>, AppError> {
    Ok(Json(store::list_projects(&state.db, user.owner_id).await?))
}

/// POST /api/v1/projects
pub async fn handle_create_project(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<ProjectInput>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    let project = Project::new(user.owner_id, input, Utc::now())?;
    store::insert_project(&state.db, &project).await?;
    state
        .events
        .publish(user.owner_id, Collection::Projects, project.id, ChangeOp::Created)
        .await;
    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /api/v1/projects/:id
pub async fn handle_get_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Project>, AppError> {
    Ok(Json(store::get_project(&state.db, user.owner_id, id).await?))
}

/// PUT /api/v1/projects/:id
pub async fn handle_update_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(input): Json<ProjectInput>,
) -> Result<Json<Project>, AppError> {
    let mut project = store::get_project(&state.db, user.owner_id, id).await?;
    project.apply(input, Utc::now())?;
    store::update_project(&state.db, &project).await?;
    state
        .events
        .publish(user.owner_id, Collection::Projects, id, ChangeOp::Updated)
        .await;
    Ok(Json(project))
}

/// DELETE /api/v1/projects/:id
pub async fn handle_delete_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    store::delete_project(&state.db, user.owner_id, id).await?;
    state
        .events
        .publish(user.owner_id, Collection::Projects, id, ChangeOp::Deleted)
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/north-star
pub async fn handle_get_north_star(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<NorthStar>, AppError> {
    store::get_north_star(&state.db, user.owner_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No north star set".to_string()))
}

/// PUT /api/v1/north-star
pub async fn handle_put_north_star(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<NorthStarInput>,
) -> Result<Json<NorthStar>, AppError> {
    let north_star = store::upsert_north_star(&state.db, user.owner_id, input, Utc::now()).await?;
    state
        .events
        .publish(user.owner_id, Collection::NorthStar, user.owner_id, ChangeOp::Updated)
        .await;
    Ok(Json(north_star))
}
