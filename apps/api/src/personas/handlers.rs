use axum::{
    extract::{Path, State},
    Json,
};

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::personas::Persona;
use crate::state::AppState;

/// GET /api/v1/personas
pub async fn handle_list_personas(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Json<Vec<Persona>> {
    Json(state.personas.list().await)
}

/// GET /api/v1/personas/:id
pub async fn handle_get_persona(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Persona>, AppError> {
    state
        .personas
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Persona {id} not found")))
}

/// PUT /api/v1/personas/:id
/// Sessions already open keep the persona they were created with.
pub async fn handle_update_persona(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
    Json(persona): Json<Persona>,
) -> Result<Json<Persona>, AppError> {
    let updated = state.personas.update(&id, persona).await?;
    Ok(Json(updated))
}
