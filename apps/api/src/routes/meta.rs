use axum::{extract::State, Json};
use serde::Serialize;

use crate::llm_client::ALLOWED_MODELS;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub default: String,
    pub models: Vec<&'static str>,
}

/// GET /api/v1/models
/// Model ids a session may ask for. Anything else falls back to `default`.
pub async fn handle_list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        default: state.config.default_model.clone(),
        models: ALLOWED_MODELS.to_vec(),
    })
}
