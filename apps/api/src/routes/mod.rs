pub mod health;
pub mod meta;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::auth::handle_me;
use crate::crm::handlers as crm;
use crate::decisions::handlers as decisions;
use crate::personas::handlers as personas;
use crate::session::handlers as sessions;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/models", get(meta::handle_list_models))
        .route("/api/v1/me", get(handle_me))
        // Personas
        .route("/api/v1/personas", get(personas::handle_list_personas))
        .route(
            "/api/v1/personas/:id",
            get(personas::handle_get_persona).put(personas::handle_update_persona),
        )
        // Sessions
        .route(
            "/api/v1/sessions",
            get(sessions::handle_list_sessions).post(sessions::handle_create_session),
        )
        .route(
            "/api/v1/sessions/:id",
            get(sessions::handle_get_session).delete(sessions::handle_delete_session),
        )
        .route("/api/v1/sessions/:id/turn", post(sessions::handle_turn))
        .route("/api/v1/sessions/:id/advance", post(sessions::handle_advance))
        .route("/api/v1/sessions/:id/signal", post(sessions::handle_signal))
        .route("/api/v1/sessions/:id/provoke", post(sessions::handle_provoke))
        .route("/api/v1/sessions/:id/defer", post(sessions::handle_defer))
        .route("/api/v1/sessions/:id/end", post(sessions::handle_end))
        .route("/api/v1/sessions/:id/summary", post(sessions::handle_summary))
        // Decisions
        .route(
            "/api/v1/decisions",
            get(decisions::handle_list_decisions).post(decisions::handle_create_decision),
        )
        .route(
            "/api/v1/decisions/:id",
            get(decisions::handle_get_decision).delete(decisions::handle_delete_decision),
        )
        .route(
            "/api/v1/decisions/:id/status",
            patch(decisions::handle_update_status),
        )
        .route(
            "/api/v1/decisions/:id/outcome",
            post(decisions::handle_record_outcome),
        )
        // CRM
        .route(
            "/api/v1/projects",
            get(crm::handle_list_projects).post(crm::handle_create_project),
        )
        .route(
            "/api/v1/projects/:id",
            get(crm::handle_get_project)
                .put(crm::handle_update_project)
                .delete(crm::handle_delete_project),
        )
        .route(
            "/api/v1/north-star",
            get(crm::handle_get_north_star).put(crm::handle_put_north_star),
        )
        .with_state(state)
}
