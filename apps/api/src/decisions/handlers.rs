use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::decisions::models::{Decision, DecisionStatus, Outcome};
use crate::decisions::pipeline::{record_outcome, transition_kanban};
use crate::decisions::store::{self, DecisionFilter};
use crate::errors::AppError;
use crate::events::{ChangeOp, Collection};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DecisionListQuery {
    pub project_id: Option<Uuid>,
    pub status: Option<DecisionStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDecisionRequest {
    pub decision: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub status: Option<DecisionStatus>,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub personas: Vec<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub review_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: DecisionStatus,
}

#[derive(Debug, Deserialize)]
pub struct OutcomeRequest {
    pub outcome: Outcome,
}

/// GET /api/v1/decisions
pub async fn handle_list_decisions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<DecisionListQuery>,
) -> Result<Json<Vec<Decision>>, AppError> {
    let filter = DecisionFilter {
        project_id: q.project_id,
        status: q.status,
    };
    Ok(Json(store::list_by_owner(&state.db, user.owner_id, filter).await?))
}

/// GET /api/v1/decisions/:id
pub async fn handle_get_decision(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Decision>, AppError> {
    Ok(Json(store::get(&state.db, user.owner_id, id).await?))
}

/// POST /api/v1/decisions
/// Manual entry outside a session. Starts as pending or taken.
pub async fn handle_create_decision(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateDecisionRequest>,
) -> Result<(StatusCode, Json<Decision>), AppError> {
    let decision = new_decision(user.owner_id, req)?;
    store::insert(&state.db, &decision).await?;
    state
        .events
        .publish(user.owner_id, Collection::Decisions, decision.id, ChangeOp::Created)
        .await;
    Ok((StatusCode::CREATED, Json(decision)))
}

fn new_decision(owner_id: Uuid, req: CreateDecisionRequest) -> Result<Decision, AppError> {
    if req.decision.trim().is_empty() {
        return Err(AppError::Validation("decision cannot be empty".to_string()));
    }
    let status = req.status.unwrap_or(DecisionStatus::Pending);
    if status == DecisionStatus::Revisited {
        return Err(AppError::Validation(
            "a new decision cannot start as revisited".to_string(),
        ));
    }
    if req.action.is_some() != req.review_date.is_some() {
        return Err(AppError::Validation(
            "action and review_date must be given together".to_string(),
        ));
    }

    let now = Utc::now();
    Ok(Decision {
        id: Uuid::new_v4(),
        owner_id,
        decision: req.decision.trim().to_string(),
        context: req.context,
        status,
        outcome: None,
        meeting_id: None,
        personas: req.personas,
        project_id: req.project_id,
        action: req.action,
        review_date: req.review_date,
        revises: None,
        created_at: now,
        updated_at: now,
    })
}

/// PATCH /api/v1/decisions/:id/status
pub async fn handle_update_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdate>,
) -> Result<Json<Decision>, AppError> {
    let mut decision = store::get(&state.db, user.owner_id, id).await?;
    let previous = decision.status;
    transition_kanban(&mut decision, req.status, Utc::now())?;
    store::save_status(&state.db, &decision, previous).await?;
    state
        .events
        .publish(user.owner_id, Collection::Decisions, id, ChangeOp::Updated)
        .await;
    Ok(Json(decision))
}

/// POST /api/v1/decisions/:id/outcome
pub async fn handle_record_outcome(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<OutcomeRequest>,
) -> Result<Json<Decision>, AppError> {
    let mut decision = store::get(&state.db, user.owner_id, id).await?;
    let previous = decision.status;
    record_outcome(&mut decision, req.outcome, Utc::now())?;
    store::save_status(&state.db, &decision, previous).await?;
    state
        .events
        .publish(user.owner_id, Collection::Decisions, id, ChangeOp::Updated)
        .await;
    Ok(Json(decision))
}

/// DELETE /api/v1/decisions/:id
pub async fn handle_delete_decision(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !store::delete(&state.db, user.owner_id, id).await? {
        return Err(AppError::NotFound(format!("Decision {id} not found")));
    }
    state
        .events
        .publish(user.owner_id, Collection::Decisions, id, ChangeOp::Deleted)
        .await;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(decision: &str) -> CreateDecisionRequest {
        CreateDecisionRequest {
            decision: decision.to_string(),
            context: String::new(),
            status: None,
            project_id: None,
            personas: vec![],
            action: None,
            review_date: None,
        }
    }

    #[test]
    fn test_new_decision_defaults_to_pending() {
        let d = new_decision(Uuid::new_v4(), request("  Hire a designer ")).unwrap();
        assert_eq!(d.status, DecisionStatus::Pending);
        assert_eq!(d.decision, "Hire a designer");
        assert!(d.invariant_holds());
    }

    #[test]
    fn test_new_decision_cannot_start_revisited() {
        let mut req = request("x");
        req.status = Some(DecisionStatus::Revisited);
        assert!(matches!(
            new_decision(Uuid::new_v4(), req),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_new_decision_rejects_blank_text_and_half_plans() {
        assert!(new_decision(Uuid::new_v4(), request(" ")).is_err());
        let mut req = request("Ship v2");
        req.action = Some("Write the launch post".to_string());
        assert!(new_decision(Uuid::new_v4(), req).is_err());
    }
}
