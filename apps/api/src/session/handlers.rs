use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::crm::store::north_star_line;
use crate::decisions::models::Decision;
use crate::decisions::store as decision_store;
use crate::errors::AppError;
use crate::events::{ChangeOp, Collection};
use crate::llm_client::resolve_model;
use crate::models::session::SessionListRow;
use crate::session::archive::archive_transcript;
use crate::session::engine::{self, AdvanceRequest, MeetingSummary, TurnOutcome};
use crate::session::guard::TurnPermit;
use crate::session::machine::NewSession;
use crate::session::models::{
    Mode, MoveSource, Phase, RevisionContext, Session, SessionContext, SpeakingTurn,
};
use crate::session::store;
use crate::session::turns::{next_speaker, should_continue_debate};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub mode: Mode,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub model: Option<String>,
    /// Empty picks the roster's first counselors.
    #[serde(default)]
    pub counselor_ids: Vec<String>,
    /// Decision under review. Required in revision mode.
    #[serde(default)]
    pub revision_of: Option<Uuid>,
    /// Lowered to the configured cap if higher.
    #[serde(default)]
    pub max_rounds: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeferRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EndRequest {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub review_date: Option<NaiveDate>,
}

/// A session plus what the orchestrator derives from it.
#[derive(Debug, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub next_speaker: Option<SpeakingTurn>,
    pub rounds_completed: u32,
    pub should_continue_debate: bool,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        Self {
            next_speaker: next_speaker(&session),
            rounds_completed: session.rounds_completed(),
            should_continue_debate: should_continue_debate(&session),
            session,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    #[serde(flatten)]
    pub outcome: TurnOutcome,
    pub session: SessionView,
}

#[derive(Debug, Serialize)]
pub struct PhaseResponse {
    pub phase: Phase,
    /// Set when this request closed the session.
    pub decision: Option<Decision>,
    pub session: SessionView,
}

/// POST /api/v1/sessions
pub async fn handle_create_session(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let mut context = SessionContext {
        topic: req.topic.trim().to_string(),
        facts: req.facts,
        project_id: req.project_id,
        revision: None,
    };
    if let Some(decision_id) = req.revision_of {
        let reviewed = decision_store::get(&state.db, user.owner_id, decision_id).await?;
        if context.project_id.is_none() {
            context.project_id = reviewed.project_id;
        }
        if context.topic.is_empty() {
            context.topic = format!("Revision: {}", reviewed.decision);
        }
        context.revision = Some(RevisionContext {
            decision_id: reviewed.id,
            decision: reviewed.decision,
            context: reviewed.context,
            status: reviewed.status,
            outcome: reviewed.outcome,
        });
    }

    let cast = state.personas.cast(req.mode, &req.counselor_ids).await?;
    let model = resolve_model(req.model.as_deref(), &state.config.default_model).to_string();
    let max_rounds = req
        .max_rounds
        .map_or(state.config.max_debate_rounds, |r| {
            r.min(state.config.max_debate_rounds)
        });

    let session = Session::new(
        NewSession {
            owner_id: user.owner_id,
            mode: req.mode,
            model,
            context,
            cast,
            max_rounds,
        },
        Utc::now(),
    )?;
    store::insert(&state.db, &session).await?;
    state
        .events
        .publish(user.owner_id, Collection::Sessions, session.id, ChangeOp::Created)
        .await;

    Ok((StatusCode::CREATED, Json(session.into())))
}

/// GET /api/v1/sessions
pub async fn handle_list_sessions(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<SessionListRow>>, AppError> {
    Ok(Json(store::list_by_owner(&state.db, user.owner_id).await?))
}

/// GET /api/v1/sessions/:id
pub async fn handle_get_session(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let session = load(&state, user, id).await?;
    Ok(Json(session.into()))
}

/// DELETE /api/v1/sessions/:id
pub async fn handle_delete_session(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let _permit = state.turn_guard.acquire(id).await?;
    if !store::delete(&state.db, user.owner_id, id).await? {
        return Err(AppError::NotFound(format!("Session {id} not found")));
    }
    state
        .events
        .publish(user.owner_id, Collection::Sessions, id, ChangeOp::Deleted)
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/sessions/:id/turn
/// Runs the next speaker's turn, after the founder's message if one is sent.
pub async fn handle_turn(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, AppError> {
    let (permit, mut session) = open(&state, user, id).await?;
    let north_star = north_star_line(&state.db, user.owner_id).await?;

    let outcome = engine::run_turn(
        &mut session,
        state.llm.as_ref(),
        req.message,
        north_star.as_deref(),
        Utc::now(),
    )
    .await?;
    permit.ensure_held()?;
    store::save(&state.db, &session).await?;
    state
        .events
        .publish(user.owner_id, Collection::Sessions, id, ChangeOp::Updated)
        .await;

    Ok(Json(TurnResponse {
        outcome,
        session: session.into(),
    }))
}

/// POST /api/v1/sessions/:id/advance
pub async fn handle_advance(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<AdvanceRequest>,
) -> Result<Json<PhaseResponse>, AppError> {
    let (permit, mut session) = open(&state, user, id).await?;
    engine::advance(&mut session, state.llm.as_ref(), req, Utc::now()).await?;
    let response = commit(&state, &permit, session).await?;
    Ok(Json(response))
}

/// POST /api/v1/sessions/:id/signal
/// The founder's explicit "move to decision": ends the debate now.
pub async fn handle_signal(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PhaseResponse>, AppError> {
    let (permit, mut session) = open(&state, user, id).await?;
    session.signal_move_to_decision(MoveSource::User)?;
    session.advance_to_decision(Utc::now())?;
    let response = commit(&state, &permit, session).await?;
    Ok(Json(response))
}

/// POST /api/v1/sessions/:id/provoke
/// Mesa: pulls the moderator in at the next slot.
pub async fn handle_provoke(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PhaseResponse>, AppError> {
    let (permit, mut session) = open(&state, user, id).await?;
    session.request_provocation()?;
    let response = commit(&state, &permit, session).await?;
    Ok(Json(response))
}

/// POST /api/v1/sessions/:id/defer
pub async fn handle_defer(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<DeferRequest>,
) -> Result<Json<PhaseResponse>, AppError> {
    let (permit, mut session) = open(&state, user, id).await?;
    session.defer(req.reason, Utc::now())?;
    let response = commit(&state, &permit, session).await?;
    Ok(Json(response))
}

/// POST /api/v1/sessions/:id/end
/// Closes from phase D. Without an action the session is recorded as incomplete.
pub async fn handle_end(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<EndRequest>,
) -> Result<Json<PhaseResponse>, AppError> {
    let (permit, mut session) = open(&state, user, id).await?;
    engine::end_session(&mut session, req.action, req.review_date, Utc::now())?;
    let response = commit(&state, &permit, session).await?;
    Ok(Json(response))
}

/// POST /api/v1/sessions/:id/summary
pub async fn handle_summary(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MeetingSummary>, AppError> {
    let (_permit, session) = open(&state, user, id).await?;
    let north_star = north_star_line(&state.db, user.owner_id).await?;
    let summary = engine::summarize(&session, state.llm.as_ref(), north_star.as_deref()).await?;
    Ok(Json(summary))
}

async fn load(state: &AppState, user: AuthUser, id: Uuid) -> Result<Session, AppError> {
    store::load(
        &state.db,
        &state.personas,
        &state.document_defaults(),
        user.owner_id,
        id,
    )
    .await
}

/// Takes the session's in-flight permit, then loads it.
async fn open(
    state: &AppState,
    user: AuthUser,
    id: Uuid,
) -> Result<(TurnPermit, Session), AppError> {
    let permit = state.turn_guard.acquire(id).await?;
    let session = load(state, user, id).await?;
    Ok((permit, session))
}

/// Persists a session after a phase operation. A session that just closed gets
/// its decision recorded in the same transaction and its transcript archived.
async fn commit(
    state: &AppState,
    permit: &TurnPermit,
    mut session: Session,
) -> Result<PhaseResponse, AppError> {
    permit.ensure_held()?;
    let owner_id = session.owner_id;
    let decision = if session.is_closed() && session.decision_id.is_none() {
        let decision = session.to_decision(Utc::now())?;
        session.decision_id = Some(decision.id);

        let mut tx = state.db.begin().await?;
        decision_store::insert(&mut *tx, &decision).await?;
        store::save(&mut *tx, &session).await?;
        tx.commit().await?;

        state
            .events
            .publish(owner_id, Collection::Decisions, decision.id, ChangeOp::Created)
            .await;
        if let Err(e) = archive_transcript(&state.s3, &state.config.s3_bucket, &session).await {
            warn!("Failed to archive session {}: {e}", permit.session_id());
        }
        Some(decision)
    } else {
        store::save(&state.db, &session).await?;
        None
    };

    state
        .events
        .publish(owner_id, Collection::Sessions, session.id, ChangeOp::Updated)
        .await;
    Ok(PhaseResponse {
        phase: session.phase,
        decision,
        session: session.into(),
    })
}
