//! Session persistence. One row per session: phase and mode as columns for
//! filtering, everything else in a versioned JSONB document.
//!
//! Reading fills every missing field explicitly, here and nowhere else.
//! Version 1 documents predate the persona snapshot and the debate block: they
//! get the roster's default cast, the configured round cap and the session's
//! current phase on each message. The next save writes them back as version 2.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm_client::resolve_model;
use crate::models::session::{SessionListRow, SessionRow};
use crate::personas::{Cast, PersonaRegistry};
use crate::session::models::{
    ActionPlan, CapturedDecision, Closure, DebateState, Message, Mode, Phase, PhaseHContext,
    Role, Session, SessionContext,
};

pub const SCHEMA_VERSION: i32 = 2;

/// Values used for fields an older document does not carry.
#[derive(Debug, Clone)]
pub struct DocumentDefaults {
    pub model: String,
    pub max_rounds: u32,
}

fn legacy_version() -> i32 {
    1
}

/// Version 1 stored the founder's context as free text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredContext {
    Structured(SessionContext),
    Text(String),
}

impl Default for StoredContext {
    fn default() -> Self {
        StoredContext::Structured(SessionContext::default())
    }
}

impl From<StoredContext> for SessionContext {
    fn from(stored: StoredContext) -> Self {
        match stored {
            StoredContext::Structured(ctx) => ctx,
            StoredContext::Text(text) => SessionContext {
                facts: if text.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![text]
                },
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub role: Role,
    #[serde(default)]
    pub speaker_id: Option<String>,
    #[serde(default, alias = "speakerName")]
    pub speaker_name: String,
    pub content: String,
    #[serde(default)]
    pub phase: Option<Phase>,
    pub timestamp: DateTime<Utc>,
}

impl From<&Message> for StoredMessage {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            role: m.role,
            speaker_id: m.speaker_id.clone(),
            speaker_name: m.speaker_name.clone(),
            content: m.content.clone(),
            phase: Some(m.phase),
            timestamp: m.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(default = "legacy_version")]
    pub schema_version: i32,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub context: StoredContext,
    #[serde(default)]
    pub cast: Option<Cast>,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    #[serde(default)]
    pub h_context: Option<PhaseHContext>,
    #[serde(default)]
    pub debate: Option<DebateState>,
    #[serde(default)]
    pub captured: Option<CapturedDecision>,
    #[serde(default)]
    pub action: Option<ActionPlan>,
    #[serde(default)]
    pub closure: Option<Closure>,
    #[serde(default)]
    pub decision_id: Option<Uuid>,
}

impl SessionDocument {
    pub fn from_session(s: &Session) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            model: Some(s.model.clone()),
            context: StoredContext::Structured(s.context.clone()),
            cast: Some(s.cast.clone()),
            messages: s.messages.iter().map(StoredMessage::from).collect(),
            h_context: s.h_context.clone(),
            debate: Some(s.debate.clone()),
            captured: s.captured.clone(),
            action: s.action.clone(),
            closure: s.closure.clone(),
            decision_id: s.decision_id,
        }
    }
}

/// Whether a stored document needs a cast from the roster to load.
pub fn needs_cast(row: &SessionRow) -> bool {
    row.document.get("cast").map_or(true, |c| c.is_null())
}

/// Builds a `Session` from its row, filling defaults and upgrading old documents.
/// `fallback_cast` is only used when the document carries none.
pub fn hydrate(
    row: SessionRow,
    fallback_cast: Option<Cast>,
    defaults: &DocumentDefaults,
) -> anyhow::Result<Session> {
    let phase: Phase = row.phase.parse().map_err(anyhow::Error::msg)?;
    let mode: Mode = row.mode.parse().map_err(anyhow::Error::msg)?;
    let doc: SessionDocument = serde_json::from_value(row.document)?;
    if doc.schema_version > SCHEMA_VERSION {
        anyhow::bail!(
            "session {} was written with schema v{}, this build reads up to v{SCHEMA_VERSION}",
            row.id,
            doc.schema_version
        );
    }

    let cast = doc
        .cast
        .or(fallback_cast)
        .ok_or_else(|| anyhow::anyhow!("session {} has no cast", row.id))?;
    let model = resolve_model(doc.model.as_deref(), &defaults.model).to_string();

    // Closed sessions take no messages, so unphased ones belong to D at the latest.
    let message_phase = match phase {
        Phase::Closed => Phase::D,
        p => p,
    };
    let messages = doc
        .messages
        .into_iter()
        .map(|m| {
            let speaker_id = match (m.role, m.speaker_id) {
                (_, Some(id)) => Some(id),
                (Role::User, None) => None,
                (Role::Assistant, None) => cast
                    .find_by_name(&m.speaker_name)
                    .map(|p| p.id.clone()),
            };
            Message {
                id: m.id,
                role: m.role,
                speaker_id,
                speaker_name: m.speaker_name,
                content: m.content,
                phase: m.phase.unwrap_or(message_phase),
                timestamp: m.timestamp,
            }
        })
        .collect();

    Ok(Session {
        id: row.id,
        owner_id: row.owner_id,
        phase,
        mode,
        model,
        context: doc.context.into(),
        cast,
        messages,
        h_context: doc.h_context,
        debate: doc
            .debate
            .unwrap_or_else(|| DebateState::new(defaults.max_rounds)),
        captured: doc.captured,
        action: doc.action,
        closure: doc.closure,
        decision_id: doc.decision_id,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn document_value(session: &Session) -> Result<serde_json::Value, AppError> {
    serde_json::to_value(SessionDocument::from_session(session))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize session: {e}")))
}

pub async fn insert(pool: &PgPool, session: &Session) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO sessions
            (id, owner_id, schema_version, phase, mode, document, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(session.id)
    .bind(session.owner_id)
    .bind(SCHEMA_VERSION)
    .bind(session.phase.as_str())
    .bind(session.mode.as_str())
    .bind(document_value(session)?)
    .bind(session.created_at)
    .bind(session.updated_at)
    .execute(pool)
    .await?;

    info!("Created session {} for owner {}", session.id, session.owner_id);
    Ok(())
}

pub async fn load(
    pool: &PgPool,
    personas: &PersonaRegistry,
    defaults: &DocumentDefaults,
    owner_id: Uuid,
    id: Uuid,
) -> Result<Session, AppError> {
    let row: Option<SessionRow> =
        sqlx::query_as("SELECT * FROM sessions WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .fetch_optional(pool)
            .await?;
    let row = row.ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))?;

    if row.schema_version < SCHEMA_VERSION {
        info!(
            "Upgrading session {id} document v{} -> v{SCHEMA_VERSION}",
            row.schema_version
        );
    }
    let fallback_cast = if needs_cast(&row) {
        let mode: Mode = row.mode.parse().map_err(AppError::Validation)?;
        Some(personas.cast(mode, &[]).await?)
    } else {
        None
    };

    Ok(hydrate(row, fallback_cast, defaults)?)
}

pub async fn save<'e, E: PgExecutor<'e>>(executor: E, session: &Session) -> Result<(), AppError> {
    let result = sqlx::query(
        r#"
        UPDATE sessions
        SET schema_version = $3, phase = $4, mode = $5, document = $6, updated_at = $7
        WHERE id = $1 AND owner_id = $2
        "#,
    )
    .bind(session.id)
    .bind(session.owner_id)
    .bind(SCHEMA_VERSION)
    .bind(session.phase.as_str())
    .bind(session.mode.as_str())
    .bind(document_value(session)?)
    .bind(session.updated_at)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Session {} not found", session.id)));
    }
    Ok(())
}

/// Most recently touched first.
pub async fn list_by_owner(pool: &PgPool, owner_id: Uuid) -> Result<Vec<SessionListRow>, AppError> {
    Ok(sqlx::query_as::<_, SessionListRow>(
        r#"
        SELECT id, phase, mode,
               COALESCE(document->'h_context'->>'topic', document->'context'->>'topic') AS topic,
               (document->>'decision_id')::uuid AS decision_id,
               created_at, updated_at
        FROM sessions
        WHERE owner_id = $1
        ORDER BY updated_at DESC
        "#,
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?)
}

/// Returns whether a row was deleted. Decisions derived from the session stay.
pub async fn delete(pool: &PgPool, owner_id: Uuid, id: Uuid) -> Result<bool, AppError> {
    let result = sqlx::query("DELETE FROM sessions WHERE id = $1 AND owner_id = $2")
        .bind(id)
        .bind(owner_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
