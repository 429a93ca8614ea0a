use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decisions::models::{DecisionStatus, Outcome};
use crate::personas::{Cast, Persona};

/// The four H-O-L-D phases plus the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    /// Clarify the question, constraints and stakes.
    H,
    /// Oppose: the debate.
    O,
    /// Lock in a decision.
    L,
    /// Do: action and review date.
    D,
    Closed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::H => "H",
            Phase::O => "O",
            Phase::L => "L",
            Phase::D => "D",
            Phase::Closed => "CLOSED",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::H => "Clarify",
            Phase::O => "Debate",
            Phase::L => "Decide",
            Phase::D => "Act",
            Phase::Closed => "Closed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "H" => Ok(Phase::H),
            "O" => Ok(Phase::O),
            "L" => Ok(Phase::L),
            "D" => Ok(Phase::D),
            "CLOSED" => Ok(Phase::Closed),
            other => Err(format!("unknown phase '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// One counselor debating the moderator.
    Solo,
    /// Two counselors arguing against each other, moderated.
    Mesa,
    /// Review of an earlier decision, one counselor.
    Revision,
}

impl Mode {
    pub fn counselor_count(self) -> usize {
        match self {
            Mode::Mesa => 2,
            Mode::Solo | Mode::Revision => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Solo => "solo",
            Mode::Mesa => "mesa",
            Mode::Revision => "revision",
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "solo" => Ok(Mode::Solo),
            "mesa" => Ok(Mode::Mesa),
            "revision" => Ok(Mode::Revision),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    /// Persona id for assistant messages; `None` for the founder.
    pub speaker_id: Option<String>,
    pub speaker_name: String,
    pub content: String,
    /// Phase the message was appended in.
    pub phase: Phase,
    pub timestamp: DateTime<Utc>,
}

/// A message before it is appended.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub role: Role,
    pub speaker_id: Option<String>,
    pub speaker_name: String,
    pub content: String,
}

impl MessageDraft {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            speaker_id: None,
            speaker_name: "Founder".to_string(),
            content: content.into(),
        }
    }

    pub fn persona(persona: &Persona, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            speaker_id: Some(persona.id.clone()),
            speaker_name: persona.name.clone(),
            content: content.into(),
        }
    }
}

/// Facts the founder gave when opening the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    /// Present in revision mode only.
    #[serde(default)]
    pub revision: Option<RevisionContext>,
}

/// Snapshot of the decision a revision session reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionContext {
    pub decision_id: Uuid,
    pub decision: String,
    pub context: String,
    pub status: DecisionStatus,
    pub outcome: Option<Outcome>,
}

/// Output of the phase H extraction step. Read-only for phases O, L and D.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseHContext {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub stakes: String,
    #[serde(default)]
    pub facts: Vec<String>,
}

impl PhaseHContext {
    pub fn is_sufficient(&self) -> bool {
        !self.topic.trim().is_empty()
    }
}

/// Status of a decision captured in phase L. `revisited` only exists on persisted decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturedStatus {
    #[default]
    Pending,
    Taken,
}

impl From<CapturedStatus> for DecisionStatus {
    fn from(s: CapturedStatus) -> Self {
        match s {
            CapturedStatus::Pending => DecisionStatus::Pending,
            CapturedStatus::Taken => DecisionStatus::Taken,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedDecision {
    pub decision_text: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub status: CapturedStatus,
    #[serde(default)]
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub action: String,
    pub review_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveSource {
    User,
    Moderator,
}

/// No-objection turns in a row each counselor needs before the debate converges.
pub const CONVERGENCE_STREAK: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateState {
    pub max_rounds: u32,
    /// Explicit "move to decision" signal, if any.
    #[serde(default)]
    pub move_signal: Option<MoveSource>,
    /// Set once every counselor's last two turns reported no new objection.
    #[serde(default)]
    pub converged: bool,
    /// Consecutive no-objection turns per counselor id. An objection resets it.
    #[serde(default)]
    pub quiet_streaks: BTreeMap<String, u32>,
    /// Forces the moderator in at the next mesa slot.
    #[serde(default)]
    pub pending_provocation: bool,
}

impl DebateState {
    pub fn new(max_rounds: u32) -> Self {
        Self {
            max_rounds,
            move_signal: None,
            converged: false,
            quiet_streaks: BTreeMap::new(),
            pending_provocation: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Action and review date captured.
    Completed,
    /// Ended in phase D without an action.
    Incomplete,
    /// Explicit non-decision in phase L.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Closure {
    pub reason: CloseReason,
    pub closed_at: DateTime<Utc>,
}

/// A decision session. Mutated only through the operations in `session::machine`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub phase: Phase,
    pub mode: Mode,
    pub model: String,
    pub context: SessionContext,
    pub cast: Cast,
    pub messages: Vec<Message>,
    pub h_context: Option<PhaseHContext>,
    pub debate: DebateState,
    pub captured: Option<CapturedDecision>,
    pub action: Option<ActionPlan>,
    pub closure: Option<Closure>,
    /// Decision record derived at close.
    pub decision_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What kind of contribution the next speaker is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStep {
    Clarify,
    Review,
    Provoke,
    Reply,
    Checkpoint,
    Rebuttal,
    Decide,
    Act,
}

/// Ephemeral: derived from the transcript, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeakingTurn {
    pub speaker_persona_id: String,
    /// Index of this turn among the assistant turns of the current phase.
    pub turn_index: usize,
    pub phase_step: PhaseStep,
    /// Mesa rebuttals answer this message.
    pub responds_to: Option<Uuid>,
}
