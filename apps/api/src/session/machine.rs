//! Session State Machine: the only place a session's phase changes.
//!
//! ```text
//! H ──(H context + clarifying exchange)──▶ O
//! O ──(round cap | move signal | convergence)──▶ L
//! L ──(captured decision)──▶ D          L ──(defer)──▶ Closed
//! D ──(action + review date | explicit end)──▶ Closed
//! ```
//!
//! Transitions are strictly forward. Every operation here is pure: callers pass
//! the clock in, nothing touches the network or the database.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::decisions::models::Decision;
use crate::personas::{Cast, PersonaRole};
use crate::session::models::{
    ActionPlan, CapturedDecision, CapturedStatus, CloseReason, Closure, DebateState, Message,
    MessageDraft, Mode, MoveSource, Phase, PhaseHContext, Role, Session, SessionContext,
    CONVERGENCE_STREAK,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("session is closed")]
    SessionClosed,

    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition { from: Phase, to: Phase },

    #[error("operation requires phase {expected}, session is in {actual}")]
    WrongPhase { expected: Phase, actual: Phase },

    #[error("insufficient context to leave phase H: {0}")]
    InsufficientContext(String),

    #[error("debate still open ({rounds}/{max} rounds) and no move-to-decision signal")]
    DebateNotFinished { rounds: u32, max: u32 },

    #[error("no decision captured in phase L")]
    NoDecisionCaptured,

    #[error("{0} cannot be empty")]
    EmptyField(&'static str),

    #[error("invalid session setup: {0}")]
    InvalidSetup(String),
}

/// Everything needed to open a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub owner_id: Uuid,
    pub mode: Mode,
    pub model: String,
    pub context: SessionContext,
    pub cast: Cast,
    pub max_rounds: u32,
}

impl Session {
    pub fn new(params: NewSession, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        let NewSession {
            owner_id,
            mode,
            model,
            context,
            cast,
            max_rounds,
        } = params;

        if cast.moderator.role != PersonaRole::Moderator {
            return Err(TransitionError::InvalidSetup(format!(
                "{} is not a moderator",
                cast.moderator.id
            )));
        }
        if cast.counselors.len() != mode.counselor_count() {
            return Err(TransitionError::InvalidSetup(format!(
                "{} mode takes {} counselor(s), cast has {}",
                mode.as_str(),
                mode.counselor_count(),
                cast.counselors.len()
            )));
        }
        if mode == Mode::Revision && context.revision.is_none() {
            return Err(TransitionError::InvalidSetup(
                "revision mode needs the decision under review".to_string(),
            ));
        }
        if mode != Mode::Revision && context.revision.is_some() {
            return Err(TransitionError::InvalidSetup(
                "only revision mode reviews a past decision".to_string(),
            ));
        }
        if max_rounds == 0 {
            return Err(TransitionError::InvalidSetup(
                "max_rounds must be at least 1".to_string(),
            ));
        }

        Ok(Session {
            id: Uuid::new_v4(),
            owner_id,
            phase: Phase::H,
            mode,
            model,
            context,
            cast,
            messages: Vec::new(),
            h_context: None,
            debate: DebateState::new(max_rounds),
            captured: None,
            action: None,
            closure: None,
            decision_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Appends to the transcript. Timestamps never go backwards: a clock reading
    /// older than the last message is clamped to it.
    pub fn append_message(
        &mut self,
        draft: MessageDraft,
        now: DateTime<Utc>,
    ) -> Result<&Message, TransitionError> {
        if self.is_closed() {
            return Err(TransitionError::SessionClosed);
        }
        if draft.content.trim().is_empty() {
            return Err(TransitionError::EmptyField("message content"));
        }

        let timestamp = match self.messages.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        if self.phase == Phase::O
            && draft.speaker_id.as_deref() == Some(self.cast.moderator.id.as_str())
        {
            self.debate.pending_provocation = false;
        }

        self.messages.push(Message {
            id: Uuid::new_v4(),
            role: draft.role,
            speaker_id: draft.speaker_id,
            speaker_name: draft.speaker_name,
            content: draft.content,
            phase: self.phase,
            timestamp,
        });
        self.updated_at = timestamp;
        Ok(&self.messages[self.messages.len() - 1])
    }

    /// At least one founder message and one assistant message in phase H.
    pub fn has_clarifying_exchange(&self) -> bool {
        let in_h = self.messages.iter().filter(|m| m.phase == Phase::H);
        let (mut user, mut assistant) = (false, false);
        for m in in_h {
            match m.role {
                Role::User => user = true,
                Role::Assistant => assistant = true,
            }
        }
        user && assistant
    }

    pub fn capture_h_context(&mut self, ctx: PhaseHContext) -> Result<(), TransitionError> {
        self.expect_phase(Phase::H)?;
        if !ctx.is_sufficient() {
            return Err(TransitionError::InsufficientContext(
                "no topic could be extracted".to_string(),
            ));
        }
        self.h_context = Some(ctx);
        Ok(())
    }

    pub fn advance_to_debate(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.expect_transition(Phase::H, Phase::O)?;
        if !self.has_clarifying_exchange() {
            return Err(TransitionError::InsufficientContext(
                "at least one clarifying exchange is required".to_string(),
            ));
        }
        match &self.h_context {
            Some(ctx) if ctx.is_sufficient() => {}
            _ => {
                return Err(TransitionError::InsufficientContext(
                    "phase H context has not been captured".to_string(),
                ))
            }
        }
        self.enter(Phase::O, now);
        Ok(())
    }

    pub fn signal_move_to_decision(&mut self, source: MoveSource) -> Result<(), TransitionError> {
        self.expect_phase(Phase::O)?;
        if self.debate.move_signal.is_none() {
            self.debate.move_signal = Some(source);
        }
        Ok(())
    }

    /// Records one counselor's view after its turn. The debate converges once
    /// every counselor has `CONVERGENCE_STREAK` no-objection turns in a row.
    /// Returns whether the debate is now converged.
    pub fn record_convergence(
        &mut self,
        counselor_id: &str,
        no_new_objection: bool,
    ) -> Result<bool, TransitionError> {
        self.expect_phase(Phase::O)?;
        if self.cast.counselor_index(counselor_id).is_none() {
            return Err(TransitionError::InvalidSetup(format!(
                "{counselor_id} is not a counselor in this session"
            )));
        }
        let streak = self
            .debate
            .quiet_streaks
            .entry(counselor_id.to_string())
            .or_insert(0);
        *streak = if no_new_objection { *streak + 1 } else { 0 };

        let streaks = &self.debate.quiet_streaks;
        if self
            .cast
            .counselors
            .iter()
            .all(|c| streaks.get(&c.id).is_some_and(|n| *n >= CONVERGENCE_STREAK))
        {
            self.debate.converged = true;
        }
        Ok(self.debate.converged)
    }

    pub fn request_provocation(&mut self) -> Result<(), TransitionError> {
        self.expect_phase(Phase::O)?;
        self.debate.pending_provocation = true;
        Ok(())
    }

    /// Solo and revision: one counselor turn is one round. Mesa: a pair of counselor turns.
    pub fn rounds_completed(&self) -> u32 {
        let counselor_turns = self
            .messages
            .iter()
            .filter(|m| m.phase == Phase::O && m.role == Role::Assistant)
            .filter(|m| {
                m.speaker_id
                    .as_deref()
                    .is_some_and(|id| self.cast.counselor_index(id).is_some())
            })
            .count() as u32;
        match self.mode {
            Mode::Mesa => counselor_turns / 2,
            Mode::Solo | Mode::Revision => counselor_turns,
        }
    }

    pub fn round_cap_reached(&self) -> bool {
        self.rounds_completed() >= self.debate.max_rounds
    }

    /// Forced liveness: once the cap is hit the debate is over, signal or not.
    /// Returns whether the session moved to L.
    pub fn enforce_round_cap(&mut self, now: DateTime<Utc>) -> bool {
        if self.phase == Phase::O && self.round_cap_reached() {
            info!(
                "Session {} hit the round cap ({}), moving to decision",
                self.id, self.debate.max_rounds
            );
            self.enter(Phase::L, now);
            return true;
        }
        false
    }

    pub fn advance_to_decision(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.expect_transition(Phase::O, Phase::L)?;
        if !(self.round_cap_reached() || self.debate.move_signal.is_some() || self.debate.converged)
        {
            return Err(TransitionError::DebateNotFinished {
                rounds: self.rounds_completed(),
                max: self.debate.max_rounds,
            });
        }
        self.enter(Phase::L, now);
        Ok(())
    }

    pub fn capture_decision(&mut self, decision: CapturedDecision) -> Result<(), TransitionError> {
        self.expect_phase(Phase::L)?;
        if decision.decision_text.trim().is_empty() {
            return Err(TransitionError::EmptyField("decision_text"));
        }
        self.captured = Some(decision);
        Ok(())
    }

    pub fn advance_to_action(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.expect_transition(Phase::L, Phase::D)?;
        if self.captured.is_none() {
            return Err(TransitionError::NoDecisionCaptured);
        }
        self.enter(Phase::D, now);
        Ok(())
    }

    /// Explicit non-decision: skips D and closes with a pending decision.
    pub fn defer(&mut self, reason: Option<String>, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.expect_transition(Phase::L, Phase::Closed)?;
        let topic = self.topic();
        let reasoning = reason.unwrap_or_else(|| "Deferred by the founder".to_string());
        let captured = match self.captured.take() {
            Some(mut d) => {
                d.status = CapturedStatus::Pending;
                if d.reasoning.is_empty() {
                    d.reasoning = reasoning;
                }
                d
            }
            None => CapturedDecision {
                decision_text: format!("Deferred: {topic}"),
                reasoning,
                status: CapturedStatus::Pending,
                context: topic,
            },
        };
        self.captured = Some(captured);
        self.finish(CloseReason::Deferred, now);
        Ok(())
    }

    pub fn capture_action(
        &mut self,
        action: String,
        review_date: NaiveDate,
    ) -> Result<(), TransitionError> {
        self.expect_phase(Phase::D)?;
        if action.trim().is_empty() {
            return Err(TransitionError::EmptyField("action"));
        }
        self.action = Some(ActionPlan {
            action,
            review_date,
        });
        Ok(())
    }

    /// Closes from D. Without an action the session still closes, flagged incomplete.
    pub fn close(&mut self, now: DateTime<Utc>) -> Result<CloseReason, TransitionError> {
        self.expect_transition(Phase::D, Phase::Closed)?;
        let reason = if self.action.is_some() {
            CloseReason::Completed
        } else {
            warn!("Session {} closed without an action plan", self.id);
            CloseReason::Incomplete
        };
        self.finish(reason, now);
        Ok(reason)
    }

    /// The persisted decision record for a closed session.
    pub fn to_decision(&self, now: DateTime<Utc>) -> Result<Decision, TransitionError> {
        if !self.is_closed() {
            return Err(TransitionError::WrongPhase {
                expected: Phase::Closed,
                actual: self.phase,
            });
        }
        let captured = self
            .captured
            .as_ref()
            .ok_or(TransitionError::NoDecisionCaptured)?;

        let mut context = captured.context.clone();
        if !captured.reasoning.is_empty() {
            if !context.is_empty() {
                context.push_str("\n\n");
            }
            context.push_str(&captured.reasoning);
        }

        Ok(Decision {
            id: Uuid::new_v4(),
            owner_id: self.owner_id,
            decision: captured.decision_text.clone(),
            context,
            status: captured.status.into(),
            outcome: None,
            meeting_id: Some(self.id),
            personas: self.cast.names(),
            project_id: self.context.project_id,
            action: self.action.as_ref().map(|a| a.action.clone()),
            review_date: self.action.as_ref().map(|a| a.review_date),
            revises: self.context.revision.as_ref().map(|r| r.decision_id),
            created_at: now,
            updated_at: now,
        })
    }

    /// Best topic available: extracted H context first, then what the founder typed.
    pub fn topic(&self) -> String {
        self.h_context
            .as_ref()
            .map(|c| c.topic.clone())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.context.topic.clone())
    }

    fn finish(&mut self, reason: CloseReason, now: DateTime<Utc>) {
        self.closure = Some(Closure {
            reason,
            closed_at: now,
        });
        self.enter(Phase::Closed, now);
    }

    fn enter(&mut self, to: Phase, now: DateTime<Utc>) {
        info!("Session {} phase {} -> {}", self.id, self.phase, to);
        self.phase = to;
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    fn expect_phase(&self, expected: Phase) -> Result<(), TransitionError> {
        if self.is_closed() {
            return Err(TransitionError::SessionClosed);
        }
        if self.phase != expected {
            return Err(TransitionError::WrongPhase {
                expected,
                actual: self.phase,
            });
        }
        Ok(())
    }

    fn expect_transition(&self, from: Phase, to: Phase) -> Result<(), TransitionError> {
        if self.is_closed() {
            return Err(TransitionError::SessionClosed);
        }
        if self.phase != from {
            return Err(TransitionError::IllegalTransition {
                from: self.phase,
                to,
            });
        }
        Ok(())
    }
}
