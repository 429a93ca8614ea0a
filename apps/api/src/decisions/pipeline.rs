//! Decision/Outcome Pipeline: turns AI prose into decisions and guards their lifecycle.
//!
//! Extraction never fails: malformed model output degrades to "no decisions".
//! Status changes follow pending → taken → revisited, and only `record_outcome`
//! may enter `revisited`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::decisions::models::{Decision, DecisionStatus, Outcome};
use crate::session::models::{CapturedDecision, CapturedStatus};

/// Upper bound on candidate JSON start positions tried in one text.
const MAX_PARSE_ATTEMPTS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KanbanError {
    #[error("illegal status transition {from} -> {to}")]
    IllegalStatus {
        from: DecisionStatus,
        to: DecisionStatus,
    },

    #[error("a decision is revisited by recording its outcome")]
    OutcomeRequired,

    #[error("outcome already recorded for this decision")]
    OutcomeAlreadyRecorded,

    #[error("outcome can only be recorded on a taken decision (status is {0})")]
    NotTaken(DecisionStatus),
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(alias = "decisionText", alias = "decision_text")]
    decision: String,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DecisionEnvelope {
    decisions: Vec<RawDecision>,
}

impl RawDecision {
    fn into_captured(self) -> Option<CapturedDecision> {
        let decision_text = self.decision.trim().to_string();
        if decision_text.is_empty() {
            return None;
        }
        let status = match self.status.as_deref().map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("taken") => CapturedStatus::Taken,
            _ => CapturedStatus::Pending,
        };
        Some(CapturedDecision {
            decision_text,
            reasoning: self.reasoning.unwrap_or_default(),
            status,
            context: self.context.unwrap_or_default(),
        })
    }
}

/// Parses the structured decision block out of free-form AI output.
///
/// Accepts a bare array, an array inside a ```json fence or surrounded by prose,
/// a `{"decisions": [...]}` envelope, or a single decision object.
pub fn extract_decisions(summary_text: &str) -> Vec<CapturedDecision> {
    let body = fenced_block(summary_text).unwrap_or(summary_text);

    let raw = parse_first::<Vec<RawDecision>>(body, '[')
        .or_else(|| parse_first::<DecisionEnvelope>(body, '{').map(|e| e.decisions))
        .or_else(|| parse_first::<RawDecision>(body, '{').map(|d| vec![d]));

    match raw {
        Some(items) => {
            let decisions: Vec<_> = items
                .into_iter()
                .filter_map(RawDecision::into_captured)
                .collect();
            debug!("Extracted {} decision(s)", decisions.len());
            decisions
        }
        None => {
            warn!("No parseable decision block in model output, treating as no decisions");
            Vec::new()
        }
    }
}

/// Prose before the first code fence; the whole text when there is none.
pub fn summary_prose(text: &str) -> &str {
    match text.find("```") {
        Some(i) => text[..i].trim(),
        None => text.trim(),
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    let end = after.find("```")?;
    Some(after[..end].trim())
}

/// Tries to deserialize a `T` starting at each occurrence of `open`, ignoring
/// anything after the first complete value.
fn parse_first<T: for<'de> Deserialize<'de>>(text: &str, open: char) -> Option<T> {
    text.match_indices(open)
        .take(MAX_PARSE_ATTEMPTS)
        .find_map(|(i, _)| {
            serde_json::Deserializer::from_str(&text[i..])
                .into_iter::<T>()
                .next()
                .and_then(Result::ok)
        })
}

/// Moves a decision along the kanban board. Entering `revisited` goes through `record_outcome`.
pub fn transition_kanban(
    decision: &mut Decision,
    new_status: DecisionStatus,
    now: DateTime<Utc>,
) -> Result<(), KanbanError> {
    match (decision.status, new_status) {
        (DecisionStatus::Pending, DecisionStatus::Taken) => {
            decision.status = DecisionStatus::Taken;
            decision.updated_at = now;
            Ok(())
        }
        (DecisionStatus::Taken, DecisionStatus::Revisited) => Err(KanbanError::OutcomeRequired),
        (from, to) => Err(KanbanError::IllegalStatus { from, to }),
    }
}

/// Records the outcome of a taken decision, moving it to `revisited`.
/// A second call on the same decision is always rejected.
pub fn record_outcome(
    decision: &mut Decision,
    outcome: Outcome,
    now: DateTime<Utc>,
) -> Result<(), KanbanError> {
    match decision.status {
        DecisionStatus::Taken => {
            decision.status = DecisionStatus::Revisited;
            decision.outcome = Some(outcome);
            decision.updated_at = now;
            Ok(())
        }
        DecisionStatus::Revisited => Err(KanbanError::OutcomeAlreadyRecorded),
        other => Err(KanbanError::NotTaken(other)),
    }
}
