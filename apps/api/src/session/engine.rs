//! Session Engine: drives one session step at a time against a `TextGenerator`.
//!
//! Every step works on a draft copy of the session and commits it only after the
//! generator succeeded. A failed or abandoned call leaves the caller's session
//! exactly as it was, so the same step can simply be retried.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::decisions::pipeline::{extract_decisions, summary_prose};
use crate::errors::AppError;
use crate::llm_client::prompts::{CONVERGED_MARKER, MOVE_TO_DECISION_MARKER};
use crate::llm_client::{strip_json_fences, LlmError, TextGenerator};
use crate::session::machine::TransitionError;
use crate::session::models::{
    CapturedDecision, Message, MessageDraft, MoveSource, Phase, PhaseHContext, Session,
    SpeakingTurn,
};
use crate::session::prompts::{
    build_turn_prompt, decision_extraction_prompt, h_extraction_prompt, summary_prompt,
    TurnPrompt,
};
use crate::session::turns::{next_speaker, should_continue_debate};

/// Markers found in one reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Markers {
    pub converged: bool,
    pub move_to_decision: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub turn: SpeakingTurn,
    pub reply: Message,
    /// Founder message appended together with the reply, if one was sent.
    pub user_message: Option<Message>,
    pub phase: Phase,
    /// Set when this turn moved the session out of phase O.
    pub phase_changed: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdvanceRequest {
    /// L→D: the decision to lock in. Extracted from the transcript when absent.
    #[serde(default)]
    pub decision: Option<CapturedDecision>,
    /// D→Closed: the committed action.
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub review_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeetingSummary {
    pub summary: String,
    pub decisions: Vec<CapturedDecision>,
}

/// Removes both markers from `text`, returning the cleaned reply and what was found.
pub fn strip_markers(text: &str) -> (String, Markers) {
    let markers = Markers {
        converged: text.contains(CONVERGED_MARKER),
        move_to_decision: text.contains(MOVE_TO_DECISION_MARKER),
    };
    let cleaned = text
        .replace(CONVERGED_MARKER, "")
        .replace(MOVE_TO_DECISION_MARKER, "")
        .trim()
        .to_string();
    (cleaned, markers)
}

/// Asks the next speaker for its turn, optionally after a founder message.
///
/// The founder message and the reply are appended together, and only once the
/// generator has answered. Markers in the reply are applied in phase O, then the
/// round cap is enforced.
pub async fn run_turn(
    session: &mut Session,
    generator: &dyn TextGenerator,
    user_message: Option<String>,
    north_star: Option<&str>,
    now: DateTime<Utc>,
) -> Result<TurnOutcome, AppError> {
    if session.is_closed() {
        return Err(TransitionError::SessionClosed.into());
    }

    let mut draft = session.clone();
    let user_message = match user_message {
        Some(text) if text.trim().is_empty() => {
            return Err(AppError::Validation("message cannot be empty".to_string()))
        }
        Some(text) => Some(draft.append_message(MessageDraft::user(text), now)?.clone()),
        None => None,
    };

    let turn = next_speaker(&draft).ok_or(TransitionError::SessionClosed)?;
    let prompt = build_turn_prompt(&draft, &turn, north_star).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "speaker {} is not in the session cast",
            turn.speaker_persona_id
        ))
    })?;

    debug!(
        "Session {} turn {} ({:?}) by {}",
        draft.id, turn.turn_index, turn.phase_step, turn.speaker_persona_id
    );
    let raw = generate(generator, &prompt, &draft.model).await?;
    let (content, markers) = strip_markers(&raw);
    if content.is_empty() {
        return Err(LlmError::EmptyContent.into());
    }

    let speaker = draft
        .cast
        .find(&turn.speaker_persona_id)
        .cloned()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("speaker vanished from cast")))?;
    let reply = draft
        .append_message(MessageDraft::persona(&speaker, content), now)?
        .clone();

    let phase_before = draft.phase;
    if draft.phase == Phase::O {
        apply_markers(&mut draft, &speaker.id, markers, now)?;
    }
    let phase_changed = draft.phase != phase_before;

    *session = draft;
    Ok(TurnOutcome {
        turn,
        reply,
        user_message,
        phase: session.phase,
        phase_changed,
    })
}

fn apply_markers(
    session: &mut Session,
    speaker_id: &str,
    markers: Markers,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    let is_moderator = speaker_id == session.cast.moderator.id;
    if is_moderator && markers.move_to_decision {
        session.signal_move_to_decision(MoveSource::Moderator)?;
    }
    if !is_moderator {
        session.record_convergence(speaker_id, markers.converged)?;
    }

    if session.enforce_round_cap(now) {
        return Ok(());
    }
    if session.debate.move_signal.is_some() || !should_continue_debate(session) {
        session.advance_to_decision(now)?;
    }
    Ok(())
}

/// Moves the session to its next phase.
///
/// H→O extracts the phase H context first; if nothing usable comes back the
/// session stays in H. L→D uses the supplied decision or extracts one from the
/// transcript. D→Closed captures the action when both action and review date
/// are given and closes as incomplete when neither is.
pub async fn advance(
    session: &mut Session,
    generator: &dyn TextGenerator,
    request: AdvanceRequest,
    now: DateTime<Utc>,
) -> Result<Phase, AppError> {
    let mut draft = session.clone();
    match draft.phase {
        Phase::Closed => return Err(TransitionError::SessionClosed.into()),
        Phase::H => {
            if !draft.has_clarifying_exchange() {
                return Err(TransitionError::InsufficientContext(
                    "at least one clarifying exchange is required".to_string(),
                )
                .into());
            }
            let ctx = extract_h_context(&draft, generator).await?;
            draft.capture_h_context(ctx)?;
            draft.advance_to_debate(now)?;
        }
        Phase::O => {
            draft.signal_move_to_decision(MoveSource::User)?;
            draft.advance_to_decision(now)?;
        }
        Phase::L => {
            let decision = match request.decision {
                Some(d) => d,
                None => extract_decision(&draft, generator)
                    .await?
                    .ok_or(TransitionError::NoDecisionCaptured)?,
            };
            draft.capture_decision(decision)?;
            draft.advance_to_action(now)?;
        }
        Phase::D => {
            end_session(&mut draft, request.action, request.review_date, now)?;
        }
    }

    *session = draft;
    Ok(session.phase)
}

/// Closes a session from phase D, with or without an action plan.
pub fn end_session(
    session: &mut Session,
    action: Option<String>,
    review_date: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    match (action, review_date) {
        (Some(action), Some(date)) => session.capture_action(action, date)?,
        (None, None) => {}
        _ => {
            return Err(AppError::Validation(
                "action and review_date must be given together".to_string(),
            ))
        }
    }
    let reason = session.close(now)?;
    info!("Session {} closed ({reason:?})", session.id);
    Ok(())
}

/// Meeting minutes plus the decisions found in them. Read-only on the session.
pub async fn summarize(
    session: &Session,
    generator: &dyn TextGenerator,
    north_star: Option<&str>,
) -> Result<MeetingSummary, AppError> {
    if session.messages.is_empty() {
        return Err(AppError::Validation(
            "cannot summarize an empty transcript".to_string(),
        ));
    }
    let raw = generate(generator, &summary_prompt(session, north_star), &session.model).await?;
    Ok(MeetingSummary {
        summary: summary_prose(&raw).to_string(),
        decisions: extract_decisions(&raw),
    })
}

async fn extract_h_context(
    session: &Session,
    generator: &dyn TextGenerator,
) -> Result<PhaseHContext, AppError> {
    let raw = generate(generator, &h_extraction_prompt(session), &session.model).await?;
    match serde_json::from_str::<PhaseHContext>(strip_json_fences(&raw)) {
        Ok(ctx) if ctx.is_sufficient() => Ok(ctx),
        Ok(_) => Err(TransitionError::InsufficientContext(
            "the decision is still unclear".to_string(),
        )
        .into()),
        Err(e) => {
            warn!("Malformed phase H extraction for session {}: {e}", session.id);
            Err(TransitionError::InsufficientContext(
                "could not extract the decision context".to_string(),
            )
            .into())
        }
    }
}

async fn extract_decision(
    session: &Session,
    generator: &dyn TextGenerator,
) -> Result<Option<CapturedDecision>, AppError> {
    let raw = generate(generator, &decision_extraction_prompt(session), &session.model).await?;
    Ok(extract_decisions(&raw).into_iter().next())
}

async fn generate(
    generator: &dyn TextGenerator,
    prompt: &TurnPrompt,
    model: &str,
) -> Result<String, AppError> {
    Ok(generator
        .generate(&prompt.system, &prompt.prompt, model)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::machine::tests::{new_session, say, session_in_debate};
    use crate::session::models::{CapturedStatus, CloseReason, Mode, Role};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies in order and records every prompt it was given.
    struct ScriptedGenerator {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn ok(replies: &[&str]) -> Self {
            Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            _system_instruction: &str,
            prompt: &str,
            _model: &str,
        ) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyContent))
        }
    }

    fn api_down() -> LlmError {
        LlmError::Api {
            status: 529,
            message: "overloaded".to_string(),
        }
    }

    #[test]
    fn test_strip_markers() {
        let (text, markers) = strip_markers("Fine by me.\n[CONVERGED]");
        assert_eq!(text, "Fine by me.");
        assert!(markers.converged);
        assert!(!markers.move_to_decision);

        let (text, markers) = strip_markers("No markers here");
        assert_eq!(text, "No markers here");
        assert_eq!(markers, Markers::default());
    }

    #[tokio::test]
    async fn test_run_turn_appends_user_message_and_reply() {
        let mut s = new_session(Mode::Solo, 3);
        let llm = ScriptedGenerator::ok(&["What decision are you facing?"]);

        let out = run_turn(&mut s, &llm, Some("Hi".to_string()), None, Utc::now())
            .await
            .unwrap();

        assert_eq!(s.messages.len(), 2);
        assert_eq!(s.messages[0].role, Role::User);
        assert_eq!(s.messages[1].speaker_id.as_deref(), Some("moderator"));
        assert_eq!(out.reply.content, "What decision are you facing?");
        assert_eq!(out.user_message.unwrap().content, "Hi");
        assert!(!out.phase_changed);
    }

    #[tokio::test]
    async fn test_failed_generation_leaves_session_untouched() {
        let mut s = session_in_debate(Mode::Solo, 3);
        let before = s.clone();
        let llm = ScriptedGenerator::new(vec![Err(api_down())]);

        let err = run_turn(&mut s, &llm, Some("New fact".to_string()), None, Utc::now())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(s, before);
    }

    #[tokio::test]
    async fn test_retry_after_failure_asks_same_speaker() {
        let mut s = session_in_debate(Mode::Mesa, 3);
        let llm = ScriptedGenerator::new(vec![
            Err(api_down()),
            Ok("Opening provocation".to_string()),
        ]);

        assert!(run_turn(&mut s, &llm, None, None, Utc::now()).await.is_err());
        let expected = next_speaker(&s).unwrap();
        let out = run_turn(&mut s, &llm, None, None, Utc::now()).await.unwrap();
        assert_eq!(out.turn, expected);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_marker_only_reply_is_rejected() {
        let mut s = session_in_debate(Mode::Solo, 3);
        let before = s.clone();
        let llm = ScriptedGenerator::ok(&["[CONVERGED]"]);
        let err = run_turn(&mut s, &llm, None, None, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::Llm(_)));
        assert_eq!(s, before);
    }

    #[tokio::test]
    async fn test_solo_round_cap_moves_to_decision_after_third_counselor_turn() {
        let mut s = session_in_debate(Mode::Solo, 3);
        let llm = ScriptedGenerator::ok(&["p1", "r1", "p2", "r2", "p3", "r3"]);

        for i in 0..6 {
            let out = run_turn(&mut s, &llm, None, None, Utc::now()).await.unwrap();
            assert_eq!(out.phase_changed, i == 5, "turn {i}");
        }
        assert_eq!(s.phase, Phase::L);
        assert_eq!(s.debate.move_signal, None);
    }

    #[tokio::test]
    async fn test_moderator_move_marker_moves_to_decision() {
        let mut s = session_in_debate(Mode::Solo, 5);
        let llm = ScriptedGenerator::ok(&["We have enough.\n[MOVE_TO_DECISION]"]);
        let out = run_turn(&mut s, &llm, None, None, Utc::now()).await.unwrap();
        assert!(out.phase_changed);
        assert_eq!(s.phase, Phase::L);
        assert_eq!(s.debate.move_signal, Some(MoveSource::Moderator));
        assert!(!s.messages.last().unwrap().content.contains("MOVE_TO_DECISION"));
    }

    #[tokio::test]
    async fn test_counselor_move_marker_is_ignored() {
        let mut s = session_in_debate(Mode::Solo, 5);
        say(&mut s, Some("moderator"), "Provocation");
        let llm = ScriptedGenerator::ok(&["Counterpoint [MOVE_TO_DECISION]"]);
        run_turn(&mut s, &llm, None, None, Utc::now()).await.unwrap();
        assert_eq!(s.phase, Phase::O);
        assert_eq!(s.debate.move_signal, None);
    }

    #[tokio::test]
    async fn test_single_quiet_reply_keeps_debate_open() {
        let mut s = session_in_debate(Mode::Solo, 5);
        let llm = ScriptedGenerator::ok(&["Provocation", "Fine by me.\n[CONVERGED]"]);
        for _ in 0..2 {
            run_turn(&mut s, &llm, None, None, Utc::now()).await.unwrap();
        }
        assert_eq!(s.rounds_completed(), 1);
        assert!(!s.debate.converged);
        assert_eq!(s.phase, Phase::O);
    }

    #[tokio::test]
    async fn test_two_quiet_replies_end_solo_debate() {
        let mut s = session_in_debate(Mode::Solo, 5);
        let llm = ScriptedGenerator::ok(&[
            "Provocation",
            "I have nothing to add.\n[CONVERGED]",
            "Anything else?",
            "Still nothing new.\n[CONVERGED]",
        ]);
        let mut last = None;
        for _ in 0..4 {
            last = Some(run_turn(&mut s, &llm, None, None, Utc::now()).await.unwrap());
        }
        assert!(last.unwrap().phase_changed);
        assert!(s.debate.converged);
        assert_eq!(s.rounds_completed(), 2);
        assert_eq!(s.phase, Phase::L);
    }

    #[tokio::test]
    async fn test_interjection_reaches_next_speaker_prompt() {
        let mut s = session_in_debate(Mode::Solo, 5);
        say(&mut s, Some("moderator"), "Provocation");
        let llm = ScriptedGenerator::ok(&["Then wait."]);
        let out = run_turn(
            &mut s,
            &llm,
            Some("Our biggest client just churned".to_string()),
            None,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(out.turn.speaker_persona_id, "investor");
        let prompt = llm.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Our biggest client just churned"));
    }

    #[tokio::test]
    async fn test_run_turn_rejects_empty_message_without_calling_llm() {
        let mut s = new_session(Mode::Solo, 3);
        let llm = ScriptedGenerator::ok(&["unused"]);
        let err = run_turn(&mut s, &llm, Some("  ".to_string()), None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_advance_h_to_o_uses_extraction() {
        let mut s = new_session(Mode::Solo, 3);
        say(&mut s, Some("moderator"), "What is the decision?");
        say(&mut s, None, "Whether to hire a CTO before the seed round");
        let llm = ScriptedGenerator::ok(&[
            r#"{"topic": "Hire a CTO before seed", "constraints": ["6 months runway"]}"#,
        ]);

        let phase = advance(&mut s, &llm, AdvanceRequest::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(phase, Phase::O);
        let ctx = s.h_context.as_ref().unwrap();
        assert_eq!(ctx.topic, "Hire a CTO before seed");
        assert_eq!(ctx.constraints, vec!["6 months runway"]);
    }

    #[tokio::test]
    async fn test_advance_h_stays_in_h_on_malformed_extraction() {
        let mut s = new_session(Mode::Solo, 3);
        say(&mut s, Some("moderator"), "What is the decision?");
        say(&mut s, None, "Not sure yet");
        for reply in ["not json", r#"{"topic": ""}"#] {
            let llm = ScriptedGenerator::ok(&[reply]);
            let err = advance(&mut s, &llm, AdvanceRequest::default(), Utc::now())
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidTransition(_)));
            assert_eq!(s.phase, Phase::H);
            assert!(s.h_context.is_none());
        }
    }

    #[tokio::test]
    async fn test_advance_h_without_exchange_skips_llm() {
        let mut s = new_session(Mode::Solo, 3);
        let llm = ScriptedGenerator::ok(&[]);
        assert!(advance(&mut s, &llm, AdvanceRequest::default(), Utc::now())
            .await
            .is_err());
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_full_session_through_advance() {
        let mut s = session_in_debate(Mode::Solo, 3);
        let llm = ScriptedGenerator::ok(&[
            r#"```json
[{"decision": "Raise in January", "reasoning": "Better metrics", "status": "taken"}]
```"#,
        ]);

        // O→L on the founder's word
        advance(&mut s, &llm, AdvanceRequest::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(s.debate.move_signal, Some(MoveSource::User));

        // L→D with the extracted decision
        advance(&mut s, &llm, AdvanceRequest::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(s.phase, Phase::D);
        let captured = s.captured.as_ref().unwrap();
        assert_eq!(captured.decision_text, "Raise in January");
        assert_eq!(captured.status, CapturedStatus::Taken);

        // D→Closed with a plan
        let request = AdvanceRequest {
            action: Some("Book 5 investor calls".to_string()),
            review_date: NaiveDate::from_ymd_opt(2027, 1, 15),
            ..Default::default()
        };
        advance(&mut s, &llm, request, Utc::now()).await.unwrap();
        assert!(s.is_closed());
        assert_eq!(s.closure.as_ref().unwrap().reason, CloseReason::Completed);
    }

    #[tokio::test]
    async fn test_advance_l_without_extractable_decision_fails() {
        let mut s = session_in_debate(Mode::Solo, 3);
        s.signal_move_to_decision(MoveSource::User).unwrap();
        s.advance_to_decision(Utc::now()).unwrap();
        let llm = ScriptedGenerator::ok(&["[]"]);
        let err = advance(&mut s, &llm, AdvanceRequest::default(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
        assert_eq!(s.phase, Phase::L);
    }

    #[test]
    fn test_end_session_requires_action_and_date_together() {
        let mut s = session_in_debate(Mode::Solo, 1);
        say(&mut s, Some("investor"), "Counterpoint");
        s.enforce_round_cap(Utc::now());
        s.capture_decision(CapturedDecision {
            decision_text: "Raise now".to_string(),
            reasoning: String::new(),
            status: CapturedStatus::Taken,
            context: String::new(),
        })
        .unwrap();
        s.advance_to_action(Utc::now()).unwrap();

        let err = end_session(&mut s, Some("Call funds".to_string()), None, Utc::now());
        assert!(matches!(err, Err(AppError::Validation(_))));
        assert_eq!(s.phase, Phase::D);

        end_session(&mut s, None, None, Utc::now()).unwrap();
        assert_eq!(s.closure.as_ref().unwrap().reason, CloseReason::Incomplete);
    }

    #[tokio::test]
    async fn test_summarize_splits_prose_and_decisions() {
        let s = session_in_debate(Mode::Solo, 3);
        let llm = ScriptedGenerator::ok(&[
            "The founder weighed raising now.\n```json\n[{\"decision\": \"Wait\", \"status\": \"pending\"}]\n```",
        ]);
        let summary = summarize(&s, &llm, Some("Reach 1M ARR")).await.unwrap();
        assert_eq!(summary.summary, "The founder weighed raising now.");
        assert_eq!(summary.decisions.len(), 1);
        assert!(llm.prompts.lock().unwrap()[0].contains("Reach 1M ARR"));
    }

    #[tokio::test]
    async fn test_summarize_empty_transcript_is_validation_error() {
        let s = new_session(Mode::Solo, 3);
        let llm = ScriptedGenerator::ok(&["unused"]);
        let err = summarize(&s, &llm, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
