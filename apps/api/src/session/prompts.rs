// Session LLM prompt templates and builders.
// Templates are constants with `{placeholders}`; builders fill them from the session.

use crate::llm_client::prompts::{
    GROUNDING_INSTRUCTION, HOLD_METHOD, JSON_ONLY_SYSTEM, MARKER_INSTRUCTION,
    MOVE_TO_DECISION_MARKER,
};
use crate::personas::Persona;
use crate::session::models::{Message, Mode, PhaseStep, Role, Session, SpeakingTurn};
use crate::session::turns::pending_interjections;

/// System instruction + prompt for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnPrompt {
    pub system: String,
    pub prompt: String,
}

pub const CLARIFY_PROMPT: &str = r#"PHASE H — CLARIFY.

{context}

TRANSCRIPT SO FAR:
{transcript}
{interjections}
YOUR TASK:
Help the founder state the real decision. Ask exactly ONE question that uncovers the most
important missing piece: the actual question, a hard constraint, or what is at stake.
If this is the first turn, welcome them briefly and ask what decision they are facing.
Do not give advice yet."#;

pub const REVISION_PROMPT: &str = r#"PHASE H — REVIEW OF A PAST DECISION.

{context}

DECISION UNDER REVIEW:
- Decision: {decision}
- Original context: {decision_context}
- Status: {status}
- Outcome: {outcome}

TRANSCRIPT SO FAR:
{transcript}
{interjections}
YOUR TASK:
Open a revision meeting. Recap the decision in one sentence, state its outcome plainly, and ask
the founder ONE question about what they learned or what changed since it was taken."#;

pub const SOLO_PROVOKE_PROMPT: &str = r#"PHASE O — DEBATE (one counselor: {counselor}).

{context}

TRANSCRIPT SO FAR:
{transcript}
{interjections}
YOUR TASK:
Provoke {counselor}. Pick the weakest assumption in the plan so far and challenge it with one
pointed question or scenario. Do not answer it yourself.
If the debate has clearly produced enough to decide, end with the exact token {move_marker}
on its own line."#;

pub const SOLO_REPLY_PROMPT: &str = r#"PHASE O — DEBATE.

{context}

TRANSCRIPT SO FAR:
{transcript}
{interjections}
YOUR TASK:
Answer the moderator's latest provocation from your own perspective. Take a clear position,
give your strongest reason, and name the biggest risk you see. Address the founder directly.
{marker_instruction}"#;

pub const MESA_MODERATOR_PROMPT: &str = r#"PHASE O — MESA DEBATE between {counselor_a} and {counselor_b}.

{context}

TRANSCRIPT SO FAR:
{transcript}
{interjections}
YOUR TASK:
{task}
Keep it short; the counselors do the arguing.
If the debate has clearly produced enough to decide, end with the exact token {move_marker}
on its own line."#;

const MESA_OPENING_TASK: &str = "Open the debate: state the decision in one line and ask each \
counselor to take a side.";

const MESA_CHECKPOINT_TASK: &str = "Checkpoint: summarize where the two counselors agree, where \
they disagree, and push them onto the most important open disagreement.";

const MESA_PROVOKE_TASK: &str = "Provoke both counselors with the scenario that would make each \
of them wrong. Be concrete.";

pub const MESA_REBUTTAL_PROMPT: &str = r#"PHASE O — MESA DEBATE. You are debating {opponent}.

{context}

TRANSCRIPT SO FAR:
{transcript}
{interjections}
{opponent_turn}
YOUR TASK:
Rebut {opponent}'s latest argument directly, not the moderator's. Concede what is right,
attack what is wrong, and add one argument they have not considered.
{marker_instruction}"#;

pub const DECIDE_PROMPT: &str = r#"PHASE L — LOCK IN THE DECISION.

{context}

TRANSCRIPT SO FAR:
{transcript}
{interjections}
YOUR TASK:
Summarize the strongest arguments on each side in at most four bullets, then ask the founder
to state their decision in one sentence: take it now, or defer it explicitly.
If the founder already stated a decision, restate it precisely and confirm the reasoning."#;

pub const ACT_PROMPT: &str = r#"PHASE D — DO.

{context}

TRANSCRIPT SO FAR:
{transcript}
{interjections}
YOUR TASK:
Turn the decision into ONE concrete next action the founder can start this week, and propose
a review date (YYYY-MM-DD) when the outcome should be checked. Ask them to confirm or adjust."#;

pub const H_EXTRACTION_PROMPT: &str = r#"Extract the decision context from this clarification conversation.

TRANSCRIPT:
{transcript}

Return a JSON object with EXACTLY this schema:
{
  "topic": "the decision in one sentence, empty string if it is still unclear",
  "constraints": ["hard constraints the founder stated"],
  "stakes": "what is at risk, in one sentence",
  "facts": ["relevant facts the founder stated"]
}

RULES:
1. Use only what the founder said. Never invent facts.
2. If no decision has been stated yet, return "topic": "".
3. Return ONLY the JSON object."#;

pub const DECISION_EXTRACTION_PROMPT: &str = r#"Extract the decision(s) the founder made in this conversation.

TOPIC: {topic}

TRANSCRIPT:
{transcript}

Return a JSON array with this EXACT schema:
[
  {
    "decision": "the decision in one sentence",
    "reasoning": "why, in one sentence",
    "status": "taken" | "pending",
    "context": "the situation the decision responds to"
  }
]

RULES:
1. "taken" only if the founder explicitly committed; otherwise "pending".
2. If the founder has not stated a decision, return [].
3. Return ONLY the JSON array."#;

pub const SUMMARY_PROMPT: &str = r#"Write the minutes of this advisory meeting.

{context}

TRANSCRIPT:
{transcript}

FORMAT:
1. A short prose summary (max 150 words): the question, the main arguments, and the outcome.
2. Then a JSON array in a ```json fenced block listing every decision made:
   [{"decision": "...", "reasoning": "...", "status": "taken" | "pending", "context": "..."}]
   Use [] if no decision was made."#;

pub const SUMMARY_SYSTEM: &str = "You are the secretary of a founder's advisory board. \
    You write precise, neutral meeting minutes and never add facts that were not discussed.";

/// Builds the prompt for `turn`. `None` if the turn names a persona outside the cast.
pub fn build_turn_prompt(
    session: &Session,
    turn: &SpeakingTurn,
    north_star: Option<&str>,
) -> Option<TurnPrompt> {
    let speaker = session.cast.find(&turn.speaker_persona_id)?;
    let context = context_block(session, north_star);
    let transcript = render_transcript(&session.messages);
    let interjections = render_interjections(session, &speaker.id);
    let counselor_a = counselor_name(session, 0);
    let counselor_b = counselor_name(session, 1);

    let mut values: Vec<(&str, String)> = vec![
        ("context", context),
        ("transcript", transcript),
        ("interjections", interjections),
        ("marker_instruction", MARKER_INSTRUCTION.to_string()),
        ("move_marker", MOVE_TO_DECISION_MARKER.to_string()),
    ];

    let template = match turn.phase_step {
        PhaseStep::Clarify => CLARIFY_PROMPT,
        PhaseStep::Review => match &session.context.revision {
            Some(rev) => {
                let outcome = rev
                    .outcome
                    .map(|o| o.as_str().to_string())
                    .unwrap_or_else(|| "not recorded".to_string());
                values.extend([
                    ("decision", rev.decision.clone()),
                    ("decision_context", rev.context.clone()),
                    ("status", rev.status.as_str().to_string()),
                    ("outcome", outcome),
                ]);
                REVISION_PROMPT
            }
            None => CLARIFY_PROMPT,
        },
        PhaseStep::Provoke if session.mode != Mode::Mesa => {
            values.push(("counselor", counselor_a));
            SOLO_PROVOKE_PROMPT
        }
        PhaseStep::Reply => SOLO_REPLY_PROMPT,
        PhaseStep::Provoke | PhaseStep::Checkpoint => {
            let task = match turn.phase_step {
                PhaseStep::Checkpoint => MESA_CHECKPOINT_TASK,
                _ if turn.turn_index == 0 => MESA_OPENING_TASK,
                _ => MESA_PROVOKE_TASK,
            };
            values.extend([
                ("counselor_a", counselor_a),
                ("counselor_b", counselor_b),
                ("task", task.to_string()),
            ]);
            MESA_MODERATOR_PROMPT
        }
        PhaseStep::Rebuttal => {
            let (opponent, opponent_turn) = rebuttal_values(session, speaker, turn);
            values.extend([("opponent", opponent), ("opponent_turn", opponent_turn)]);
            MESA_REBUTTAL_PROMPT
        }
        PhaseStep::Decide => DECIDE_PROMPT,
        PhaseStep::Act => ACT_PROMPT,
    };

    Some(TurnPrompt {
        system: persona_system(speaker),
        prompt: fill(template, &values),
    })
}

pub fn h_extraction_prompt(session: &Session) -> TurnPrompt {
    TurnPrompt {
        system: JSON_ONLY_SYSTEM.to_string(),
        prompt: fill(
            H_EXTRACTION_PROMPT,
            &[("transcript", render_transcript(&session.messages))],
        ),
    }
}

pub fn decision_extraction_prompt(session: &Session) -> TurnPrompt {
    TurnPrompt {
        system: JSON_ONLY_SYSTEM.to_string(),
        prompt: fill(
            DECISION_EXTRACTION_PROMPT,
            &[
                ("topic", session.topic()),
                ("transcript", render_transcript(&session.messages)),
            ],
        ),
    }
}

pub fn summary_prompt(session: &Session, north_star: Option<&str>) -> TurnPrompt {
    TurnPrompt {
        system: SUMMARY_SYSTEM.to_string(),
        prompt: fill(
            SUMMARY_PROMPT,
            &[
                ("context", context_block(session, north_star)),
                ("transcript", render_transcript(&session.messages)),
            ],
        ),
    }
}

/// Substitutes `{name}` placeholders in a single left-to-right pass. Inserted
/// values are never rescanned, so founder text that looks like a placeholder
/// stays literal. Braces that match no name are kept as they are.
fn fill(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let hit = values.iter().find(|(name, _)| {
            tail.starts_with(name) && tail[name.len()..].starts_with('}')
        });
        match hit {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

fn persona_system(persona: &Persona) -> String {
    format!(
        "{}\n\n{}\n\n{}",
        persona.system_instruction(),
        HOLD_METHOD,
        GROUNDING_INSTRUCTION
    )
}

fn rebuttal_values(session: &Session, speaker: &Persona, turn: &SpeakingTurn) -> (String, String) {
    let opponent = session
        .cast
        .counselors
        .iter()
        .find(|c| c.id != speaker.id)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "the other counselor".to_string());
    let opponent_turn = turn
        .responds_to
        .and_then(|id| session.messages.iter().find(|m| m.id == id))
        .map(|m| format!("ARGUMENT TO REBUT ({}):\n{}\n", m.speaker_name, m.content))
        .unwrap_or_default();
    (opponent, opponent_turn)
}

fn counselor_name(session: &Session, index: usize) -> String {
    session
        .cast
        .counselors
        .get(index)
        .map(|c| c.name.clone())
        .unwrap_or_default()
}

/// Everything known about the decision so far, as a labelled block.
pub fn context_block(session: &Session, north_star: Option<&str>) -> String {
    let mut out = String::from("CONTEXT:\n");
    out.push_str(&format!("- Topic: {}\n", session.topic()));
    for fact in &session.context.facts {
        out.push_str(&format!("- Fact: {fact}\n"));
    }
    if let Some(h) = &session.h_context {
        if !h.stakes.is_empty() {
            out.push_str(&format!("- Stakes: {}\n", h.stakes));
        }
        for c in &h.constraints {
            out.push_str(&format!("- Constraint: {c}\n"));
        }
        for f in &h.facts {
            out.push_str(&format!("- Fact: {f}\n"));
        }
    }
    if let Some(ns) = north_star.filter(|s| !s.trim().is_empty()) {
        out.push_str(&format!("- Company north star: {ns}\n"));
    }
    if let Some(d) = &session.captured {
        out.push_str(&format!("- Decision on the table: {}\n", d.decision_text));
    }
    out
}

pub fn render_transcript(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "(no messages yet)\n".to_string();
    }
    let mut out = String::new();
    for m in messages {
        let who = match m.role {
            Role::User => "Founder".to_string(),
            Role::Assistant => m.speaker_name.clone(),
        };
        out.push_str(&format!("[{}] {}: {}\n", m.phase, who, m.content));
    }
    out
}

fn render_interjections(session: &Session, speaker_id: &str) -> String {
    let pending = pending_interjections(session, speaker_id);
    if pending.is_empty() {
        return String::new();
    }
    let mut out =
        String::from("\nTHE FOUNDER INTERVENED SINCE YOU LAST SPOKE. Take this into account first:\n");
    for m in pending {
        out.push_str(&format!("> {}\n", m.content));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::machine::tests::{new_session, say, session_in_debate};
    use crate::session::turns::next_speaker;

    fn prompt_for(session: &Session) -> TurnPrompt {
        let turn = next_speaker(session).unwrap();
        build_turn_prompt(session, &turn, Some("Reach 1k paying teams")).unwrap()
    }

    #[test]
    fn test_clarify_prompt_uses_moderator_persona() {
        let s = new_session(Mode::Solo, 3);
        let p = prompt_for(&s);
        assert!(p.system.contains("MODERATOR"));
        assert!(p.system.contains("H-O-L-D"));
        assert!(p.prompt.contains("PHASE H"));
        assert!(p.prompt.contains("(no messages yet)"));
        assert!(p.prompt.contains("Company north star: Reach 1k paying teams"));
    }

    #[test]
    fn test_no_placeholders_left_in_any_step() {
        let mut s = session_in_debate(Mode::Mesa, 10);
        for _ in 0..5 {
            let p = prompt_for(&s);
            assert!(!p.prompt.contains('{'), "{}", p.prompt);
            let id = next_speaker(&s).unwrap().speaker_persona_id;
            say(&mut s, Some(id.as_str()), "turn");
        }
    }

    #[test]
    fn test_fill_is_single_pass() {
        let values = [
            ("context", "Topic: price at {transcript}".to_string()),
            ("transcript", "Founder: hi".to_string()),
        ];
        assert_eq!(
            fill("{context}\n{transcript}\n{unknown}", &values),
            "Topic: price at {transcript}\nFounder: hi\n{unknown}"
        );
    }

    #[test]
    fn test_founder_text_with_braces_stays_literal() {
        let mut s = session_in_debate(Mode::Solo, 10);
        s.context.facts.push("Our template engine uses {interjections} tags".to_string());
        say(&mut s, None, "Should we rename {transcript}?");
        let p = prompt_for(&s);
        assert!(p.prompt.contains("- Fact: Our template engine uses {interjections} tags"));
        assert!(p.prompt.contains("Should we rename {transcript}?"));
        assert_eq!(p.prompt.matches("TRANSCRIPT SO FAR:").count(), 1);
    }

    #[test]
    fn test_solo_provocation_names_counselor_and_marker() {
        let s = session_in_debate(Mode::Solo, 3);
        let p = prompt_for(&s);
        assert!(p.prompt.contains("Provoke Rafael"));
        assert!(p.prompt.contains(MOVE_TO_DECISION_MARKER));
    }

    #[test]
    fn test_rebuttal_quotes_opponent_turn() {
        let mut s = session_in_debate(Mode::Mesa, 10);
        say(&mut s, Some("moderator"), "Open");
        say(&mut s, Some("investor"), "Raise now, the window is closing");
        let p = prompt_for(&s);
        assert!(p.system.contains("Bea"));
        assert!(p.prompt.contains("ARGUMENT TO REBUT (Rafael)"));
        assert!(p.prompt.contains("Raise now, the window is closing"));
    }

    #[test]
    fn test_interjection_is_highlighted_for_next_speaker() {
        let mut s = session_in_debate(Mode::Solo, 10);
        say(&mut s, Some("moderator"), "What if the round fails?");
        say(&mut s, None, "We could bridge with revenue");
        let p = prompt_for(&s);
        assert!(p.prompt.contains("THE FOUNDER INTERVENED"));
        assert!(p.prompt.contains("> We could bridge with revenue"));
    }

    #[test]
    fn test_revision_prompt_includes_reviewed_decision() {
        let s = new_session(Mode::Revision, 3);
        let p = prompt_for(&s);
        assert!(p.prompt.contains("DECISION UNDER REVIEW"));
        assert!(p.prompt.contains("Launch beta"));
        assert!(p.prompt.contains("Outcome: failure"));
    }

    #[test]
    fn test_extraction_prompts_are_json_only() {
        let s = session_in_debate(Mode::Solo, 3);
        assert_eq!(h_extraction_prompt(&s).system, JSON_ONLY_SYSTEM);
        let p = decision_extraction_prompt(&s);
        assert_eq!(p.system, JSON_ONLY_SYSTEM);
        assert!(p.prompt.contains("TOPIC: Raise seed now or later"));
    }

    #[test]
    fn test_transcript_is_labelled_by_phase() {
        let s = session_in_debate(Mode::Solo, 3);
        let t = render_transcript(&s.messages);
        assert!(t.contains("[H] Helena: What is really at stake?"));
        assert!(t.contains("[H] Founder: Runway"));
    }
}
