//! Turn-Taking Orchestrator: who speaks next, and whether the debate goes on.
//!
//! Everything here is a pure function of the session: same transcript, same
//! round count, same mode ⇒ same answer. Retrying a failed turn therefore asks
//! the same persona again.
//!
//! Mesa rotation in phase O:
//! ```text
//! moderator (opening) → c1 → c2 → moderator (checkpoint) → c1 → c2 → moderator …
//! ```
//! A forced provocation pulls the moderator in at the next slot. Founder
//! interjections never take a slot.

use crate::session::models::{Message, Mode, Phase, PhaseStep, Role, Session, SpeakingTurn};

/// Counselor turns between two moderator checkpoints in mesa mode.
const MESA_TURNS_PER_CHECKPOINT: usize = 2;

enum Slot {
    Moderator,
    Counselor(usize),
}

pub fn next_speaker(session: &Session) -> Option<SpeakingTurn> {
    let moderator = session.cast.moderator.id.clone();
    let phase_turns = assistant_turns(session, session.phase);
    let turn_index = phase_turns.len();

    let (speaker, step, responds_to) = match session.phase {
        Phase::Closed => return None,
        Phase::H if session.mode == Mode::Revision && turn_index == 0 => {
            (moderator, PhaseStep::Review, None)
        }
        Phase::H => (moderator, PhaseStep::Clarify, None),
        Phase::L => (moderator, PhaseStep::Decide, None),
        Phase::D => (moderator, PhaseStep::Act, None),
        Phase::O => match session.mode {
            Mode::Solo | Mode::Revision => match debate_slot_solo(session, &phase_turns) {
                Slot::Moderator => (moderator, PhaseStep::Provoke, None),
                Slot::Counselor(i) => (session.cast.counselors[i].id.clone(), PhaseStep::Reply, None),
            },
            Mode::Mesa => match debate_slot_mesa(session, &phase_turns) {
                Slot::Moderator if turn_index == 0 || session.debate.pending_provocation => {
                    (moderator, PhaseStep::Provoke, None)
                }
                Slot::Moderator => (moderator, PhaseStep::Checkpoint, None),
                Slot::Counselor(i) => {
                    let other = &session.cast.counselors[1 - i].id;
                    let responds_to = phase_turns
                        .iter()
                        .rev()
                        .find(|m| m.speaker_id.as_deref() == Some(other.as_str()))
                        .map(|m| m.id);
                    (
                        session.cast.counselors[i].id.clone(),
                        PhaseStep::Rebuttal,
                        responds_to,
                    )
                }
            },
        },
    };

    Some(SpeakingTurn {
        speaker_persona_id: speaker,
        turn_index,
        phase_step: step,
        responds_to,
    })
}

/// Strict alternation, moderator first.
fn debate_slot_solo(session: &Session, turns: &[&Message]) -> Slot {
    match turns.last() {
        Some(last) if is_moderator(session, last) => Slot::Counselor(0),
        _ => Slot::Moderator,
    }
}

fn debate_slot_mesa(session: &Session, turns: &[&Message]) -> Slot {
    let Some(last) = turns.last() else {
        return Slot::Moderator;
    };
    if session.debate.pending_provocation && !is_moderator(session, last) {
        return Slot::Moderator;
    }

    let since_moderator = turns
        .iter()
        .rev()
        .take_while(|m| !is_moderator(session, m))
        .count();
    if since_moderator >= MESA_TURNS_PER_CHECKPOINT {
        return Slot::Moderator;
    }

    // Whoever of the two spoke last yields to the other.
    let last_counselor = turns
        .iter()
        .rev()
        .find_map(|m| m.speaker_id.as_deref().and_then(|id| session.cast.counselor_index(id)));
    match last_counselor {
        Some(i) => Slot::Counselor(1 - i),
        None => Slot::Counselor(0),
    }
}

/// Advisory: false once the cap is reached or a debater reported convergence.
pub fn should_continue_debate(session: &Session) -> bool {
    session.phase == Phase::O && !session.round_cap_reached() && !session.debate.converged
}

/// Founder messages posted since `speaker_id` last spoke (in any phase).
pub fn pending_interjections<'a>(session: &'a Session, speaker_id: &str) -> Vec<&'a Message> {
    let since = session
        .messages
        .iter()
        .rposition(|m| m.speaker_id.as_deref() == Some(speaker_id))
        .map(|i| i + 1)
        .unwrap_or(0);
    session.messages[since..]
        .iter()
        .filter(|m| m.role == Role::User)
        .collect()
}

fn assistant_turns(session: &Session, phase: Phase) -> Vec<&Message> {
    session
        .messages
        .iter()
        .filter(|m| m.phase == phase && m.role == Role::Assistant)
        .collect()
}

fn is_moderator(session: &Session, message: &Message) -> bool {
    message.speaker_id.as_deref() == Some(session.cast.moderator.id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::machine::tests::{new_session, say, session_in_debate};
    use chrono::Utc;

    fn speaker(session: &Session) -> String {
        next_speaker(session).unwrap().speaker_persona_id
    }

    /// Appends whatever persona the orchestrator picks.
    fn play(session: &mut Session, turns: usize) -> Vec<String> {
        let mut order = Vec::new();
        for _ in 0..turns {
            let id = speaker(session);
            say(session, Some(id.as_str()), "turn");
            order.push(id);
        }
        order
    }

    #[test]
    fn test_moderator_runs_non_debate_phases() {
        let s = new_session(Mode::Mesa, 3);
        let turn = next_speaker(&s).unwrap();
        assert_eq!(turn.speaker_persona_id, "moderator");
        assert_eq!(turn.phase_step, PhaseStep::Clarify);
    }

    #[test]
    fn test_revision_opens_with_review() {
        let s = new_session(Mode::Revision, 3);
        assert_eq!(next_speaker(&s).unwrap().phase_step, PhaseStep::Review);
    }

    #[test]
    fn test_solo_alternates_starting_with_moderator() {
        let mut s = session_in_debate(Mode::Solo, 10);
        let order = play(&mut s, 4);
        assert_eq!(order, vec!["moderator", "investor", "moderator", "investor"]);
    }

    #[test]
    fn test_mesa_rotation_with_checkpoints() {
        let mut s = session_in_debate(Mode::Mesa, 10);
        let order = play(&mut s, 7);
        assert_eq!(
            order,
            vec![
                "moderator", "investor", "operator", "moderator", "investor", "operator",
                "moderator"
            ]
        );
    }

    #[test]
    fn test_mesa_rebuttal_answers_other_counselor() {
        let mut s = session_in_debate(Mode::Mesa, 10);
        play(&mut s, 2); // moderator, investor
        let investor_turn = s.messages.last().unwrap().id;
        let turn = next_speaker(&s).unwrap();
        assert_eq!(turn.speaker_persona_id, "operator");
        assert_eq!(turn.phase_step, PhaseStep::Rebuttal);
        assert_eq!(turn.responds_to, Some(investor_turn));
    }

    #[test]
    fn test_mesa_forced_provocation_takes_next_slot() {
        let mut s = session_in_debate(Mode::Mesa, 10);
        play(&mut s, 2); // moderator, investor
        s.request_provocation().unwrap();
        let turn = next_speaker(&s).unwrap();
        assert_eq!(turn.speaker_persona_id, "moderator");
        assert_eq!(turn.phase_step, PhaseStep::Provoke);

        say(&mut s, Some("moderator"), "What would make you both wrong?");
        assert!(!s.debate.pending_provocation);
        assert_eq!(speaker(&s), "operator");
    }

    #[test]
    fn test_interjection_does_not_consume_a_turn() {
        let mut s = session_in_debate(Mode::Solo, 10);
        play(&mut s, 1); // moderator
        let before = next_speaker(&s).unwrap();
        say(&mut s, None, "Remember we have only 6 months of runway");
        let after = next_speaker(&s).unwrap();
        assert_eq!(before, after);
        assert_eq!(after.speaker_persona_id, "investor");
    }

    #[test]
    fn test_pending_interjections_since_last_turn() {
        let mut s = session_in_debate(Mode::Solo, 10);
        play(&mut s, 2); // moderator, investor
        say(&mut s, None, "New fact");
        let pending = pending_interjections(&s, "investor");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].content, "New fact");
        // the moderator last spoke before the investor, so it sees the same one
        assert_eq!(pending_interjections(&s, "moderator").len(), 1);
    }

    #[test]
    fn test_next_speaker_is_deterministic() {
        let mut s = session_in_debate(Mode::Mesa, 10);
        play(&mut s, 3);
        let first = next_speaker(&s);
        for _ in 0..10 {
            assert_eq!(next_speaker(&s), first);
        }
    }

    #[test]
    fn test_no_speaker_after_close() {
        let mut s = session_in_debate(Mode::Solo, 1);
        play(&mut s, 2);
        s.enforce_round_cap(Utc::now());
        s.defer(None, Utc::now()).unwrap();
        assert!(next_speaker(&s).is_none());
    }

    #[test]
    fn test_debate_stops_at_round_cap_for_any_transcript() {
        for mode in [Mode::Solo, Mode::Mesa] {
            let mut s = session_in_debate(mode, 3);
            let mut turns = 0;
            while should_continue_debate(&s) {
                play(&mut s, 1);
                turns += 1;
                assert!(turns <= 20, "{mode:?} debate never stopped");
            }
            assert!(s.round_cap_reached());
        }
    }

    #[test]
    fn test_convergence_stops_debate() {
        let mut s = session_in_debate(Mode::Solo, 10);
        assert!(should_continue_debate(&s));
        s.record_convergence("investor", true).unwrap();
        assert!(should_continue_debate(&s));
        s.record_convergence("investor", true).unwrap();
        assert!(!should_continue_debate(&s));
    }
}
