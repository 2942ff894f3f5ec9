//! Heuristic phase progression.
//!
//! After every completed coach turn the just-sent user message is scanned for
//! data worth keeping, then the transition table decides whether the session
//! moves to the next phase. Both steps are keyword and count heuristics; they
//! make no accuracy claims.

use crate::phase::Phase;
use crate::session::SessionData;

/// Stored entries keep at most this many characters of the user's message.
pub const MAX_ENTRY_CHARS: usize = 100;
/// A deep-stories message must be longer than this to count as a story.
pub const MIN_STORY_CHARS: usize = 50;

const ENERGIZER_KEYWORDS: &[&str] = &["energiz", "love", "enjoy"];
const DRAINER_KEYWORDS: &[&str] = &["drain", "hate", "frustrat"];

/// Result of one [`advance`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub session_data: SessionData,
    /// True when the phase moved or any collection grew.
    pub changed: bool,
}

fn truncate_entry(message: &str) -> String {
    message.chars().take(MAX_ENTRY_CHARS).collect()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Applies the extraction rules for `phase`. Returns true if anything was appended.
fn extract(phase: Phase, data: &mut SessionData, user_message: &str) -> bool {
    let lower = user_message.to_lowercase();
    let mut grew = false;

    match phase {
        Phase::EnergyMap => {
            if contains_any(&lower, ENERGIZER_KEYWORDS) {
                data.energizers.push(truncate_entry(user_message));
                grew = true;
            }
            if contains_any(&lower, DRAINER_KEYWORDS) {
                data.drainers.push(truncate_entry(user_message));
                grew = true;
            }
        }
        Phase::DeepStories => {
            if user_message.chars().count() > MIN_STORY_CHARS {
                data.stories.push(truncate_entry(user_message));
                grew = true;
            }
        }
        _ => {}
    }

    grew
}

/// Transition table; `data` is the already-extracted session data.
fn next_phase(phase: Phase, data: &SessionData, messages_in_phase: usize) -> Phase {
    let ready = match phase {
        Phase::Intro => messages_in_phase >= 2,
        Phase::Snapshot => messages_in_phase >= 4,
        Phase::EnergyMap => data.energizers.len() >= 2 && data.drainers.len() >= 2,
        Phase::DeepStories => data.stories.len() >= 2,
        Phase::Patterns => messages_in_phase >= 4,
        Phase::Statement => messages_in_phase >= 3,
        Phase::Action => messages_in_phase >= 3,
        Phase::Completed => false,
    };

    if ready {
        phase.next().unwrap_or(phase)
    } else {
        phase
    }
}

/// Decides the phase and session data after a completed turn.
///
/// `messages_in_phase` counts transcript messages of both senders tagged with
/// `current_phase`. The input data is never mutated; collections in the
/// returned data only ever grow by the entries found in this one message.
pub fn advance(
    current_phase: Phase,
    session_data: &SessionData,
    user_message: &str,
    messages_in_phase: usize,
) -> PhaseOutcome {
    let mut data = session_data.clone();
    let grew = extract(current_phase, &mut data, user_message);
    let phase = next_phase(current_phase, &data, messages_in_phase);

    if phase != current_phase {
        tracing::debug!(from = %current_phase, to = %phase, messages_in_phase, "Transition condition met");
    }

    PhaseOutcome {
        phase,
        session_data: data,
        changed: grew || phase != current_phase,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_with(energizers: usize, drainers: usize, stories: usize) -> SessionData {
        SessionData {
            energizers: (0..energizers).map(|i| format!("energizer {}", i)).collect(),
            drainers: (0..drainers).map(|i| format!("drainer {}", i)).collect(),
            stories: (0..stories).map(|i| format!("story {}", i)).collect(),
            ..SessionData::default()
        }
    }

    #[test]
    fn test_count_based_thresholds() {
        let data = SessionData::default();
        let cases = [
            (Phase::Intro, 1, Phase::Intro),
            (Phase::Intro, 2, Phase::Snapshot),
            (Phase::Snapshot, 3, Phase::Snapshot),
            (Phase::Snapshot, 4, Phase::EnergyMap),
            (Phase::Patterns, 3, Phase::Patterns),
            (Phase::Patterns, 4, Phase::Statement),
            (Phase::Statement, 2, Phase::Statement),
            (Phase::Statement, 3, Phase::Action),
            (Phase::Action, 2, Phase::Action),
            (Phase::Action, 3, Phase::Completed),
        ];
        for (phase, count, expected) in cases {
            let outcome = advance(phase, &data, "ok", count);
            assert_eq!(outcome.phase, expected, "{} with {} messages", phase, count);
            assert_eq!(outcome.changed, expected != phase);
        }
    }

    #[test]
    fn test_never_skips_a_phase() {
        let rich = data_with(5, 5, 5);
        for phase in Phase::ALL {
            let outcome = advance(phase, &rich, "ok", 100);
            match phase.next() {
                Some(next) => assert_eq!(outcome.phase, next),
                None => assert_eq!(outcome.phase, Phase::Completed),
            }
        }
    }

    #[test]
    fn test_completed_is_terminal() {
        let outcome = advance(Phase::Completed, &data_with(5, 5, 5), "I love it", 50);
        assert_eq!(outcome.phase, Phase::Completed);
        assert!(!outcome.changed);
    }

    #[test]
    fn test_energy_map_counts_ignore_message_count() {
        let outcome = advance(Phase::EnergyMap, &SessionData::default(), "ok", 40);
        assert_eq!(outcome.phase, Phase::EnergyMap);
        assert!(!outcome.changed);
    }

    #[test]
    fn test_energy_map_both_lists_on_one_message() {
        let data = data_with(1, 1, 0);
        let message = "I loved leading that workshop, it was draining too";
        let outcome = advance(Phase::EnergyMap, &data, message, 3);

        assert_eq!(outcome.session_data.energizers.len(), 2);
        assert_eq!(outcome.session_data.drainers.len(), 2);
        assert_eq!(outcome.session_data.energizers[1], message);
        assert_eq!(outcome.session_data.drainers[1], message);
        assert_eq!(outcome.phase, Phase::DeepStories);
        assert!(outcome.changed);
    }

    #[test]
    fn test_extraction_is_case_insensitive() {
        let outcome = advance(Phase::EnergyMap, &SessionData::default(), "Meetings FRUSTRATE me", 1);
        assert!(outcome.session_data.energizers.is_empty());
        assert_eq!(outcome.session_data.drainers, vec!["Meetings FRUSTRATE me".to_string()]);
        assert!(outcome.changed);
        assert_eq!(outcome.phase, Phase::EnergyMap);
    }

    #[test]
    fn test_truncates_to_first_hundred_chars() {
        let message = format!("I enjoy {}", "x".repeat(242));
        assert_eq!(message.chars().count(), 250);
        let outcome = advance(Phase::EnergyMap, &SessionData::default(), &message, 1);
        assert_eq!(outcome.session_data.energizers[0], message[..100]);
        assert_eq!(outcome.session_data.energizers[0].chars().count(), 100);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let message = format!("I enjoy {}", "é".repeat(120));
        let outcome = advance(Phase::EnergyMap, &SessionData::default(), &message, 1);
        assert_eq!(outcome.session_data.energizers[0].chars().count(), 100);
    }

    #[test]
    fn test_extraction_only_in_matching_phase() {
        let message = "I love this and I hate that, and here is a long story about my week";
        for phase in [Phase::Intro, Phase::Snapshot, Phase::Patterns, Phase::Statement, Phase::Action] {
            let outcome = advance(phase, &SessionData::default(), message, 0);
            assert_eq!(outcome.session_data, SessionData::default(), "{}", phase);
        }
    }

    #[test]
    fn test_stories_need_more_than_fifty_chars() {
        let short = "x".repeat(50);
        let outcome = advance(Phase::DeepStories, &SessionData::default(), &short, 1);
        assert!(outcome.session_data.stories.is_empty());

        let long = "y".repeat(51);
        let outcome = advance(Phase::DeepStories, &data_with(0, 0, 1), &long, 1);
        assert_eq!(outcome.session_data.stories.len(), 2);
        assert_eq!(outcome.phase, Phase::Patterns);
    }

    #[test]
    fn test_each_call_appends_at_most_once_per_list() {
        let message = "I love love love teaching, I enjoy it, it energizes me";
        let first = advance(Phase::EnergyMap, &SessionData::default(), message, 1);
        assert_eq!(first.session_data.energizers.len(), 1);

        let second = advance(Phase::EnergyMap, &first.session_data, message, 1);
        assert_eq!(second.session_data.energizers.len(), 2);
        assert!(second.session_data.drainers.is_empty());
        // Earlier entries are untouched.
        assert_eq!(second.session_data.energizers[0], first.session_data.energizers[0]);
    }

    #[test]
    fn test_patterns_never_auto_populated() {
        let outcome = advance(Phase::Patterns, &SessionData::default(), "I see a pattern of helping", 1);
        assert!(outcome.session_data.patterns.is_empty());
    }
}
