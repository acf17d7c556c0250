//! Job state machine.
//!
//! Pure logic, no I/O. The transition relation lives here and only here;
//! the engine that binds it to storage is `store::jobs::JobStore::transition`.
//! Workers never compute transitions themselves.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted status of a job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Planning,
    Coding,
    Reviewing,
    PrOpen,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Planning => "PLANNING",
            JobState::Coding => "CODING",
            JobState::Reviewing => "REVIEWING",
            JobState::PrOpen => "PR_OPEN",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named trigger requesting a transition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobEvent {
    StartPlanning,
    Cancel,
    Fail,
    PlanSucceeded,
    PlanFailed,
    CodeSucceeded,
    CodeFailed,
    ReviewApproved,
    ReviewRejected,
    ReviewFailed,
    PrOpened,
    PrFailed,
}

impl JobEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEvent::StartPlanning => "START_PLANNING",
            JobEvent::Cancel => "CANCEL",
            JobEvent::Fail => "FAIL",
            JobEvent::PlanSucceeded => "PLAN_SUCCEEDED",
            JobEvent::PlanFailed => "PLAN_FAILED",
            JobEvent::CodeSucceeded => "CODE_SUCCEEDED",
            JobEvent::CodeFailed => "CODE_FAILED",
            JobEvent::ReviewApproved => "REVIEW_APPROVED",
            JobEvent::ReviewRejected => "REVIEW_REJECTED",
            JobEvent::ReviewFailed => "REVIEW_FAILED",
            JobEvent::PrOpened => "PR_OPENED",
            JobEvent::PrFailed => "PR_FAILED",
        }
    }
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state an event induces from `current`, or `None` when the event is
/// not applicable there.
pub fn next_state(current: JobState, event: JobEvent) -> Option<JobState> {
    use JobEvent::*;
    use JobState::*;

    let next = match (current, event) {
        (Queued, StartPlanning) => Planning,
        (Queued, Cancel) => Cancelled,
        (Queued, Fail) => Failed,

        (Planning, PlanSucceeded) => Coding,
        (Planning, PlanFailed) => Failed,
        (Planning, Cancel) => Cancelled,

        (Coding, CodeSucceeded) => Reviewing,
        (Coding, CodeFailed) => Failed,
        (Coding, Cancel) => Cancelled,

        (Reviewing, ReviewApproved) => PrOpen,
        (Reviewing, ReviewRejected) => Coding,
        (Reviewing, ReviewFailed) => Failed,
        (Reviewing, Cancel) => Cancelled,

        (PrOpen, PrOpened) => Completed,
        (PrOpen, PrFailed) => Failed,

        _ => return None,
    };

    // An event is only valid when its target is in the permitted set for
    // the origin.
    debug_assert!(valid_transitions(current).contains(&next));
    Some(next)
}

/// The permitted target set for a state. Empty for terminals.
pub fn valid_transitions(from: JobState) -> &'static [JobState] {
    use JobState::*;
    match from {
        Queued => &[Planning, Cancelled, Failed],
        Planning => &[Coding, Failed, Cancelled],
        Coding => &[Reviewing, Failed, Cancelled],
        Reviewing => &[PrOpen, Coding, Failed, Cancelled],
        PrOpen => &[Completed, Failed],
        Completed | Failed | Cancelled => &[],
    }
}

/// Whether `from -> to` is permitted by the transition relation.
pub fn is_valid_transition(from: JobState, to: JobState) -> bool {
    valid_transitions(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobEvent::*;
    use JobState::*;

    const ALL_STATES: [JobState; 8] = [
        Queued, Planning, Coding, Reviewing, PrOpen, Completed, Failed, Cancelled,
    ];
    const ALL_EVENTS: [JobEvent; 12] = [
        StartPlanning,
        Cancel,
        Fail,
        PlanSucceeded,
        PlanFailed,
        CodeSucceeded,
        CodeFailed,
        ReviewApproved,
        ReviewRejected,
        ReviewFailed,
        PrOpened,
        PrFailed,
    ];

    #[test]
    fn test_full_transition_table() {
        assert_eq!(next_state(Queued, StartPlanning), Some(Planning));
        assert_eq!(next_state(Queued, Cancel), Some(Cancelled));
        assert_eq!(next_state(Queued, Fail), Some(Failed));
        assert_eq!(next_state(Planning, PlanSucceeded), Some(Coding));
        assert_eq!(next_state(Planning, PlanFailed), Some(Failed));
        assert_eq!(next_state(Planning, Cancel), Some(Cancelled));
        assert_eq!(next_state(Coding, CodeSucceeded), Some(Reviewing));
        assert_eq!(next_state(Coding, CodeFailed), Some(Failed));
        assert_eq!(next_state(Coding, Cancel), Some(Cancelled));
        assert_eq!(next_state(Reviewing, ReviewApproved), Some(PrOpen));
        assert_eq!(next_state(Reviewing, ReviewRejected), Some(Coding));
        assert_eq!(next_state(Reviewing, ReviewFailed), Some(Failed));
        assert_eq!(next_state(Reviewing, Cancel), Some(Cancelled));
        assert_eq!(next_state(PrOpen, PrOpened), Some(Completed));
        assert_eq!(next_state(PrOpen, PrFailed), Some(Failed));
    }

    #[test]
    fn test_terminals_have_no_exits() {
        for state in [Completed, Failed, Cancelled] {
            assert!(valid_transitions(state).is_empty());
            for event in ALL_EVENTS {
                assert_eq!(next_state(state, event), None);
            }
        }
    }

    #[test]
    fn test_inapplicable_events_rejected() {
        assert_eq!(next_state(Queued, PlanSucceeded), None);
        assert_eq!(next_state(Planning, CodeSucceeded), None);
        assert_eq!(next_state(Coding, ReviewApproved), None);
        // PR_OPEN cannot be cancelled; the PR may already exist externally.
        assert_eq!(next_state(PrOpen, Cancel), None);
    }

    #[test]
    fn test_next_state_agrees_with_permitted_sets() {
        for from in ALL_STATES {
            for event in ALL_EVENTS {
                if let Some(to) = next_state(from, event) {
                    assert!(is_valid_transition(from, to), "{from} -> {to} via {event}");
                }
            }
        }
    }

    #[test]
    fn test_rejection_reenters_coding() {
        assert!(is_valid_transition(Reviewing, Coding));
    }

    #[test]
    fn test_state_string_roundtrip() {
        for state in ALL_STATES {
            let json = serde_json::to_string(&state).unwrap();
            let back: JobState = serde_json::from_str(&json).unwrap();
            assert_eq!(back, state);
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
    }

    #[test]
    fn test_event_string_roundtrip() {
        for event in ALL_EVENTS {
            let json = serde_json::to_string(&event).unwrap();
            let back: JobEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back, event);
            assert_eq!(json, format!("\"{}\"", event.as_str()));
        }
    }
}
