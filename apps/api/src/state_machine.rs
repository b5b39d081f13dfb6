//! Generation state machine: the legal transition table for artifact status.
//!
//! Storage applies every transition as a compare-and-set against the `from`
//! set computed here, so a second request for an artifact that is already
//! in flight never matches and is rejected instead of queued.

use thiserror::Error;

use crate::jobs::request::UseCase;
use crate::models::artifact::{ArtifactKind, ArtifactStatus};

/// A guarded status change: apply `to` only if the current status is in `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    pub from: &'static [ArtifactStatus],
    pub to: ArtifactStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("a generation is already in flight for this artifact")]
    AlreadyInFlight,

    #[error("artifact is {current} and cannot start this generation")]
    NotReady { current: ArtifactStatus },
}

const RESUME_STARTABLE: &[ArtifactStatus] = &[
    ArtifactStatus::Draft,
    ArtifactStatus::Optimized,
    ArtifactStatus::Failed,
];
const LETTER_STARTABLE: &[ArtifactStatus] = &[
    ArtifactStatus::Draft,
    ArtifactStatus::Generated,
    ArtifactStatus::Failed,
];
const ATS_STARTABLE: &[ArtifactStatus] = &[ArtifactStatus::Optimized];
const RESUME_IN_FLIGHT: &[ArtifactStatus] = &[ArtifactStatus::Processing];
const LETTER_IN_FLIGHT: &[ArtifactStatus] = &[ArtifactStatus::Generating];

/// In-flight status used by each artifact family.
pub fn in_flight_status(kind: ArtifactKind) -> ArtifactStatus {
    match kind {
        ArtifactKind::Resume => ArtifactStatus::Processing,
        ArtifactKind::CoverLetter => ArtifactStatus::Generating,
    }
}

/// Success-terminal status used by each artifact family.
pub fn success_status(kind: ArtifactKind) -> ArtifactStatus {
    match kind {
        ArtifactKind::Resume => ArtifactStatus::Optimized,
        ArtifactKind::CoverLetter => ArtifactStatus::Generated,
    }
}

/// Transition applied when a user requests a new generation.
///
/// Variation batches return `None`: the source letter stays `generated` and
/// every variation is created directly in its terminal state.
pub fn start_plan(use_case: &UseCase) -> Option<TransitionPlan> {
    match use_case {
        UseCase::Optimize => Some(TransitionPlan {
            from: RESUME_STARTABLE,
            to: ArtifactStatus::Processing,
        }),
        UseCase::AtsScore => Some(TransitionPlan {
            from: ATS_STARTABLE,
            to: ArtifactStatus::Processing,
        }),
        UseCase::GenerateCoverLetter => Some(TransitionPlan {
            from: LETTER_STARTABLE,
            to: ArtifactStatus::Generating,
        }),
        UseCase::GenerateVariations { .. } => None,
    }
}

/// `in_flight → success_terminal`. ATS scoring lands back on `optimized`.
pub fn success_plan(kind: ArtifactKind) -> TransitionPlan {
    TransitionPlan {
        from: in_flight_set(kind),
        to: success_status(kind),
    }
}

/// `in_flight → failed`. Content is never touched on this edge.
pub fn failure_plan(kind: ArtifactKind) -> TransitionPlan {
    TransitionPlan {
        from: in_flight_set(kind),
        to: ArtifactStatus::Failed,
    }
}

fn in_flight_set(kind: ArtifactKind) -> &'static [ArtifactStatus] {
    match kind {
        ArtifactKind::Resume => RESUME_IN_FLIGHT,
        ArtifactKind::CoverLetter => LETTER_IN_FLIGHT,
    }
}

impl TransitionPlan {
    pub fn permits(&self, current: ArtifactStatus) -> bool {
        self.from.contains(&current)
    }

    /// Explains why `current` did not match the plan.
    pub fn rejection(&self, current: ArtifactStatus) -> TransitionError {
        if current.is_in_flight() {
            TransitionError::AlreadyInFlight
        } else {
            TransitionError::NotReady { current }
        }
    }

    /// Owned status names, for binding as a SQL text array.
    pub fn from_names(&self) -> Vec<String> {
        self.from.iter().map(|s| s.as_str().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimize_starts_from_draft_terminal_and_failed() {
        let plan = start_plan(&UseCase::Optimize).unwrap();
        assert!(plan.permits(ArtifactStatus::Draft));
        assert!(plan.permits(ArtifactStatus::Optimized));
        assert!(plan.permits(ArtifactStatus::Failed));
        assert_eq!(plan.to, ArtifactStatus::Processing);
    }

    #[test]
    fn test_in_flight_is_rejected_as_conflict() {
        let plan = start_plan(&UseCase::Optimize).unwrap();
        assert!(!plan.permits(ArtifactStatus::Processing));
        assert_eq!(
            plan.rejection(ArtifactStatus::Processing),
            TransitionError::AlreadyInFlight
        );
    }

    #[test]
    fn test_ats_requires_optimized() {
        let plan = start_plan(&UseCase::AtsScore).unwrap();
        assert!(plan.permits(ArtifactStatus::Optimized));
        assert!(!plan.permits(ArtifactStatus::Draft));
        assert_eq!(
            plan.rejection(ArtifactStatus::Draft),
            TransitionError::NotReady {
                current: ArtifactStatus::Draft
            }
        );
    }

    #[test]
    fn test_cover_letter_uses_generating_states() {
        let plan = start_plan(&UseCase::GenerateCoverLetter).unwrap();
        assert_eq!(plan.to, ArtifactStatus::Generating);
        assert!(plan.permits(ArtifactStatus::Generated));
        assert!(!plan.permits(ArtifactStatus::Generating));
        assert_eq!(
            success_plan(ArtifactKind::CoverLetter).to,
            ArtifactStatus::Generated
        );
    }

    #[test]
    fn test_variations_do_not_transition_the_source() {
        assert!(start_plan(&UseCase::GenerateVariations { count: 3 }).is_none());
    }

    #[test]
    fn test_terminal_edges_only_leave_in_flight() {
        let fail = failure_plan(ArtifactKind::Resume);
        assert!(fail.permits(ArtifactStatus::Processing));
        assert!(!fail.permits(ArtifactStatus::Optimized));
        let done = success_plan(ArtifactKind::Resume);
        assert!(!done.permits(ArtifactStatus::Draft));
        assert_eq!(fail.from_names(), vec!["processing".to_string()]);
    }
}
