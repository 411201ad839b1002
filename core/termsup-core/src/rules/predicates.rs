//! Built-in transition predicates.
//!
//! Predicates are data, not closures, so a rule table can be inspected,
//! validated at startup and printed in debug output.

use crate::clock::seconds_between;
use crate::types::{Signal, StateSnapshot, TaskStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `payload.exit_code` equals the value.
    ExitCode(i64),
    /// `payload.exit_code` is present and non-zero.
    ExitCodeNonZero,
    /// The signal's generation is not older than the machine's.
    SameGeneration,
    StatusIn(Vec<TaskStatus>),
    /// Time since `started_at` exceeds the threshold. False when the pane has
    /// no `started_at`.
    RunningDurationGt(f64),
    StateIdAtLeast(u64),
    /// The signal comes from the source that currently owns the pane.
    SourceMatchesCurrent,
    /// Sticky escalation guard: while LONG_RUNNING, a repeat from the owning
    /// source is ignored unless the pane's generation moved past the one in
    /// force at escalation. Only a genuinely new activity burst clears it.
    RejectSameSourceInLongRunning,
}

impl Predicate {
    pub fn name(&self) -> &'static str {
        match self {
            Predicate::ExitCode(_) => "exit_code",
            Predicate::ExitCodeNonZero => "exit_code_nonzero",
            Predicate::SameGeneration => "same_generation",
            Predicate::StatusIn(_) => "status_in",
            Predicate::RunningDurationGt(_) => "running_duration_gt",
            Predicate::StateIdAtLeast(_) => "state_id_at_least",
            Predicate::SourceMatchesCurrent => "source_matches_current",
            Predicate::RejectSameSourceInLongRunning => "reject_same_source_in_long_running",
        }
    }

    pub fn check(&self, signal: &Signal, snapshot: &StateSnapshot) -> bool {
        match self {
            Predicate::ExitCode(code) => signal.payload_i64("exit_code") == Some(*code),
            Predicate::ExitCodeNonZero => signal
                .payload_i64("exit_code")
                .map(|code| code != 0)
                .unwrap_or(false),
            Predicate::SameGeneration => signal.pane_generation >= snapshot.pane_generation,
            Predicate::StatusIn(statuses) => statuses.contains(&snapshot.status),
            Predicate::RunningDurationGt(threshold) => snapshot
                .started_at
                .map(|started| seconds_between(started, snapshot.now) > *threshold)
                .unwrap_or(false),
            Predicate::StateIdAtLeast(min) => snapshot.state_id >= *min,
            Predicate::SourceMatchesCurrent => signal.source == snapshot.source,
            Predicate::RejectSameSourceInLongRunning => {
                if snapshot.status != TaskStatus::LongRunning {
                    return true;
                }
                if signal.source != snapshot.source {
                    return true;
                }
                let escalated = snapshot
                    .escalated_generation
                    .unwrap_or(snapshot.pane_generation);
                signal.pane_generation > escalated
            }
        }
    }
}
