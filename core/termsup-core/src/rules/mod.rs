//! Transition rules, predicates and source-priority arbitration.
//!
//! Evaluation is a pure function of `(state snapshot, signal)`: the
//! [`RuleTable`] first checks source priority, then walks the matching rules
//! in order and returns the first whose predicates all pass. A non-match is a
//! normal outcome with a reason string, never an error.

pub mod predicates;
pub mod priority;
pub mod table;
pub mod template;

pub use predicates::Predicate;
pub use priority::SourcePriority;
pub use table::{
    RuleDecision, RuleTable, SourceConstraint, StartedAtPolicy, StatusConstraint, TargetSource,
    TransitionRule, AI_TOOL_SOURCES,
};
pub use template::{format_description, format_elapsed, truncate_with_ellipsis};
