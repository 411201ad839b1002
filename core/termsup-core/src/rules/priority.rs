//! Source-priority arbitration.
//!
//! While a pane is actively claimed (RUNNING, LONG_RUNNING or
//! WAITING_APPROVAL), a signal from a lower-priority source than the owner is
//! ignored. User-interaction sources always win; timer and content fallbacks
//! pass through untouched because they never compete for ownership.

use std::collections::{HashMap, HashSet};

use crate::config::PriorityConfig;
use crate::types::TaskStatus;

#[derive(Debug, Clone)]
pub struct SourcePriority {
    levels: HashMap<String, i32>,
    default_level: i32,
    user_sources: HashSet<String>,
    passthrough_sources: HashSet<String>,
}

impl SourcePriority {
    pub fn from_config(config: &PriorityConfig) -> Self {
        Self {
            levels: config
                .levels
                .iter()
                .map(|(source, level)| (source.clone(), *level))
                .collect(),
            default_level: config.default_level,
            user_sources: config.user_sources.iter().cloned().collect(),
            passthrough_sources: config.passthrough_sources.iter().cloned().collect(),
        }
    }

    pub fn level(&self, source: &str) -> i32 {
        self.levels
            .get(source)
            .copied()
            .unwrap_or(self.default_level)
    }

    pub fn is_user_source(&self, source: &str) -> bool {
        self.user_sources.contains(source)
    }

    pub fn is_passthrough(&self, source: &str) -> bool {
        self.passthrough_sources.contains(source)
    }

    /// Whether a signal from `signal_source` may contend for a pane owned by
    /// `current_source` in `current_status`.
    pub fn allows(&self, current_status: TaskStatus, current_source: &str, signal_source: &str) -> bool {
        if !current_status.is_active() {
            return true;
        }
        if self.is_user_source(signal_source) || self.is_passthrough(signal_source) {
            return true;
        }
        self.level(signal_source) >= self.level(current_source)
    }
}

impl Default for SourcePriority {
    fn default() -> Self {
        Self::from_config(&PriorityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_priority_source_is_ignored_while_active() {
        let priority = SourcePriority::default();
        assert!(!priority.allows(TaskStatus::Running, "claude-code", "shell"));
        assert!(priority.allows(TaskStatus::Running, "shell", "claude-code"));
        assert!(priority.allows(TaskStatus::Running, "shell", "shell"));
    }

    #[test]
    fn inactive_pane_accepts_any_source() {
        let priority = SourcePriority::default();
        assert!(priority.allows(TaskStatus::Done, "claude-code", "shell"));
        assert!(priority.allows(TaskStatus::Idle, "claude-code", "shell"));
    }

    #[test]
    fn user_and_fallback_sources_always_pass() {
        let priority = SourcePriority::default();
        assert!(priority.allows(TaskStatus::WaitingApproval, "claude-code", "iterm"));
        assert!(priority.allows(TaskStatus::WaitingApproval, "claude-code", "frontend"));
        assert!(priority.allows(TaskStatus::Running, "claude-code", "timer"));
        assert!(priority.allows(TaskStatus::LongRunning, "claude-code", "content"));
    }

    #[test]
    fn unknown_sources_use_default_level() {
        let priority = SourcePriority::default();
        assert_eq!(priority.level("aider"), 0);
        assert!(!priority.allows(TaskStatus::Running, "shell", "aider"));
    }
}
