//! The ordered transition rule table.
//!
//! Rules are matched on `(current status, current source, signal string)`.
//! Candidates are tried in table order and the first one whose predicates all
//! pass is applied. A table is validated once when it is built; an
//! inconsistent table is a startup error.

use crate::error::{Result, TermsupError};
use crate::types::{Signal, StateSnapshot, TaskStatus};

use super::predicates::Predicate;
use super::priority::SourcePriority;
use super::template::placeholder_keys;

/// AI tools whose hook events share the same rule shapes.
pub const AI_TOOL_SOURCES: &[&str] = &["claude-code", "gemini", "codex"];

const RUNNING_STATES: &[TaskStatus] = &[TaskStatus::Running, TaskStatus::LongRunning];
const FINISHED_STATES: &[TaskStatus] = &[TaskStatus::Done, TaskStatus::Failed];

// ═══════════════════════════════════════════════════════════════════════════════
// Rule Shape
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum StatusConstraint {
    Any,
    OneOf(Vec<TaskStatus>),
}

impl StatusConstraint {
    fn one_of(statuses: &[TaskStatus]) -> Self {
        StatusConstraint::OneOf(statuses.to_vec())
    }

    pub fn matches(&self, status: TaskStatus) -> bool {
        match self {
            StatusConstraint::Any => true,
            StatusConstraint::OneOf(statuses) => statuses.contains(&status),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceConstraint {
    Any,
    Exact(String),
    /// The pane's current source must equal the signal's source.
    MatchesSignal,
}

impl SourceConstraint {
    pub fn matches(&self, current_source: &str, signal_source: &str) -> bool {
        match self {
            SourceConstraint::Any => true,
            SourceConstraint::Exact(source) => current_source == source,
            SourceConstraint::MatchesSignal => current_source == signal_source,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TargetSource {
    Exact(String),
    KeepCurrent,
}

impl TargetSource {
    pub fn resolve(&self, current_source: &str) -> String {
        match self {
            TargetSource::Exact(source) => source.clone(),
            TargetSource::KeepCurrent => current_source.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartedAtPolicy {
    Reset,
    Preserve,
    /// Reset, unless the pane is already owned by the signal's source. Lets
    /// the sub-events of one ongoing activity keep the original start time.
    ResetUnlessSameSource,
}

impl StartedAtPolicy {
    pub fn should_reset(&self, current_source: &str, signal_source: &str) -> bool {
        match self {
            StartedAtPolicy::Reset => true,
            StartedAtPolicy::Preserve => false,
            StartedAtPolicy::ResetUnlessSameSource => current_source != signal_source,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRule {
    pub name: String,
    pub from_status: StatusConstraint,
    pub from_source: SourceConstraint,
    pub signal: String,
    pub to_status: TaskStatus,
    pub to_source: TargetSource,
    pub description: String,
    pub started_at: StartedAtPolicy,
    pub predicates: Vec<Predicate>,
}

impl TransitionRule {
    pub fn new(name: impl Into<String>, signal: impl Into<String>, to_status: TaskStatus) -> Self {
        Self {
            name: name.into(),
            from_status: StatusConstraint::Any,
            from_source: SourceConstraint::Any,
            signal: signal.into(),
            to_status,
            to_source: TargetSource::KeepCurrent,
            description: String::new(),
            started_at: StartedAtPolicy::Preserve,
            predicates: Vec::new(),
        }
    }

    pub fn from_status(mut self, statuses: &[TaskStatus]) -> Self {
        self.from_status = StatusConstraint::one_of(statuses);
        self
    }

    pub fn from_source(mut self, constraint: SourceConstraint) -> Self {
        self.from_source = constraint;
        self
    }

    pub fn to_source(mut self, source: &str) -> Self {
        self.to_source = TargetSource::Exact(source.to_string());
        self
    }

    pub fn describe(mut self, template: &str) -> Self {
        self.description = template.to_string();
        self
    }

    pub fn started_at(mut self, policy: StartedAtPolicy) -> Self {
        self.started_at = policy;
        self
    }

    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn matches(&self, snapshot: &StateSnapshot, signal: &Signal) -> bool {
        self.signal == signal.signal
            && self.from_status.matches(snapshot.status)
            && self.from_source.matches(&snapshot.source, &signal.source)
    }

    /// First failing predicate, if any.
    pub fn failing_predicate(&self, signal: &Signal, snapshot: &StateSnapshot) -> Option<&Predicate> {
        self.predicates
            .iter()
            .find(|predicate| !predicate.check(signal, snapshot))
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("rule name is empty".to_string());
        }
        match self.signal.split_once('.') {
            Some((source, event)) if !source.is_empty() && !event.is_empty() => {}
            _ => return Err(format!("signal {:?} is not source.event", self.signal)),
        }
        if let StatusConstraint::OneOf(statuses) = &self.from_status {
            if statuses.is_empty() {
                return Err("from_status allows no status".to_string());
            }
        }
        if let SourceConstraint::Exact(source) = &self.from_source {
            if source.is_empty() {
                return Err("from_source is empty".to_string());
            }
        }
        if let TargetSource::Exact(source) = &self.to_source {
            if source.is_empty() {
                return Err("to_source is empty".to_string());
            }
        }
        if self.description.matches('{').count() != self.description.matches('}').count() {
            return Err("description template has unbalanced braces".to_string());
        }

        let has_exact_exit = self
            .predicates
            .iter()
            .any(|predicate| matches!(predicate, Predicate::ExitCode(0)));
        let has_nonzero_exit = self
            .predicates
            .iter()
            .any(|predicate| matches!(predicate, Predicate::ExitCodeNonZero));
        if has_exact_exit && has_nonzero_exit {
            return Err("exit_code(0) and exit_code_nonzero can never both hold".to_string());
        }

        for predicate in &self.predicates {
            match predicate {
                Predicate::RunningDurationGt(seconds) if !seconds.is_finite() || *seconds < 0.0 => {
                    return Err(format!("running_duration_gt({}) is not a valid threshold", seconds));
                }
                Predicate::StatusIn(statuses) => {
                    if statuses.is_empty() {
                        return Err("status_in allows no status".to_string());
                    }
                    if let StatusConstraint::OneOf(allowed) = &self.from_status {
                        if !statuses.iter().any(|status| allowed.contains(status)) {
                            return Err("status_in is disjoint from from_status".to_string());
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Decisions
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum RuleDecision<'a> {
    Apply(&'a TransitionRule),
    PriorityTooLow,
    NoRuleMatched,
    PredicateFailed {
        rule: &'a str,
        predicate: &'static str,
    },
}

impl RuleDecision<'_> {
    /// History/debug reason for a non-applied decision.
    pub fn reason(&self) -> &'static str {
        match self {
            RuleDecision::Apply(_) => "ok",
            RuleDecision::PriorityTooLow => "priority_too_low",
            RuleDecision::NoRuleMatched => "no_rule_matched",
            RuleDecision::PredicateFailed { .. } => "predicate_failed",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Table
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<TransitionRule>,
    priority: SourcePriority,
}

impl RuleTable {
    /// Builds a table from explicit rules, failing on the first inconsistent
    /// rule.
    pub fn new(rules: Vec<TransitionRule>, priority: SourcePriority) -> Result<Self> {
        for rule in &rules {
            rule.validate()
                .map_err(|details| TermsupError::InvalidRuleTable {
                    rule: rule.name.clone(),
                    details,
                })?;
        }
        Ok(Self { rules, priority })
    }

    /// The built-in table covering shell, AI-tool, timer, user, content and
    /// heuristic signals.
    pub fn standard(priority: SourcePriority) -> Result<Self> {
        Self::new(standard_rules(), priority)
    }

    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }

    pub fn priority(&self) -> &SourcePriority {
        &self.priority
    }

    /// Rules whose status, source and signal constraints match, in order.
    pub fn candidates<'a>(
        &'a self,
        snapshot: &'a StateSnapshot,
        signal: &'a Signal,
    ) -> impl Iterator<Item = &'a TransitionRule> + 'a {
        self.rules
            .iter()
            .filter(move |rule| rule.matches(snapshot, signal))
    }

    pub fn evaluate<'a>(&'a self, snapshot: &StateSnapshot, signal: &Signal) -> RuleDecision<'a> {
        if !self
            .priority
            .allows(snapshot.status, &snapshot.source, &signal.source)
        {
            return RuleDecision::PriorityTooLow;
        }

        let mut first_failure: Option<RuleDecision<'a>> = None;
        for rule in self.rules.iter().filter(|rule| rule.matches(snapshot, signal)) {
            match rule.failing_predicate(signal, snapshot) {
                None => return RuleDecision::Apply(rule),
                Some(predicate) => {
                    if first_failure.is_none() {
                        first_failure = Some(RuleDecision::PredicateFailed {
                            rule: &rule.name,
                            predicate: predicate.name(),
                        });
                    }
                }
            }
        }
        first_failure.unwrap_or(RuleDecision::NoRuleMatched)
    }

    /// Signal strings the table knows about, deduplicated, in table order.
    pub fn known_signals(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for rule in &self.rules {
            if !seen.contains(&rule.signal.as_str()) {
                seen.push(rule.signal.as_str());
            }
        }
        seen
    }

    /// Placeholder keys used by any rule for `signal`.
    pub fn description_keys(&self, signal: &str) -> Vec<String> {
        self.rules
            .iter()
            .filter(|rule| rule.signal == signal)
            .flat_map(|rule| placeholder_keys(&rule.description))
            .collect()
    }
}

fn standard_rules() -> Vec<TransitionRule> {
    let mut rules = vec![
        TransitionRule::new("S1", "shell.command_start", TaskStatus::Running)
            .to_source("shell")
            .describe("Running: {command:30}")
            .started_at(StartedAtPolicy::Reset)
            .predicate(Predicate::RejectSameSourceInLongRunning),
        TransitionRule::new("S2", "shell.command_end", TaskStatus::Done)
            .from_status(RUNNING_STATES)
            .from_source(SourceConstraint::Exact("shell".to_string()))
            .to_source("shell")
            .describe("Command finished")
            .predicate(Predicate::ExitCode(0)),
        TransitionRule::new("S3", "shell.command_end", TaskStatus::Failed)
            .from_status(RUNNING_STATES)
            .from_source(SourceConstraint::Exact("shell".to_string()))
            .to_source("shell")
            .describe("Failed (exit={exit_code})")
            .predicate(Predicate::ExitCodeNonZero),
    ];

    for tool in AI_TOOL_SOURCES {
        rules.extend(ai_tool_rules(tool));
    }

    rules.extend([
        TransitionRule::new("T1", "timer.check", TaskStatus::LongRunning)
            .from_status(&[TaskStatus::Running])
            .describe("Running for {elapsed}"),
        TransitionRule::new("T2", "timer.waiting_fallback_running", TaskStatus::Running)
            .from_status(&[TaskStatus::WaitingApproval])
            .describe("Resumed after approval timeout"),
        TransitionRule::new("T3", "timer.waiting_fallback_idle", TaskStatus::Idle)
            .from_status(&[TaskStatus::WaitingApproval])
            .started_at(StartedAtPolicy::Reset),
    ]);

    for signal in ["iterm.focus", "frontend.click_pane"] {
        rules.push(
            TransitionRule::new("U1", signal, TaskStatus::Idle)
                .from_status(&[TaskStatus::WaitingApproval])
                .to_source("user")
                .started_at(StartedAtPolicy::Reset),
        );
        rules.push(
            TransitionRule::new("U2", signal, TaskStatus::Idle)
                .from_status(FINISHED_STATES)
                .to_source("user")
                .started_at(StartedAtPolicy::Reset),
        );
    }

    for signal in ["content.update", "content.changed"] {
        rules.push(
            TransitionRule::new("R1", signal, TaskStatus::Running)
                .from_status(&[TaskStatus::WaitingApproval])
                .describe("Output resumed"),
        );
    }

    rules.extend([
        TransitionRule::new("H1", "content.heuristic_run", TaskStatus::Running)
            .from_status(&[TaskStatus::Idle, TaskStatus::Done, TaskStatus::Failed])
            .to_source("content")
            .describe("Running")
            .started_at(StartedAtPolicy::Reset),
        TransitionRule::new("H2", "content.heuristic_done", TaskStatus::Done)
            .from_status(RUNNING_STATES)
            .to_source("content")
            .describe("Finished"),
        TransitionRule::new("H3", "content.heuristic_wait", TaskStatus::WaitingApproval)
            .from_status(RUNNING_STATES)
            .to_source("content")
            .describe("Waiting for input"),
        TransitionRule::new("H4", "content.heuristic_idle", TaskStatus::Idle)
            .from_status(RUNNING_STATES)
            .to_source("content")
            .started_at(StartedAtPolicy::Reset),
    ]);

    rules
}

fn ai_tool_rules(tool: &str) -> Vec<TransitionRule> {
    vec![
        TransitionRule::new("C1", format!("{tool}.SessionStart"), TaskStatus::Running)
            .to_source(tool)
            .describe("Session started")
            .started_at(StartedAtPolicy::Reset)
            .predicate(Predicate::RejectSameSourceInLongRunning),
        TransitionRule::new("C2", format!("{tool}.PreToolUse"), TaskStatus::Running)
            .to_source(tool)
            .describe("Tool: {tool_name:30}")
            .started_at(StartedAtPolicy::ResetUnlessSameSource)
            .predicate(Predicate::RejectSameSourceInLongRunning),
        TransitionRule::new("C3", format!("{tool}.Stop"), TaskStatus::Done)
            .from_status(RUNNING_STATES)
            .from_source(SourceConstraint::Exact(tool.to_string()))
            .to_source(tool)
            .describe("Reply finished"),
        TransitionRule::new(
            "C4",
            format!("{tool}.Notification:permission_prompt"),
            TaskStatus::WaitingApproval,
        )
        .to_source(tool)
        .describe("Needs permission"),
        TransitionRule::new(
            "C5",
            format!("{tool}.Notification:idle_prompt"),
            TaskStatus::Idle,
        )
        .to_source(tool)
        .started_at(StartedAtPolicy::Reset),
        TransitionRule::new("C6", format!("{tool}.SessionEnd"), TaskStatus::Idle)
            .to_source(tool)
            .started_at(StartedAtPolicy::Reset),
    ]
}
