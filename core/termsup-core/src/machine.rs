//! Pane state machine.
//!
//! Holds one pane's authoritative status and applies the rule table to each
//! signal. Successful transitions allocate a fresh process-wide `state_id`;
//! every attempt, successful or not, lands in a bounded history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::clock::seconds_between;
use crate::config::MachineConfig;
use crate::ids::{short_id, StateIdAllocator};
use crate::rules::{format_description, RuleDecision, RuleTable};
use crate::types::{HistoryEntry, Signal, StateChange, StateSnapshot, TaskStatus};

pub const DEFAULT_SOURCE: &str = "shell";
pub const INITIAL_GENERATION: u64 = 1;

/// Result of [`PaneStateMachine::process`].
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(StateChange),
    /// Nothing changed. The reason is also recorded in history.
    Rejected(&'static str),
}

impl Transition {
    pub fn change(self) -> Option<StateChange> {
        match self {
            Transition::Applied(change) => Some(change),
            Transition::Rejected(_) => None,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Transition::Applied(_) => "ok",
            Transition::Rejected(reason) => reason,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaneStateMachine {
    pane_id: String,
    status: TaskStatus,
    source: String,
    description: String,
    started_at: Option<DateTime<Utc>>,
    state_id: u64,
    pane_generation: u64,
    escalated_generation: Option<u64>,
    history: VecDeque<HistoryEntry>,
    history_max: usize,
    description_max: usize,
    rules: Arc<RuleTable>,
    ids: Arc<StateIdAllocator>,
}

impl PaneStateMachine {
    pub fn new(
        pane_id: impl Into<String>,
        rules: Arc<RuleTable>,
        ids: Arc<StateIdAllocator>,
        config: &MachineConfig,
    ) -> Self {
        let state_id = ids.allocate();
        Self {
            pane_id: pane_id.into(),
            status: TaskStatus::Idle,
            source: DEFAULT_SOURCE.to_string(),
            description: String::new(),
            started_at: None,
            state_id,
            pane_generation: INITIAL_GENERATION,
            escalated_generation: None,
            history: VecDeque::new(),
            history_max: config.history_max.max(1),
            description_max: config.description_max,
            rules,
            ids,
        }
    }

    pub fn pane_id(&self) -> &str {
        &self.pane_id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn state_id(&self) -> u64 {
        self.state_id
    }

    pub fn pane_generation(&self) -> u64 {
        self.pane_generation
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    /// Most recent `limit` history entries, oldest first.
    pub fn recent_history(&self, limit: usize) -> Vec<HistoryEntry> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> StateSnapshot {
        StateSnapshot {
            status: self.status,
            source: self.source.clone(),
            state_id: self.state_id,
            started_at: self.started_at,
            pane_generation: self.pane_generation,
            escalated_generation: self.escalated_generation,
            now,
        }
    }

    pub fn running_duration(&self, now: DateTime<Utc>) -> f64 {
        self.started_at
            .map(|started| seconds_between(started, now))
            .unwrap_or(0.0)
    }

    /// RUNNING for longer than `threshold_secs`.
    pub fn should_check_long_running(&self, threshold_secs: f64, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Running && self.running_duration(now) > threshold_secs
    }

    pub fn bump_generation(&mut self) -> u64 {
        self.pane_generation += 1;
        tracing::debug!(
            pane_id = %short_id(&self.pane_id),
            generation = self.pane_generation,
            "Pane generation bumped"
        );
        self.pane_generation
    }

    pub fn process(&mut self, signal: &Signal, now: DateTime<Utc>) -> Transition {
        if signal.pane_generation < self.pane_generation {
            tracing::debug!(
                pane_id = %short_id(&self.pane_id),
                signal = %signal.signal,
                signal_generation = signal.pane_generation,
                generation = self.pane_generation,
                "Rejected stale signal"
            );
            return self.reject(signal, "stale_generation", now);
        }

        let snapshot = self.snapshot(now);
        let rule = match self.rules.evaluate(&snapshot, signal) {
            RuleDecision::Apply(rule) => rule.clone(),
            RuleDecision::PredicateFailed { rule, predicate } => {
                tracing::debug!(
                    pane_id = %short_id(&self.pane_id),
                    signal = %signal.signal,
                    rule,
                    predicate,
                    "Transition predicate failed"
                );
                return self.reject(signal, "predicate_failed", now);
            }
            decision => {
                let reason = decision.reason();
                tracing::debug!(
                    pane_id = %short_id(&self.pane_id),
                    signal = %signal.signal,
                    status = %self.status,
                    source = %self.source,
                    reason,
                    "No transition"
                );
                return self.reject(signal, reason, now);
            }
        };

        let old_status = self.status;
        let old_source = self.source.clone();
        let old_started_at = self.started_at;

        let new_source = rule.to_source.resolve(&self.source);
        let description = format_description(&rule.description, &signal.payload, self.description_max);
        let new_started_at = if rule.started_at.should_reset(&old_source, &signal.source) {
            Some(now)
        } else {
            old_started_at
        };
        let running_duration = old_started_at
            .map(|started| seconds_between(started, now))
            .unwrap_or(0.0);

        self.status = rule.to_status;
        self.source = new_source.clone();
        self.description = description.clone();
        self.started_at = new_started_at;
        self.state_id = self.ids.allocate();
        self.escalated_generation = match (old_status, rule.to_status) {
            (_, TaskStatus::LongRunning) if old_status != TaskStatus::LongRunning => {
                Some(self.pane_generation)
            }
            (_, TaskStatus::LongRunning) => self.escalated_generation,
            _ => None,
        };

        self.push_history(HistoryEntry {
            signal: signal.signal.clone(),
            from_status: old_status,
            to_status: self.status,
            from_source: old_source.clone(),
            to_source: new_source.clone(),
            description: description.clone(),
            state_id: self.state_id,
            success: true,
            timestamp: now,
            pane_generation: signal.pane_generation,
        });

        tracing::info!(
            pane_id = %short_id(&self.pane_id),
            signal = %signal.signal,
            rule = %rule.name,
            from = %old_status,
            to = %self.status,
            source = %new_source,
            state_id = self.state_id,
            "Pane transition"
        );

        Transition::Applied(StateChange {
            pane_id: self.pane_id.clone(),
            signal: signal.signal.clone(),
            old_status,
            new_status: self.status,
            old_source,
            new_source,
            description,
            state_id: self.state_id,
            started_at: self.started_at,
            running_duration,
            timestamp: now,
        })
    }

    fn reject(&mut self, signal: &Signal, reason: &'static str, now: DateTime<Utc>) -> Transition {
        self.push_history(HistoryEntry {
            signal: signal.signal.clone(),
            from_status: self.status,
            to_status: self.status,
            from_source: self.source.clone(),
            to_source: self.source.clone(),
            description: reason.to_string(),
            state_id: self.state_id,
            success: false,
            timestamp: now,
            pane_generation: signal.pane_generation,
        });
        Transition::Rejected(reason)
    }

    fn push_history(&mut self, entry: HistoryEntry) {
        while self.history.len() >= self.history_max {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────

    /// Serializable form, keeping only the newest `history_len` entries.
    pub fn to_record(&self, history_len: usize) -> MachineRecord {
        MachineRecord {
            pane_id: self.pane_id.clone(),
            status: self.status,
            source: self.source.clone(),
            description: self.description.clone(),
            started_at: self.started_at,
            state_id: self.state_id,
            pane_generation: self.pane_generation,
            escalated_generation: self.escalated_generation,
            history: self.recent_history(history_len),
        }
    }

    /// Restores a machine. The generation is bumped so signals stamped before
    /// the save are rejected, and the allocator is advanced past every
    /// restored id.
    pub fn from_record(
        record: MachineRecord,
        rules: Arc<RuleTable>,
        ids: Arc<StateIdAllocator>,
        config: &MachineConfig,
    ) -> Self {
        ids.observe(record.state_id);
        for entry in &record.history {
            ids.observe(entry.state_id);
        }

        let history_max = config.history_max.max(1);
        let skip = record.history.len().saturating_sub(history_max);
        let mut machine = Self {
            pane_id: record.pane_id,
            status: record.status,
            source: record.source,
            description: record.description,
            started_at: record.started_at,
            state_id: record.state_id,
            pane_generation: record.pane_generation.max(INITIAL_GENERATION),
            escalated_generation: record.escalated_generation,
            history: record.history.into_iter().skip(skip).collect(),
            history_max,
            description_max: config.description_max,
            rules,
            ids,
        };
        machine.bump_generation();
        machine
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub pane_id: String,
    pub status: TaskStatus,
    pub source: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub state_id: u64,
    #[serde(default = "default_generation")]
    pub pane_generation: u64,
    #[serde(default)]
    pub escalated_generation: Option<u64>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

fn default_generation() -> u64 {
    INITIAL_GENERATION
}
