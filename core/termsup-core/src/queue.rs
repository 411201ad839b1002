//! Per-pane actor queue.
//!
//! A bounded FIFO of pending signals for one pane. The queue never blocks a
//! producer: every enqueue returns an [`EnqueueResult`] saying what happened,
//! and overflow is resolved by evicting an unprotected signal rather than by
//! growing. Draining is driven by the manager, which guarantees that only one
//! consumer pops from a given queue at a time.

use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::config::QueueConfig;
use crate::types::Signal;

// ═══════════════════════════════════════════════════════════════════════════════
// Outcomes
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Ok,
    DropStaleGeneration,
    DropLowPriority,
    DropOverflow,
    RejectProtectedFull,
}

impl EnqueueOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnqueueOutcome::Ok => "ok",
            EnqueueOutcome::DropStaleGeneration => "drop_stale_generation",
            EnqueueOutcome::DropLowPriority => "drop_low_priority",
            EnqueueOutcome::DropOverflow => "drop_overflow",
            EnqueueOutcome::RejectProtectedFull => "reject_protected_full",
        }
    }
}

impl std::fmt::Display for EnqueueOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one enqueue did. When the queue was full and an older signal made
/// room, `outcome` is `Ok` for the new signal and `evicted` carries the
/// signal that was dropped with `DropOverflow`.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueResult {
    pub outcome: EnqueueOutcome,
    pub evicted: Option<Signal>,
    pub queue_depth: usize,
}

impl EnqueueResult {
    pub fn accepted(&self) -> bool {
        self.outcome == EnqueueOutcome::Ok
    }
}

/// Cumulative per-pane counters. Never reset while the pane lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounters {
    pub accepted: u64,
    pub stale_drops: u64,
    pub low_priority_drops: u64,
    pub overflow_drops: u64,
    pub protected_rejects: u64,
    pub merged: u64,
}

impl QueueCounters {
    pub fn total_drops(&self) -> u64 {
        self.stale_drops + self.low_priority_drops + self.overflow_drops + self.protected_rejects
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Queue limits resolved once from config and shared by every pane.
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    pub capacity: usize,
    high_watermark_depth: usize,
    low_priority_depth: usize,
    protected: HashSet<String>,
    low_priority: HashSet<String>,
}

impl QueuePolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        let capacity = config.capacity;
        Self {
            capacity,
            high_watermark_depth: ratio_depth(capacity, config.high_watermark),
            low_priority_depth: ratio_depth(capacity, config.low_priority_drop_watermark),
            protected: config.protected_signals.iter().cloned().collect(),
            low_priority: config.low_priority_signals.iter().cloned().collect(),
        }
    }

    pub fn is_protected(&self, signal: &str) -> bool {
        self.protected.contains(signal)
    }

    pub fn is_low_priority(&self, signal: &str) -> bool {
        self.low_priority.contains(signal)
    }
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

fn ratio_depth(capacity: usize, ratio: f64) -> usize {
    let ratio = ratio.clamp(0.0, 1.0);
    ((capacity as f64) * ratio).ceil() as usize
}

// ═══════════════════════════════════════════════════════════════════════════════
// Queue
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ActorQueue {
    pane_id: String,
    policy: Arc<QueuePolicy>,
    pending: VecDeque<Signal>,
    generation: u64,
    counters: QueueCounters,
    above_high_watermark: bool,
}

impl ActorQueue {
    pub fn new(pane_id: impl Into<String>, policy: Arc<QueuePolicy>, generation: u64) -> Self {
        Self {
            pane_id: pane_id.into(),
            policy,
            pending: VecDeque::new(),
            generation,
            counters: QueueCounters::default(),
            above_high_watermark: false,
        }
    }

    pub fn pane_id(&self) -> &str {
        &self.pane_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn counters(&self) -> QueueCounters {
        self.counters
    }

    /// Signal strings of everything pending, oldest first.
    pub fn pending_signals(&self) -> Vec<String> {
        self.pending.iter().map(|signal| signal.signal.clone()).collect()
    }

    /// Raises the generation watermark and drops queued signals that are now
    /// stale. Returns how many were dropped.
    pub fn set_generation(&mut self, generation: u64) -> usize {
        if generation <= self.generation {
            return 0;
        }
        self.generation = generation;
        let before = self.pending.len();
        self.pending
            .retain(|signal| signal.pane_generation >= generation);
        let dropped = before - self.pending.len();
        if dropped > 0 {
            self.counters.stale_drops += dropped as u64;
            tracing::debug!(
                pane_id = %self.pane_id,
                generation,
                dropped,
                "Purged stale queued signals after generation bump"
            );
        }
        dropped
    }

    pub fn enqueue(&mut self, signal: Signal) -> EnqueueResult {
        if signal.pane_generation < self.generation {
            self.counters.stale_drops += 1;
            return self.finish(&signal, EnqueueOutcome::DropStaleGeneration);
        }

        let is_low_priority = self.policy.is_low_priority(&signal.signal);
        if is_low_priority && self.pending.len() >= self.policy.low_priority_depth {
            self.counters.low_priority_drops += 1;
            return self.finish(&signal, EnqueueOutcome::DropLowPriority);
        }

        let mut evicted = None;
        if self.pending.len() >= self.policy.capacity {
            match self.eviction_index() {
                Some(index) => {
                    evicted = self.pending.remove(index);
                    self.counters.overflow_drops += 1;
                    if let Some(dropped) = evicted.as_ref() {
                        tracing::warn!(
                            pane_id = %self.pane_id,
                            signal = %dropped.signal,
                            outcome = EnqueueOutcome::DropOverflow.as_str(),
                            queue_depth = self.pending.len(),
                            overflow_drops = self.counters.overflow_drops,
                            "Queue full, evicted oldest unprotected signal"
                        );
                    }
                }
                None => {
                    self.counters.protected_rejects += 1;
                    return self.finish(&signal, EnqueueOutcome::RejectProtectedFull);
                }
            }
        }

        let log_signal = signal.signal.clone();
        self.pending.push_back(signal);
        self.counters.accepted += 1;
        self.check_high_watermark();

        tracing::debug!(
            pane_id = %self.pane_id,
            signal = %log_signal,
            outcome = EnqueueOutcome::Ok.as_str(),
            queue_depth = self.pending.len(),
            "Signal queued"
        );
        EnqueueResult {
            outcome: EnqueueOutcome::Ok,
            evicted,
            queue_depth: self.pending.len(),
        }
    }

    pub fn pop(&mut self) -> Option<Signal> {
        let signal = self.pending.pop_front();
        if self.above_high_watermark && self.pending.len() < self.policy.high_watermark_depth {
            self.above_high_watermark = false;
        }
        signal
    }

    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        self.above_high_watermark = false;
        count
    }

    /// Collapses each run of consecutive low-priority content signals into its
    /// newest member. Non-content signals keep their relative order.
    pub fn merge_content(&mut self) -> usize {
        let mut merged: VecDeque<Signal> = VecDeque::with_capacity(self.pending.len());
        let mut removed = 0;
        for signal in self.pending.drain(..) {
            let is_content = self.policy.is_low_priority(&signal.signal);
            let replace_last = is_content
                && merged
                    .back()
                    .map(|last| self.policy.is_low_priority(&last.signal))
                    .unwrap_or(false);
            if replace_last {
                merged.pop_back();
                removed += 1;
            }
            merged.push_back(signal);
        }
        self.pending = merged;
        self.counters.merged += removed as u64;
        removed
    }

    fn eviction_index(&self) -> Option<usize> {
        self.pending
            .iter()
            .position(|queued| self.policy.is_low_priority(&queued.signal))
            .or_else(|| {
                self.pending
                    .iter()
                    .position(|queued| !self.policy.is_protected(&queued.signal))
            })
    }

    fn check_high_watermark(&mut self) {
        if self.above_high_watermark || self.policy.high_watermark_depth == 0 {
            return;
        }
        if self.pending.len() >= self.policy.high_watermark_depth {
            self.above_high_watermark = true;
            tracing::warn!(
                pane_id = %self.pane_id,
                queue_depth = self.pending.len(),
                capacity = self.policy.capacity,
                "Queue crossed high watermark"
            );
        }
    }

    fn finish(&self, signal: &Signal, outcome: EnqueueOutcome) -> EnqueueResult {
        tracing::debug!(
            pane_id = %self.pane_id,
            signal = %signal.signal,
            outcome = outcome.as_str(),
            queue_depth = self.pending.len(),
            stale_drops = self.counters.stale_drops,
            low_priority_drops = self.counters.low_priority_drops,
            overflow_drops = self.counters.overflow_drops,
            protected_rejects = self.counters.protected_rejects,
            "Signal not queued"
        );
        EnqueueResult {
            outcome,
            evicted: None,
            queue_depth: self.pending.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;

    fn policy(capacity: usize) -> Arc<QueuePolicy> {
        Arc::new(QueuePolicy::from_config(&QueueConfig {
            capacity,
            ..QueueConfig::default()
        }))
    }

    fn signal(source: &str, event_type: &str, generation: u64) -> Signal {
        Signal::new(source, "%1", event_type, Map::new(), Utc::now()).with_generation(generation)
    }

    #[test]
    fn stale_generation_never_enters_queue() {
        let mut queue = ActorQueue::new("%1", policy(4), 3);
        let result = queue.enqueue(signal("shell", "command_start", 2));
        assert_eq!(result.outcome, EnqueueOutcome::DropStaleGeneration);
        assert!(queue.is_empty());
        assert_eq!(queue.counters().stale_drops, 1);

        assert!(queue.enqueue(signal("shell", "command_start", 3)).accepted());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn full_queue_evicts_oldest_unprotected_signal() {
        let mut queue = ActorQueue::new("%1", policy(3), 1);
        queue.enqueue(signal("shell", "command_end", 1));
        queue.enqueue(signal("claude-code", "PreToolUse", 1));
        queue.enqueue(signal("claude-code", "Stop", 1));

        let result = queue.enqueue(signal("shell", "command_start", 1));
        assert!(result.accepted());
        assert_eq!(
            result.evicted.map(|evicted| evicted.signal),
            Some("claude-code.PreToolUse".to_string())
        );
        assert_eq!(
            queue.pending_signals(),
            vec![
                "shell.command_end".to_string(),
                "claude-code.Stop".to_string(),
                "shell.command_start".to_string(),
            ]
        );
        assert_eq!(queue.counters().overflow_drops, 1);
    }

    #[test]
    fn full_queue_of_protected_signals_rejects_new_signal() {
        let mut queue = ActorQueue::new("%1", policy(2), 1);
        queue.enqueue(signal("shell", "command_end", 1));
        queue.enqueue(signal("claude-code", "Stop", 1));
        let before = queue.pending_signals();

        let result = queue.enqueue(signal("shell", "command_start", 1));
        assert_eq!(result.outcome, EnqueueOutcome::RejectProtectedFull);
        assert_eq!(queue.pending_signals(), before);
        assert_eq!(queue.counters().protected_rejects, 1);
    }

    #[test]
    fn overflow_prefers_evicting_low_priority_signals() {
        let mut queue = ActorQueue::new(
            "%1",
            Arc::new(QueuePolicy::from_config(&QueueConfig {
                capacity: 3,
                low_priority_drop_watermark: 1.0,
                ..QueueConfig::default()
            })),
            1,
        );
        queue.enqueue(signal("shell", "command_start", 1));
        queue.enqueue(signal("content", "changed", 1));
        queue.enqueue(signal("claude-code", "PreToolUse", 1));

        let result = queue.enqueue(signal("claude-code", "Stop", 1));
        assert_eq!(
            result.evicted.map(|evicted| evicted.signal),
            Some("content.changed".to_string())
        );
    }

    #[test]
    fn low_priority_dropped_above_watermark() {
        let mut queue = ActorQueue::new("%1", policy(4), 1);
        queue.enqueue(signal("shell", "command_start", 1));
        queue.enqueue(signal("shell", "command_end", 1));

        let result = queue.enqueue(signal("content", "changed", 1));
        assert_eq!(result.outcome, EnqueueOutcome::DropLowPriority);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.counters().low_priority_drops, 1);
    }

    #[test]
    fn pop_preserves_arrival_order() {
        let mut queue = ActorQueue::new("%1", policy(8), 1);
        queue.enqueue(signal("shell", "command_start", 1));
        queue.enqueue(signal("claude-code", "Stop", 1));
        queue.enqueue(signal("shell", "command_end", 1));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|signal| signal.signal)
            .collect();
        assert_eq!(
            order,
            vec![
                "shell.command_start".to_string(),
                "claude-code.Stop".to_string(),
                "shell.command_end".to_string(),
            ]
        );
    }

    #[test]
    fn merge_content_keeps_newest_of_each_run() {
        let mut queue = ActorQueue::new(
            "%1",
            Arc::new(QueuePolicy::from_config(&QueueConfig {
                capacity: 16,
                low_priority_drop_watermark: 1.0,
                ..QueueConfig::default()
            })),
            1,
        );
        queue.enqueue(signal("content", "changed", 1));
        queue.enqueue(signal("content", "update", 1));
        queue.enqueue(signal("shell", "command_start", 1));
        queue.enqueue(signal("content", "changed", 1));

        assert_eq!(queue.merge_content(), 1);
        assert_eq!(
            queue.pending_signals(),
            vec![
                "content.update".to_string(),
                "shell.command_start".to_string(),
                "content.changed".to_string(),
            ]
        );
    }

    #[test]
    fn generation_bump_purges_queued_stale_signals() {
        let mut queue = ActorQueue::new("%1", policy(8), 1);
        queue.enqueue(signal("shell", "command_start", 1));
        queue.enqueue(signal("shell", "command_end", 2));

        assert_eq!(queue.set_generation(2), 1);
        assert_eq!(queue.pending_signals(), vec!["shell.command_end".to_string()]);
        assert_eq!(queue.set_generation(1), 0);
        assert_eq!(queue.generation(), 2);
    }
}
