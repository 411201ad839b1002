//! State manager: the pane registry and everything that drives it.
//!
//! Each pane owns an [`ActorQueue`], a [`PaneStateMachine`] and a
//! [`PaneDisplay`]. Producers only ever touch the queue; a drain pops signals
//! one at a time and applies them under the pane's core lock. A per-pane
//! `draining` flag keeps drains non-reentrant, so a pane never processes two
//! signals at once while different panes proceed independently.
//!
//! Lock order is pane core, then queue, then scheduler. Subscriber callbacks
//! always run after every pane lock has been released.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::clock::{duration_from_secs_f64, seconds_between, Clock};
use crate::config::{MachineConfig, RuntimeConfig, TimingConfig};
use crate::display::{
    cancel_pane_tasks, dismiss_task_name, DelayedAction, DisplayPolicy, DisplayUpdate, PaneDisplay,
};
use crate::ids::{normalize_pane_id, short_id, StateIdAllocator};
use crate::machine::{PaneStateMachine, Transition};
use crate::persistence::EngineSnapshot;
use crate::queue::{ActorQueue, EnqueueResult, QueueCounters, QueuePolicy};
use crate::rules::{format_elapsed, RuleTable};
use crate::timer::DelayScheduler;
use crate::types::{
    DisplayNotification, DisplayState, HistoryEntry, PaneStatus, Signal, StateChange, TaskStatus,
};

pub type DisplayCallback = Box<dyn Fn(&DisplayNotification) + Send + Sync>;
pub type DebugCallback = Box<dyn Fn(&DebugEvent) + Send + Sync>;

const CONTENT_SIGNALS: &[&str] = &["content.changed", "content.update"];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Observability Types
// ═══════════════════════════════════════════════════════════════════════════════

/// One processed (or refused) signal, for debug subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugEvent {
    pub pane_id: String,
    pub signal: String,
    /// `ok`, `fail`, or the queue outcome that refused the signal.
    pub result: String,
    pub reason: String,
    pub state_id: u64,
    pub queue_depth: usize,
    pub queue_low_priority_drops: u64,
    pub queue_overflow_drops: u64,
    pub queue_stale_drops: u64,
    pub queue_protected_rejects: u64,
}

/// Bookkeeping for a pane sitting in WAITING_APPROVAL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WaitingFallback {
    pub entered_at: DateTime<Utc>,
    pub state_id: u64,
    pub has_content_change: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerMetrics {
    pub signals_processed: u64,
    pub transitions: u64,
    pub rejections: u64,
    pub delayed_actions: u64,
}

#[derive(Debug, Default)]
struct MetricCounters {
    signals_processed: AtomicU64,
    transitions: AtomicU64,
    rejections: AtomicU64,
    delayed_actions: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineView {
    pub status: TaskStatus,
    pub source: String,
    pub description: String,
    pub started_at: Option<DateTime<Utc>>,
    pub state_id: u64,
    pub pane_generation: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueView {
    pub depth: usize,
    pub generation: u64,
    pub pending: Vec<String>,
    pub counters: QueueCounters,
}

/// Full introspection view of one pane.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaneDebugSnapshot {
    pub pane_id: String,
    pub machine: MachineView,
    pub display: DisplayState,
    pub queue: QueueView,
    pub waiting_fallback: Option<WaitingFallback>,
    pub history: Vec<HistoryEntry>,
    pub focused: bool,
}

/// Compact per-pane row for paginated listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaneSummary {
    pub pane_id: String,
    pub status: TaskStatus,
    pub source: String,
    pub state_id: u64,
    pub description: String,
    pub running_duration: f64,
    pub queue_depth: usize,
    pub queue_low_priority_drops: u64,
    pub queue_overflow_drops: u64,
    pub latest_history: Option<HistoryEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub processed: usize,
    pub changes: Vec<StateChange>,
}

impl DrainReport {
    fn merge(&mut self, other: DrainReport) {
        self.processed += other.processed;
        self.changes.extend(other.changes);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub delayed_actions: usize,
    pub long_running: Vec<String>,
    pub waiting_fallbacks: Vec<String>,
    pub changes: Vec<StateChange>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Pane Registry Entries
// ═══════════════════════════════════════════════════════════════════════════════

struct PaneCore {
    machine: PaneStateMachine,
    display: PaneDisplay,
    waiting: Option<WaitingFallback>,
}

struct PaneEntry {
    queue: Mutex<ActorQueue>,
    core: Mutex<PaneCore>,
    draining: AtomicBool,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Output of one processing step, dispatched once locks are released.
#[derive(Default)]
struct Effects {
    notifications: Vec<DisplayNotification>,
    debug: Vec<DebugEvent>,
    changes: Vec<StateChange>,
}

impl Effects {
    fn extend(&mut self, other: Effects) {
        self.notifications.extend(other.notifications);
        self.debug.extend(other.debug);
        self.changes.extend(other.changes);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// State Manager
// ═══════════════════════════════════════════════════════════════════════════════

pub struct StateManager {
    rules: Arc<RuleTable>,
    ids: Arc<StateIdAllocator>,
    queue_policy: Arc<QueuePolicy>,
    display_policy: DisplayPolicy,
    machine_config: MachineConfig,
    timing: TimingConfig,
    clock: Arc<dyn Clock>,
    panes: RwLock<HashMap<String, Arc<PaneEntry>>>,
    scheduler: Mutex<DelayScheduler<DelayedAction>>,
    focused: RwLock<Option<String>>,
    display_subscribers: RwLock<Vec<DisplayCallback>>,
    debug_subscribers: RwLock<Vec<DebugCallback>>,
    metrics: MetricCounters,
}

impl StateManager {
    pub fn new(config: &RuntimeConfig, rules: Arc<RuleTable>, clock: Arc<dyn Clock>) -> Self {
        Self {
            rules,
            ids: Arc::new(StateIdAllocator::new()),
            queue_policy: Arc::new(QueuePolicy::from_config(&config.queue)),
            display_policy: DisplayPolicy::from_config(&config.timing),
            machine_config: config.machine.clone(),
            timing: config.timing.clone(),
            clock,
            panes: RwLock::new(HashMap::new()),
            scheduler: Mutex::new(DelayScheduler::new()),
            focused: RwLock::new(None),
            display_subscribers: RwLock::new(Vec::new()),
            debug_subscribers: RwLock::new(Vec::new()),
            metrics: MetricCounters::default(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn get(&self, pane_id: &str) -> Option<Arc<PaneEntry>> {
        read(&self.panes).get(pane_id).cloned()
    }

    fn get_or_create(&self, pane_id: &str) -> Arc<PaneEntry> {
        if let Some(entry) = self.get(pane_id) {
            return entry;
        }
        let mut panes = write(&self.panes);
        panes
            .entry(pane_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(pane_id = %short_id(pane_id), "Created pane");
                let machine = PaneStateMachine::new(
                    pane_id,
                    Arc::clone(&self.rules),
                    Arc::clone(&self.ids),
                    &self.machine_config,
                );
                Arc::new(self.entry_for(machine, PaneDisplay::new(pane_id)))
            })
            .clone()
    }

    fn entry_for(&self, machine: PaneStateMachine, display: PaneDisplay) -> PaneEntry {
        let queue = ActorQueue::new(
            machine.pane_id(),
            Arc::clone(&self.queue_policy),
            machine.pane_generation(),
        );
        PaneEntry {
            queue: Mutex::new(queue),
            core: Mutex::new(PaneCore {
                machine,
                display,
                waiting: None,
            }),
            draining: AtomicBool::new(false),
        }
    }

    fn entries(&self) -> Vec<(String, Arc<PaneEntry>)> {
        let mut entries: Vec<_> = read(&self.panes)
            .iter()
            .map(|(pane_id, entry)| (pane_id.clone(), Arc::clone(entry)))
            .collect();
        entries.sort_by(|left, right| left.0.cmp(&right.0));
        entries
    }

    // ─────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────

    /// Registers a callback for every visible display change. Callbacks run
    /// on the thread that caused the change and must not call back into
    /// `subscribe`.
    pub fn subscribe(&self, callback: DisplayCallback) {
        write(&self.display_subscribers).push(callback);
    }

    pub fn subscribe_debug(&self, callback: DebugCallback) {
        write(&self.debug_subscribers).push(callback);
    }

    fn dispatch(&self, effects: Effects) {
        if !effects.notifications.is_empty() {
            let subscribers = read(&self.display_subscribers);
            for notification in &effects.notifications {
                for callback in subscribers.iter() {
                    callback(notification);
                }
            }
        }
        if !effects.debug.is_empty() {
            let subscribers = read(&self.debug_subscribers);
            for event in &effects.debug {
                for callback in subscribers.iter() {
                    callback(event);
                }
            }
        }
    }

    fn debug_event(
        &self,
        entry: &PaneEntry,
        pane_id: &str,
        signal: &str,
        result: &str,
        reason: &str,
        state_id: u64,
    ) -> DebugEvent {
        let (queue_depth, counters) = {
            let queue = lock(&entry.queue);
            (queue.len(), queue.counters())
        };
        DebugEvent {
            pane_id: pane_id.to_string(),
            signal: signal.to_string(),
            result: result.to_string(),
            reason: reason.to_string(),
            state_id,
            queue_depth,
            queue_low_priority_drops: counters.low_priority_drops,
            queue_overflow_drops: counters.overflow_drops,
            queue_stale_drops: counters.stale_drops,
            queue_protected_rejects: counters.protected_rejects,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Focus
    // ─────────────────────────────────────────────────────────────────────

    pub fn set_focus(&self, pane_id: Option<&str>) {
        *write(&self.focused) = pane_id.map(normalize_pane_id);
    }

    pub fn focused_pane(&self) -> Option<String> {
        read(&self.focused).clone()
    }

    pub fn is_focused(&self, pane_id: &str) -> bool {
        read(&self.focused).as_deref() == Some(pane_id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Enqueue / Drain
    // ─────────────────────────────────────────────────────────────────────

    /// Queues a signal for its pane, creating the pane on first sight. An
    /// unstamped signal (generation 0) gets the pane's current generation.
    pub fn enqueue(&self, mut signal: Signal) -> EnqueueResult {
        let pane_id = normalize_pane_id(&signal.pane_id);
        signal.pane_id = pane_id.clone();
        let signal_name = signal.signal.clone();
        let entry = self.get_or_create(&pane_id);

        let result = {
            let mut queue = lock(&entry.queue);
            if signal.pane_generation == 0 {
                signal.pane_generation = queue.generation();
            }
            queue.enqueue(signal)
        };

        if !result.accepted() {
            let state_id = lock(&entry.core).machine.state_id();
            let event = self.debug_event(
                &entry,
                &pane_id,
                &signal_name,
                result.outcome.as_str(),
                "",
                state_id,
            );
            self.dispatch(Effects {
                debug: vec![event],
                ..Effects::default()
            });
        }
        result
    }

    /// Processes everything queued for one pane. Returns immediately if
    /// another thread is already draining it.
    pub fn drain_pane(&self, pane_id: &str) -> DrainReport {
        let pane_id = normalize_pane_id(pane_id);
        match self.get(&pane_id) {
            Some(entry) => self.drain_entry(&pane_id, &entry),
            None => DrainReport::default(),
        }
    }

    /// One drain pass over every pane.
    pub fn drain_all(&self) -> DrainReport {
        let mut report = DrainReport::default();
        for (pane_id, entry) in self.entries() {
            report.merge(self.drain_entry(&pane_id, &entry));
        }
        report
    }

    fn drain_entry(&self, pane_id: &str, entry: &PaneEntry) -> DrainReport {
        if entry
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!(pane_id = %short_id(pane_id), "Drain already in progress");
            return DrainReport::default();
        }
        let _guard = DrainGuard(&entry.draining);

        lock(&entry.queue).merge_content();

        let mut report = DrainReport::default();
        loop {
            let Some(signal) = lock(&entry.queue).pop() else {
                break;
            };
            let effects = {
                let mut core = lock(&entry.core);
                self.process_locked(pane_id, entry, &mut core, &signal)
            };
            report.processed += 1;
            report.changes.extend(effects.changes.iter().cloned());
            self.dispatch(effects);
        }
        report
    }

    fn process_locked(
        &self,
        pane_id: &str,
        entry: &PaneEntry,
        core: &mut PaneCore,
        signal: &Signal,
    ) -> Effects {
        let now = self.now();
        self.metrics.signals_processed.fetch_add(1, Ordering::Relaxed);

        if !CONTENT_SIGNALS.contains(&signal.signal.as_str()) {
            return self.apply_signal(pane_id, entry, core, signal, now);
        }

        // Content never drives a transition on its own; it only refreshes the
        // cache and can resume a pane stuck waiting for approval.
        if let Some(hash) = signal.payload_str("content_hash") {
            core.display.set_content_hash(hash);
        }
        if core.machine.status() != TaskStatus::WaitingApproval {
            return Effects::default();
        }
        if let Some(waiting) = core.waiting.as_mut() {
            waiting.has_content_change = true;
        }
        tracing::debug!(pane_id = %short_id(pane_id), "Content changed while waiting, resuming");
        let resumed = signal.renamed("update");
        self.apply_signal(pane_id, entry, core, &resumed, now)
    }

    fn apply_signal(
        &self,
        pane_id: &str,
        entry: &PaneEntry,
        core: &mut PaneCore,
        signal: &Signal,
        now: DateTime<Utc>,
    ) -> Effects {
        let mut effects = Effects::default();
        let old_status = core.machine.status();

        match core.machine.process(signal, now) {
            Transition::Applied(change) => {
                self.metrics.transitions.fetch_add(1, Ordering::Relaxed);
                if change.new_status == TaskStatus::WaitingApproval {
                    core.waiting = Some(WaitingFallback {
                        entered_at: now,
                        state_id: change.state_id,
                        has_content_change: false,
                    });
                } else if old_status == TaskStatus::WaitingApproval {
                    core.waiting = None;
                }

                let focused = self.is_focused(pane_id);
                let update = {
                    let mut scheduler = lock(&self.scheduler);
                    core.display
                        .apply_change(&change, focused, now, &self.display_policy, &mut scheduler)
                };
                if let DisplayUpdate::Shown(notification) = update {
                    effects.notifications.push(notification);
                }
                effects.debug.push(self.debug_event(
                    entry,
                    pane_id,
                    &signal.signal,
                    "ok",
                    "",
                    change.state_id,
                ));
                effects.changes.push(change);
            }
            Transition::Rejected(reason) => {
                self.metrics.rejections.fetch_add(1, Ordering::Relaxed);
                effects.debug.push(self.debug_event(
                    entry,
                    pane_id,
                    &signal.signal,
                    "fail",
                    reason,
                    core.machine.state_id(),
                ));
            }
        }
        effects
    }

    // ─────────────────────────────────────────────────────────────────────
    // Periodic Work
    // ─────────────────────────────────────────────────────────────────────

    /// Fires due display tasks, escalates long-running panes and resolves
    /// expired approval waits.
    pub fn tick(&self) -> TickReport {
        let now = self.now();
        let mut report = TickReport::default();

        let due = lock(&self.scheduler).take_due(now);
        for (task, action) in due {
            let pane_id = action.pane_id().to_string();
            let Some(entry) = self.get(&pane_id) else {
                tracing::trace!(task = %task, "Dropped display task for removed pane");
                continue;
            };
            let focused = self.is_focused(&pane_id);
            let notification = {
                let mut core = lock(&entry.core);
                let mut scheduler = lock(&self.scheduler);
                match action {
                    DelayedAction::RevealDisplay { change, .. } => core.display.reveal(
                        &change,
                        focused,
                        now,
                        &self.display_policy,
                        &mut scheduler,
                    ),
                    DelayedAction::AutoDismiss { state_id, .. } => {
                        core.display
                            .auto_dismiss(state_id, now, &self.display_policy, &mut scheduler)
                    }
                    DelayedAction::ClearRecentlyFinished { state_id, .. } => {
                        core.display.clear_recently_finished(state_id)
                    }
                }
            };
            report.delayed_actions += 1;
            self.metrics.delayed_actions.fetch_add(1, Ordering::Relaxed);
            if let Some(notification) = notification {
                self.dispatch(Effects {
                    notifications: vec![notification],
                    ..Effects::default()
                });
            }
        }

        for (pane_id, entry) in self.entries() {
            let effects = {
                let mut core = lock(&entry.core);
                let mut effects = Effects::default();

                let escalation = self.check_long_running(&pane_id, &entry, &mut core, now);
                if !escalation.changes.is_empty() {
                    report.long_running.push(pane_id.clone());
                }
                effects.extend(escalation);

                let fallback = self.check_waiting_fallback(&pane_id, &entry, &mut core, now);
                if !fallback.changes.is_empty() {
                    report.waiting_fallbacks.push(pane_id.clone());
                }
                effects.extend(fallback);
                effects
            };
            report.changes.extend(effects.changes.iter().cloned());
            self.dispatch(effects);
        }
        report
    }

    fn check_long_running(
        &self,
        pane_id: &str,
        entry: &PaneEntry,
        core: &mut PaneCore,
        now: DateTime<Utc>,
    ) -> Effects {
        if !core
            .machine
            .should_check_long_running(self.timing.long_running_threshold_secs, now)
        {
            return Effects::default();
        }
        let duration = core.machine.running_duration(now);
        let signal = Signal::new(
            "timer",
            pane_id,
            "check",
            payload(json!({
                "elapsed": format_elapsed(duration),
                "duration": duration,
            })),
            now,
        )
        .with_generation(core.machine.pane_generation());
        self.apply_signal(pane_id, entry, core, &signal, now)
    }

    fn check_waiting_fallback(
        &self,
        pane_id: &str,
        entry: &PaneEntry,
        core: &mut PaneCore,
        now: DateTime<Utc>,
    ) -> Effects {
        let Some(waiting) = core.waiting else {
            return Effects::default();
        };
        if core.machine.status() != TaskStatus::WaitingApproval {
            core.waiting = None;
            return Effects::default();
        }
        let elapsed = seconds_between(waiting.entered_at, now);
        if elapsed < self.timing.waiting_fallback_timeout_secs {
            return Effects::default();
        }

        let (event_type, reason) =
            if waiting.has_content_change && self.timing.waiting_fallback_to_running {
                ("waiting_fallback_running", "timeout_with_content")
            } else {
                ("waiting_fallback_idle", "timeout_no_content")
            };
        let signal = Signal::new(
            "timer",
            pane_id,
            event_type,
            payload(json!({
                "reason": reason,
                "has_content_change": waiting.has_content_change,
                "elapsed": elapsed,
            })),
            now,
        )
        .with_generation(core.machine.pane_generation());

        let effects = self.apply_signal(pane_id, entry, core, &signal, now);
        match effects.changes.first() {
            Some(change) => tracing::info!(
                pane_id = %short_id(pane_id),
                to = %change.new_status,
                reason,
                elapsed_secs = elapsed,
                "Waiting fallback applied"
            ),
            None => tracing::warn!(
                pane_id = %short_id(pane_id),
                signal = %signal.signal,
                "Waiting fallback found no transition"
            ),
        }
        core.waiting = None;
        effects
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Starts a new process epoch for a pane. Queued signals from the old
    /// epoch are purged.
    pub fn bump_generation(&self, pane_id: &str) -> u64 {
        let pane_id = normalize_pane_id(pane_id);
        let entry = self.get_or_create(&pane_id);
        let (generation, purged) = {
            let mut core = lock(&entry.core);
            let mut queue = lock(&entry.queue);
            let generation = core.machine.bump_generation();
            (generation, queue.set_generation(generation))
        };
        tracing::info!(
            pane_id = %short_id(&pane_id),
            generation,
            purged,
            "Bumped pane generation"
        );
        generation
    }

    pub fn generation(&self, pane_id: &str) -> Option<u64> {
        self.get(&normalize_pane_id(pane_id))
            .map(|entry| lock(&entry.core).machine.pane_generation())
    }

    pub fn status(&self, pane_id: &str) -> Option<TaskStatus> {
        self.get(&normalize_pane_id(pane_id))
            .map(|entry| lock(&entry.core).machine.status())
    }

    pub fn remove_pane(&self, pane_id: &str) -> bool {
        let pane_id = normalize_pane_id(pane_id);
        let removed = write(&self.panes).remove(&pane_id).is_some();
        if removed {
            cancel_pane_tasks(&mut lock(&self.scheduler), &pane_id);
            let mut focused = write(&self.focused);
            if focused.as_deref() == Some(pane_id.as_str()) {
                *focused = None;
            }
            tracing::debug!(pane_id = %short_id(&pane_id), "Removed pane");
        }
        removed
    }

    /// Removes every pane not in `live`. Returns the removed ids, sorted.
    pub fn cleanup_closed(&self, live: &HashSet<String>) -> Vec<String> {
        let live: HashSet<String> = live.iter().map(|id| normalize_pane_id(id)).collect();
        let closed: Vec<String> = self
            .pane_ids()
            .into_iter()
            .filter(|pane_id| !live.contains(pane_id))
            .collect();
        for pane_id in &closed {
            self.remove_pane(pane_id);
        }
        if !closed.is_empty() {
            tracing::info!(closed = closed.len(), "Cleaned up closed panes");
        }
        closed
    }

    pub fn pane_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = read(&self.panes).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn pane_count(&self) -> usize {
        read(&self.panes).len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    pub fn query_status(&self, pane_id: &str) -> Option<PaneStatus> {
        let pane_id = normalize_pane_id(pane_id);
        let entry = self.get(&pane_id)?;
        let now = self.now();
        let core = lock(&entry.core);
        Some(PaneStatus {
            pane_id,
            status: core.machine.status(),
            source: core.machine.source().to_string(),
            description: core.machine.description().to_string(),
            state_id: core.machine.state_id(),
            pane_generation: core.machine.pane_generation(),
            running_duration: core.machine.running_duration(now),
            display: core.display.state().clone(),
        })
    }

    pub fn debug_snapshot(
        &self,
        pane_id: &str,
        max_history: Option<usize>,
        max_pending: usize,
    ) -> Option<PaneDebugSnapshot> {
        let pane_id = normalize_pane_id(pane_id);
        let entry = self.get(&pane_id)?;
        let focused = self.is_focused(&pane_id);
        let core = lock(&entry.core);
        let queue = {
            let queue = lock(&entry.queue);
            let mut pending = queue.pending_signals();
            pending.truncate(max_pending);
            QueueView {
                depth: queue.len(),
                generation: queue.generation(),
                pending,
                counters: queue.counters(),
            }
        };
        let history = match max_history {
            Some(limit) => core.machine.recent_history(limit),
            None => core.machine.history().cloned().collect(),
        };
        Some(PaneDebugSnapshot {
            machine: MachineView {
                status: core.machine.status(),
                source: core.machine.source().to_string(),
                description: core.machine.description().to_string(),
                started_at: core.machine.started_at(),
                state_id: core.machine.state_id(),
                pane_generation: core.machine.pane_generation(),
            },
            display: core.display.state().clone(),
            queue,
            waiting_fallback: core.waiting,
            history,
            focused,
            pane_id,
        })
    }

    /// Summaries sorted by pane id, paginated. Also returns the total pane
    /// count before pagination.
    pub fn list_snapshots(&self, limit: Option<usize>, offset: usize) -> (Vec<PaneSummary>, usize) {
        let entries = self.entries();
        let total = entries.len();
        let now = self.now();
        let take = limit.filter(|limit| *limit > 0).unwrap_or(usize::MAX);
        let summaries = entries
            .into_iter()
            .skip(offset)
            .take(take)
            .map(|(pane_id, entry)| {
                let core = lock(&entry.core);
                let (queue_depth, counters) = {
                    let queue = lock(&entry.queue);
                    (queue.len(), queue.counters())
                };
                PaneSummary {
                    status: core.machine.status(),
                    source: core.machine.source().to_string(),
                    state_id: core.machine.state_id(),
                    description: core.machine.description().to_string(),
                    running_duration: core.machine.running_duration(now),
                    queue_depth,
                    queue_low_priority_drops: counters.low_priority_drops,
                    queue_overflow_drops: counters.overflow_drops,
                    latest_history: core.machine.recent_history(1).pop(),
                    pane_id,
                }
            })
            .collect();
        (summaries, total)
    }

    pub fn metrics(&self) -> ManagerMetrics {
        ManagerMetrics {
            signals_processed: self.metrics.signals_processed.load(Ordering::Relaxed),
            transitions: self.metrics.transitions.load(Ordering::Relaxed),
            rejections: self.metrics.rejections.load(Ordering::Relaxed),
            delayed_actions: self.metrics.delayed_actions.load(Ordering::Relaxed),
        }
    }

    pub fn pending_display_tasks(&self) -> usize {
        lock(&self.scheduler).pending_delays()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────

    pub fn export_snapshot(&self) -> EngineSnapshot {
        let mut machines = BTreeMap::new();
        let mut panes = BTreeMap::new();
        for (pane_id, entry) in self.entries() {
            let core = lock(&entry.core);
            machines.insert(
                pane_id.clone(),
                core.machine.to_record(self.machine_config.history_persist),
            );
            panes.insert(pane_id, core.display.state().clone());
        }
        EngineSnapshot::new(self.now(), machines, panes)
    }

    /// Replaces registry entries with restored panes. Finished displays get a
    /// fresh auto-dismiss timer. Returns the number of panes restored.
    pub fn restore_snapshot(&self, snapshot: EngineSnapshot) -> usize {
        let now = self.now();
        let EngineSnapshot {
            machines, mut panes, ..
        } = snapshot;
        let mut restored = 0;

        for (pane_id, record) in machines {
            let pane_id = normalize_pane_id(&pane_id);
            let machine = PaneStateMachine::from_record(
                record,
                Arc::clone(&self.rules),
                Arc::clone(&self.ids),
                &self.machine_config,
            );
            let display = match panes.remove(&pane_id) {
                Some(state) => PaneDisplay::from_state(pane_id.as_str(), state),
                None => PaneDisplay::new(pane_id.as_str()),
            };
            if display.state().status.is_finished() {
                lock(&self.scheduler).register_delay(
                    dismiss_task_name(&pane_id),
                    now + duration_from_secs_f64(self.display_policy.auto_dismiss_dwell_secs),
                    DelayedAction::AutoDismiss {
                        pane_id: pane_id.clone(),
                        state_id: display.state().state_id,
                    },
                );
            }
            let entry = Arc::new(self.entry_for(machine, display));
            write(&self.panes).insert(pane_id, entry);
            restored += 1;
        }
        tracing::info!(restored, next_state_id = self.ids.peek(), "Restored panes from snapshot");
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::queue::EnqueueOutcome;
    use crate::rules::SourcePriority;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-01T09:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn manager() -> (StateManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let rules = Arc::new(RuleTable::standard(SourcePriority::default()).expect("rules"));
        let manager = StateManager::new(&RuntimeConfig::default(), rules, clock.clone());
        (manager, clock)
    }

    fn signal(source: &str, pane: &str, event: &str, data: Value) -> Signal {
        Signal::new(source, pane, event, payload(data), t0())
    }

    fn capture_notifications(manager: &StateManager) -> Arc<Mutex<Vec<DisplayNotification>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.subscribe(Box::new(move |notification| {
            sink.lock().unwrap().push(notification.clone());
        }));
        seen
    }

    #[test]
    fn enqueue_creates_pane_and_stamps_generation() {
        let (manager, _) = manager();
        let result = manager.enqueue(signal("shell", "%1", "command_start", json!({"command": "ls"})));
        assert!(result.accepted());
        assert_eq!(manager.pane_ids(), vec!["%1".to_string()]);

        let snapshot = manager.debug_snapshot("%1", None, 10).unwrap();
        assert_eq!(snapshot.queue.pending, vec!["shell.command_start".to_string()]);
        assert_eq!(snapshot.queue.generation, 1);
    }

    #[test]
    fn drain_applies_in_arrival_order() {
        let (manager, clock) = manager();
        manager.enqueue(signal("shell", "%1", "command_start", json!({"command": "make"})));
        clock.advance(Duration::seconds(5));
        manager.enqueue(signal("shell", "%1", "command_end", json!({"exit_code": 0})));

        let report = manager.drain_pane("%1");
        assert_eq!(report.processed, 2);
        assert_eq!(report.changes.len(), 2);
        assert_eq!(report.changes[1].new_status, TaskStatus::Done);
        assert_eq!(manager.status("%1"), Some(TaskStatus::Done));
    }

    #[test]
    fn stale_signal_never_enters_queue() {
        let (manager, _) = manager();
        manager.enqueue(signal("shell", "%1", "command_start", json!({})));
        manager.bump_generation("%1");
        let stale = signal("shell", "%1", "command_end", json!({"exit_code": 0})).with_generation(1);
        let result = manager.enqueue(stale);
        assert_eq!(result.outcome, EnqueueOutcome::DropStaleGeneration);

        let snapshot = manager.debug_snapshot("%1", None, 10).unwrap();
        assert!(snapshot.queue.pending.is_empty());
        assert_eq!(snapshot.queue.counters.stale_drops, 2);
    }

    #[test]
    fn content_only_refreshes_cache_unless_waiting() {
        let (manager, _) = manager();
        manager.enqueue(signal("content", "%1", "changed", json!({"content_hash": "abc"})));
        let report = manager.drain_pane("%1");
        assert!(report.changes.is_empty());
        let status = manager.query_status("%1").unwrap();
        assert_eq!(status.status, TaskStatus::Idle);
        assert_eq!(status.display.content_hash, "abc");
    }

    #[test]
    fn content_while_waiting_resumes_running() {
        let (manager, _) = manager();
        manager.enqueue(signal("claude-code", "%1", "SessionStart", json!({})));
        manager.enqueue(signal(
            "claude-code",
            "%1",
            "Notification:permission_prompt",
            json!({}),
        ));
        manager.drain_pane("%1");
        assert_eq!(manager.status("%1"), Some(TaskStatus::WaitingApproval));
        assert!(manager.debug_snapshot("%1", None, 0).unwrap().waiting_fallback.is_some());

        manager.enqueue(signal("content", "%1", "changed", json!({"content_hash": "x"})));
        let report = manager.drain_pane("%1");
        assert_eq!(report.changes.len(), 1);
        assert_eq!(report.changes[0].signal, "content.update");
        assert_eq!(manager.status("%1"), Some(TaskStatus::Running));
        assert!(manager.debug_snapshot("%1", None, 0).unwrap().waiting_fallback.is_none());
    }

    #[test]
    fn tick_escalates_long_running_with_elapsed_description() {
        let (manager, clock) = manager();
        manager.enqueue(signal("shell", "%1", "command_start", json!({"command": "sleep 100"})));
        manager.drain_pane("%1");

        clock.advance(Duration::seconds(30));
        assert!(manager.tick().long_running.is_empty());

        clock.advance(Duration::seconds(35));
        let report = manager.tick();
        assert_eq!(report.long_running, vec!["%1".to_string()]);
        let status = manager.query_status("%1").unwrap();
        assert_eq!(status.status, TaskStatus::LongRunning);
        assert_eq!(status.source, "shell");
        assert_eq!(status.description, "Running for 1m 5s");
    }

    #[test]
    fn waiting_fallback_goes_idle_without_content() {
        let (manager, clock) = manager();
        manager.enqueue(signal("claude-code", "%1", "SessionStart", json!({})));
        manager.enqueue(signal(
            "claude-code",
            "%1",
            "Notification:permission_prompt",
            json!({}),
        ));
        manager.drain_pane("%1");

        clock.advance(Duration::seconds(119));
        assert!(manager.tick().waiting_fallbacks.is_empty());
        clock.advance(Duration::seconds(2));
        let report = manager.tick();
        assert_eq!(report.waiting_fallbacks, vec!["%1".to_string()]);
        assert_eq!(manager.status("%1"), Some(TaskStatus::Idle));
    }

    fn manager_without_output_resume(to_running: bool) -> (StateManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let rules = RuleTable::standard(SourcePriority::default())
            .expect("rules")
            .rules()
            .iter()
            .filter(|rule| rule.name != "R1")
            .cloned()
            .collect();
        let table = Arc::new(RuleTable::new(rules, SourcePriority::default()).expect("rules"));
        let mut config = RuntimeConfig::default();
        config.timing.waiting_fallback_to_running = to_running;
        (StateManager::new(&config, table, clock.clone()), clock)
    }

    fn wait_then_change_output(manager: &StateManager, clock: &ManualClock) {
        manager.enqueue(signal("claude-code", "%1", "SessionStart", json!({})));
        manager.enqueue(signal(
            "claude-code",
            "%1",
            "Notification:permission_prompt",
            json!({}),
        ));
        manager.drain_pane("%1");
        clock.advance(Duration::seconds(30));
        manager.enqueue(signal("content", "%1", "changed", json!({"content_hash": "abc"})));
        manager.drain_pane("%1");
    }

    #[test]
    fn waiting_fallback_goes_running_after_output_changed() {
        let (manager, clock) = manager_without_output_resume(true);
        wait_then_change_output(&manager, &clock);
        assert_eq!(manager.status("%1"), Some(TaskStatus::WaitingApproval));
        let waiting = manager
            .debug_snapshot("%1", None, 10)
            .unwrap()
            .waiting_fallback
            .unwrap();
        assert!(waiting.has_content_change);

        clock.advance(Duration::seconds(89));
        assert!(manager.tick().waiting_fallbacks.is_empty());
        clock.advance(Duration::seconds(2));
        let report = manager.tick();
        assert_eq!(report.waiting_fallbacks, vec!["%1".to_string()]);
        assert_eq!(manager.status("%1"), Some(TaskStatus::Running));

        let snapshot = manager.debug_snapshot("%1", Some(1), 10).unwrap();
        assert_eq!(snapshot.history[0].signal, "timer.waiting_fallback_running");
        assert!(snapshot.history[0].success);
        assert!(snapshot.waiting_fallback.is_none());
    }

    #[test]
    fn waiting_fallback_goes_idle_when_running_fallback_disabled() {
        let (manager, clock) = manager_without_output_resume(false);
        wait_then_change_output(&manager, &clock);

        clock.advance(Duration::seconds(91));
        assert_eq!(manager.tick().waiting_fallbacks, vec!["%1".to_string()]);
        assert_eq!(manager.status("%1"), Some(TaskStatus::Idle));
        let snapshot = manager.debug_snapshot("%1", Some(1), 10).unwrap();
        assert_eq!(snapshot.history[0].signal, "timer.waiting_fallback_idle");
    }

    #[test]
    fn focused_finish_is_suppressed() {
        let (manager, clock) = manager();
        let seen = capture_notifications(&manager);
        manager.set_focus(Some("%1"));
        manager.enqueue(signal("shell", "%1", "command_start", json!({"command": "make"})));
        manager.drain_pane("%1");
        clock.advance(Duration::seconds(10));
        manager.enqueue(signal("shell", "%1", "command_end", json!({"exit_code": 0})));
        manager.drain_pane("%1");

        let seen = seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.state.status, TaskStatus::Done);
        assert!(last.suppressed);
        assert_eq!(last.reason, "focused");
    }

    #[test]
    fn finished_display_auto_dismisses_after_dwell() {
        let (manager, clock) = manager();
        let seen = capture_notifications(&manager);
        manager.enqueue(signal("shell", "%1", "command_start", json!({"command": "make"})));
        manager.drain_pane("%1");
        clock.advance(Duration::seconds(10));
        manager.enqueue(signal("shell", "%1", "command_end", json!({"exit_code": 1})));
        manager.drain_pane("%1");
        assert_eq!(manager.pending_display_tasks(), 1);

        clock.advance(Duration::seconds(61));
        let report = manager.tick();
        assert_eq!(report.delayed_actions, 1);
        let display = manager.query_status("%1").unwrap().display;
        assert_eq!(display.status, TaskStatus::Idle);
        assert!(display.recently_finished);
        assert_eq!(seen.lock().unwrap().last().unwrap().reason, "auto_dismiss");

        clock.advance(Duration::seconds(11));
        manager.tick();
        assert!(!manager.query_status("%1").unwrap().display.recently_finished);
    }

    #[test]
    fn oversized_timing_values_schedule_without_overflow() {
        let clock = Arc::new(ManualClock::new(t0()));
        let rules = Arc::new(RuleTable::standard(SourcePriority::default()).expect("rules"));
        let mut config = RuntimeConfig::default();
        config.timing.display_delay_secs = 1e18;
        config.timing.auto_dismiss_dwell_secs = 1e18;
        config.timing.recently_finished_hint_secs = f64::INFINITY;
        let manager = StateManager::new(&config, rules, clock.clone());

        manager.enqueue(signal("shell", "%1", "command_start", json!({"command": "make"})));
        manager.drain_pane("%1");
        clock.advance(Duration::seconds(10));
        manager.enqueue(signal("shell", "%1", "command_end", json!({"exit_code": 0})));
        manager.drain_pane("%1");
        assert_eq!(manager.status("%1"), Some(TaskStatus::Done));

        clock.advance(Duration::days(30));
        assert_eq!(manager.tick().delayed_actions, 0);
        assert_eq!(manager.query_status("%1").unwrap().display.status, TaskStatus::Done);
    }

    #[test]
    fn debug_events_report_failures_and_queue_refusals() {
        let (manager, _) = manager();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        manager.subscribe_debug(Box::new(move |event| sink.lock().unwrap().push(event.clone())));

        manager.enqueue(signal("shell", "%1", "command_end", json!({"exit_code": 0})));
        manager.drain_pane("%1");
        manager.bump_generation("%1");
        manager.enqueue(signal("shell", "%1", "command_start", json!({})).with_generation(1));

        let events = events.lock().unwrap();
        assert_eq!(events[0].result, "fail");
        assert_eq!(events[0].reason, "no_rule_matched");
        assert_eq!(events[1].result, "drop_stale_generation");
    }

    #[test]
    fn cleanup_removes_panes_missing_from_liveness() {
        let (manager, _) = manager();
        for pane in ["%1", "%2", "%3"] {
            manager.enqueue(signal("shell", pane, "command_start", json!({})));
        }
        manager.set_focus(Some("%2"));
        let live: HashSet<String> = ["%1".to_string()].into_iter().collect();
        assert_eq!(manager.cleanup_closed(&live), vec!["%2".to_string(), "%3".to_string()]);
        assert_eq!(manager.pane_ids(), vec!["%1".to_string()]);
        assert_eq!(manager.focused_pane(), None);
    }

    #[test]
    fn list_snapshots_paginates_sorted_panes() {
        let (manager, _) = manager();
        for pane in ["%3", "%1", "%2"] {
            manager.enqueue(signal("shell", pane, "command_start", json!({})));
        }
        manager.drain_all();
        let (page, total) = manager.list_snapshots(Some(2), 1);
        assert_eq!(total, 3);
        let ids: Vec<_> = page.iter().map(|row| row.pane_id.as_str()).collect();
        assert_eq!(ids, vec!["%2", "%3"]);
        assert!(page[0].latest_history.is_some());
    }

    #[test]
    fn export_and_restore_preserve_state_and_advance_ids() {
        let (manager, clock) = manager();
        manager.enqueue(signal("shell", "%1", "command_start", json!({"command": "make"})));
        manager.drain_pane("%1");
        let before = manager.query_status("%1").unwrap();
        let snapshot = manager.export_snapshot();

        let rules = Arc::new(RuleTable::standard(SourcePriority::default()).expect("rules"));
        let restored = StateManager::new(&RuntimeConfig::default(), rules, clock);
        assert_eq!(restored.restore_snapshot(snapshot), 1);
        let after = restored.query_status("%1").unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.source, before.source);
        assert_eq!(after.state_id, before.state_id);
        assert_eq!(after.pane_generation, before.pane_generation + 1);

        restored.enqueue(signal("shell", "%1", "command_end", json!({"exit_code": 0})));
        let report = restored.drain_pane("%1");
        assert!(report.changes[0].state_id > before.state_id);
    }

    #[test]
    fn generation_bump_moves_machine_and_queue_together() {
        let (manager, _) = manager();
        let manager = Arc::new(manager);
        manager.enqueue(signal("shell", "%1", "command_start", json!({"command": "make"})));

        let bumper = {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    manager.bump_generation("%1");
                }
            })
        };
        for _ in 0..200 {
            let snapshot = manager.debug_snapshot("%1", Some(0), 0).unwrap();
            assert_eq!(snapshot.machine.pane_generation, snapshot.queue.generation);
        }
        bumper.join().unwrap();

        let snapshot = manager.debug_snapshot("%1", Some(0), 10).unwrap();
        assert_eq!(snapshot.machine.pane_generation, 201);
        assert_eq!(snapshot.queue.generation, 201);
        assert!(snapshot.queue.pending.is_empty());
    }
}
