//! Engine facade.
//!
//! [`Engine`] ties ingress normalization, the content heuristics and the
//! [`StateManager`] together behind one thread-safe API. The daemon, the
//! poller and the integration tests all drive the system through it.
//!
//! Submitting only enqueues. Callers decide when to drain: the daemon drains
//! the touched pane right after each request and sweeps every pane on a
//! short interval.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::Clock;
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::heuristic::{
    HeuristicAnalyzer, HeuristicDebug, HeuristicDecision, HookMonitorStatus, PaneMetadata,
};
use crate::ids::normalize_pane_id;
use crate::ingress::Ingress;
use crate::manager::{
    DebugCallback, DisplayCallback, DrainReport, ManagerMetrics, PaneDebugSnapshot, PaneSummary,
    StateManager, TickReport,
};
use crate::persistence::{load_snapshot, save_snapshot};
use crate::rules::{RuleTable, SourcePriority};
use crate::types::{PaneStatus, Signal, StateChange, TaskStatus};

const CONTENT_SOURCE: &str = "content";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What happened to one submitted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub accepted: bool,
    /// Canonical signal name, when the event got that far.
    pub signal: Option<String>,
    /// `ok`, an ingress rejection or a queue outcome.
    pub reason: String,
    pub queue_depth: usize,
}

impl SubmitOutcome {
    fn rejected(reason: &str) -> Self {
        Self {
            accepted: false,
            signal: None,
            reason: reason.to_string(),
            queue_depth: 0,
        }
    }
}

/// What one content capture produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentOutcome {
    pub content_hash: String,
    pub hash_changed: bool,
    /// Signals queued as a result, in queue order.
    pub enqueued: Vec<String>,
    pub heuristic: HeuristicDecision,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineDebugSnapshot {
    #[serde(flatten)]
    pub pane: PaneDebugSnapshot,
    pub hook: HookMonitorStatus,
    pub heuristic: Option<HeuristicDebug>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineHealth {
    pub panes: usize,
    pub focused_pane: Option<String>,
    pub heuristic_enabled: bool,
    pub heuristic_panes: usize,
    pub pending_display_tasks: usize,
    pub metrics: ManagerMetrics,
}

pub struct Engine {
    config: RuntimeConfig,
    clock: Arc<dyn Clock>,
    manager: StateManager,
    ingress: Mutex<Ingress>,
    analyzer: Mutex<HeuristicAnalyzer>,
}

impl Engine {
    /// Builds the rule table and compiles every heuristic pattern. A bad
    /// pattern or rule is a startup error.
    pub fn new(config: RuntimeConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let rules = Arc::new(RuleTable::standard(SourcePriority::from_config(
            &config.priority,
        ))?);
        let analyzer = HeuristicAnalyzer::new(&config.heuristic)?;
        let manager = StateManager::new(&config, rules, Arc::clone(&clock));
        Ok(Self {
            ingress: Mutex::new(Ingress::new(&config.timing)),
            analyzer: Mutex::new(analyzer),
            manager,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn manager(&self) -> &StateManager {
        &self.manager
    }

    // ─────────────────────────────────────────────────────────────────────
    // Ingress
    // ─────────────────────────────────────────────────────────────────────

    /// Normalizes and queues one hook event.
    pub fn submit(
        &self,
        source: &str,
        pane_id: &str,
        event_type: &str,
        payload: Map<String, Value>,
    ) -> SubmitOutcome {
        let now = self.clock.now();
        let normalized = lock(&self.ingress).normalize(source, pane_id, event_type, payload, now);
        let signal = match normalized {
            Ok(signal) => signal,
            Err(rejection) => {
                tracing::debug!(
                    source,
                    pane_id,
                    event_type,
                    reason = rejection.as_str(),
                    "Event rejected at ingress"
                );
                return SubmitOutcome::rejected(rejection.as_str());
            }
        };
        if signal.signal == "iterm.focus" {
            self.manager.set_focus(Some(&signal.pane_id));
        }
        self.enqueue(signal)
    }

    fn enqueue(&self, signal: Signal) -> SubmitOutcome {
        let name = signal.signal.clone();
        let result = self.manager.enqueue(signal);
        SubmitOutcome {
            accepted: result.accepted(),
            signal: Some(name),
            reason: result.outcome.as_str().to_string(),
            queue_depth: result.queue_depth,
        }
    }

    /// Feeds one pane capture through the heuristics and queues whatever it
    /// implies. `content_hash` may be supplied by adapters that hash
    /// upstream.
    pub fn submit_content(
        &self,
        pane_id: &str,
        content: &str,
        content_hash: Option<&str>,
    ) -> ContentOutcome {
        let pane_id = normalize_pane_id(pane_id);
        let now = self.clock.now();
        let status = self.manager.status(&pane_id).unwrap_or(TaskStatus::Idle);
        let hook = lock(&self.ingress).hook_status(&pane_id);

        let (observation, decision, metadata) = {
            let mut analyzer = lock(&self.analyzer);
            let observation = analyzer.observe_content(&pane_id, content, content_hash, now);
            let decision = analyzer.analyze(&pane_id, status, &hook, now);
            let metadata = analyzer.metadata(&pane_id).cloned().unwrap_or_default();
            (observation, decision, metadata)
        };

        let mut signals = Vec::new();
        if observation.hash_changed {
            signals.push(self.content_signal(
                &pane_id,
                "changed",
                json!({ "content_hash": observation.content_hash }),
            ));
        }
        for hit in &observation.detector_hits {
            signals.push(self.content_signal(
                &pane_id,
                &hit.signal,
                json!({ "target": hit.target, "detector": hit.detector }),
            ));
        }
        if let Some(signal) = decision.signal {
            tracing::debug!(
                pane_id = %pane_id,
                signal = signal.event_type(),
                reason = %decision.reason,
                "Heuristic signal"
            );
            signals.push(self.content_signal(
                &pane_id,
                signal.event_type(),
                json!({
                    "reason": decision.reason,
                    "job_name": metadata.job_name,
                    "command_line": metadata.command_line,
                }),
            ));
        }

        let enqueued = signals
            .into_iter()
            .filter_map(|signal| {
                let outcome = self.enqueue(signal);
                outcome.accepted.then_some(outcome.signal).flatten()
            })
            .collect();

        ContentOutcome {
            content_hash: observation.content_hash,
            hash_changed: observation.hash_changed,
            enqueued,
            heuristic: decision,
        }
    }

    fn content_signal(&self, pane_id: &str, event_type: &str, payload: Value) -> Signal {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Signal::new(CONTENT_SOURCE, pane_id, event_type, payload, self.clock.now())
    }

    pub fn update_metadata(&self, pane_id: &str, metadata: PaneMetadata) {
        lock(&self.analyzer).update_metadata(&normalize_pane_id(pane_id), metadata);
    }

    /// Overrides native hook activity for a pane, as reported by an
    /// external hook monitor.
    pub fn report_hook_status(&self, pane_id: &str, status: HookMonitorStatus) {
        lock(&self.ingress).set_hook_status(pane_id, status);
    }

    /// Moves focus. Focusing a pane also submits `iterm.focus`, which
    /// resolves approval waits and finished states.
    pub fn set_focus(&self, pane_id: Option<&str>) -> Option<SubmitOutcome> {
        match pane_id {
            Some(pane_id) => {
                self.manager.set_focus(Some(pane_id));
                Some(self.submit("iterm", pane_id, "focus", Map::new()))
            }
            None => {
                self.manager.set_focus(None);
                None
            }
        }
    }

    pub fn focused_pane(&self) -> Option<String> {
        self.manager.focused_pane()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Processing
    // ─────────────────────────────────────────────────────────────────────

    pub fn drain_pane(&self, pane_id: &str) -> DrainReport {
        let report = self.manager.drain_pane(pane_id);
        self.note_resolutions(&report.changes);
        report
    }

    pub fn drain_all(&self) -> DrainReport {
        let report = self.manager.drain_all();
        self.note_resolutions(&report.changes);
        report
    }

    /// A native source finishing a pane silences heuristic completion
    /// signals until the content heuristics see a fresh run.
    fn note_resolutions(&self, changes: &[StateChange]) {
        let resolved: Vec<&str> = changes
            .iter()
            .filter(|change| {
                change.new_status.is_finished() && change.new_source != CONTENT_SOURCE
            })
            .map(|change| change.pane_id.as_str())
            .collect();
        if resolved.is_empty() {
            return;
        }
        let mut analyzer = lock(&self.analyzer);
        for pane_id in resolved {
            analyzer.mark_resolved(pane_id);
        }
    }

    pub fn tick(&self) -> TickReport {
        self.manager.tick()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Removes panes that are no longer live. Returns the removed ids.
    pub fn sync_liveness(&self, live: &HashSet<String>) -> Vec<String> {
        let closed = self.manager.cleanup_closed(live);
        if !closed.is_empty() {
            let mut analyzer = lock(&self.analyzer);
            let mut ingress = lock(&self.ingress);
            for pane_id in &closed {
                analyzer.clear_pane(pane_id);
                ingress.forget(pane_id);
            }
        }
        closed
    }

    /// New process epoch for a pane: older queued signals are purged and
    /// content heuristics start over.
    pub fn bump_generation(&self, pane_id: &str) -> u64 {
        let generation = self.manager.bump_generation(pane_id);
        lock(&self.analyzer).clear_pane(&normalize_pane_id(pane_id));
        generation
    }

    pub fn remove_pane(&self, pane_id: &str) -> bool {
        let pane_id = normalize_pane_id(pane_id);
        lock(&self.analyzer).clear_pane(&pane_id);
        lock(&self.ingress).forget(&pane_id);
        self.manager.remove_pane(&pane_id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    pub fn query_status(&self, pane_id: &str) -> Option<PaneStatus> {
        self.manager.query_status(pane_id)
    }

    pub fn subscribe(&self, callback: DisplayCallback) {
        self.manager.subscribe(callback);
    }

    pub fn subscribe_debug(&self, callback: DebugCallback) {
        self.manager.subscribe_debug(callback);
    }

    pub fn debug_snapshot(
        &self,
        pane_id: &str,
        max_history: Option<usize>,
        max_pending: usize,
    ) -> Option<EngineDebugSnapshot> {
        let pane = self.manager.debug_snapshot(pane_id, max_history, max_pending)?;
        let now = self.clock.now();
        let hook = lock(&self.ingress).hook_status(&pane.pane_id);
        let heuristic = lock(&self.analyzer).debug_state(&pane.pane_id, now);
        Some(EngineDebugSnapshot {
            pane,
            hook,
            heuristic,
        })
    }

    pub fn list_snapshots(&self, limit: Option<usize>, offset: usize) -> (Vec<PaneSummary>, usize) {
        self.manager.list_snapshots(limit, offset)
    }

    pub fn health(&self) -> EngineHealth {
        let analyzer = lock(&self.analyzer);
        EngineHealth {
            panes: self.manager.pane_count(),
            focused_pane: self.manager.focused_pane(),
            heuristic_enabled: analyzer.is_enabled(),
            heuristic_panes: analyzer.tracked_panes(),
            pending_display_tasks: self.manager.pending_display_tasks(),
            metrics: self.manager.metrics(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────

    pub fn save(&self, path: &Path) -> Result<()> {
        save_snapshot(path, &self.manager.export_snapshot())
    }

    /// Restores from `path` if a valid snapshot is there. Returns the number
    /// of panes restored; 0 means a cold start.
    pub fn load(&self, path: &Path) -> Result<usize> {
        match load_snapshot(path)? {
            Some(snapshot) => Ok(self.manager.restore_snapshot(snapshot)),
            None => Ok(0),
        }
    }
}
