//! Content heuristic analyzer.
//!
//! Infers run/done/wait/idle from pane text for tools that have no native
//! hooks. The analyzer owns all per-pane heuristic tracking; nothing else
//! reads it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::clock::seconds_between;
use crate::config::HeuristicConfig;
use crate::error::Result;
use crate::types::TaskStatus;

use super::detectors::{DetectorHit, DetectorTable};
use super::patterns::Classifiers;
use super::window::ContentWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeuristicSignal {
    Run,
    Done,
    Wait,
    Idle,
}

impl HeuristicSignal {
    /// Event type under the `content` source.
    pub fn event_type(&self) -> &'static str {
        match self {
            HeuristicSignal::Run => "heuristic_run",
            HeuristicSignal::Done => "heuristic_done",
            HeuristicSignal::Wait => "heuristic_wait",
            HeuristicSignal::Idle => "heuristic_idle",
        }
    }
}

/// Native hook activity for one pane.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HookMonitorStatus {
    pub active: bool,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Foreground-process metadata reported by the terminal adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PaneMetadata {
    pub job_name: String,
    pub title: String,
    pub command_line: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeuristicDecision {
    pub signal: Option<HeuristicSignal>,
    pub reason: String,
}

impl HeuristicDecision {
    fn skip(reason: &str) -> Self {
        Self {
            signal: None,
            reason: reason.to_string(),
        }
    }

    fn emit(signal: HeuristicSignal, reason: String) -> Self {
        Self {
            signal: Some(signal),
            reason,
        }
    }
}

/// Result of feeding one capture to the analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentObservation {
    pub content_hash: String,
    pub hash_changed: bool,
    pub detector_hits: Vec<DetectorHit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeuristicDebug {
    pub last_signal: Option<HeuristicSignal>,
    pub last_signal_at: Option<DateTime<Utc>>,
    pub suppressed_until_reactivation: bool,
    pub interrupt_present: bool,
    pub approval_present: bool,
    pub quiet_secs: f64,
    pub cooldown_entries: usize,
    pub metadata: PaneMetadata,
}

#[derive(Debug, Clone)]
struct HeuristicPaneState {
    window: ContentWindow,
    metadata: PaneMetadata,
    last_signal: Option<HeuristicSignal>,
    last_signal_at: Option<DateTime<Utc>>,
    last_idle_emit_at: Option<DateTime<Utc>>,
    suppressed_until_reactivation: bool,
    interrupt_seen_at: Option<DateTime<Utc>>,
    interrupt_present: bool,
    approval_seen_at: Option<DateTime<Utc>>,
    approval_present: bool,
    last_emissions: HashMap<String, DateTime<Utc>>,
}

impl HeuristicPaneState {
    fn new(config: &HeuristicConfig) -> Self {
        Self {
            window: ContentWindow::new(
                config.new_record_lines,
                config.tail_lines.max(config.max_scan_lines),
            ),
            metadata: PaneMetadata::default(),
            last_signal: None,
            last_signal_at: None,
            last_idle_emit_at: None,
            suppressed_until_reactivation: false,
            interrupt_seen_at: None,
            interrupt_present: false,
            approval_seen_at: None,
            approval_present: false,
            last_emissions: HashMap::new(),
        }
    }

    fn record(&mut self, signal: HeuristicSignal, now: DateTime<Utc>) {
        self.last_signal = Some(signal);
        self.last_signal_at = Some(now);
    }
}

#[derive(Debug, Clone)]
pub struct HeuristicAnalyzer {
    config: HeuristicConfig,
    classifiers: Classifiers,
    detectors: DetectorTable,
    panes: HashMap<String, HeuristicPaneState>,
}

impl HeuristicAnalyzer {
    /// Compiles every classifier and detector. An invalid pattern is a
    /// startup error.
    pub fn new(config: &HeuristicConfig) -> Result<Self> {
        Ok(Self {
            classifiers: Classifiers::from_config(config)?,
            detectors: DetectorTable::compile(
                &config.detectors,
                config.detector_cooldown_secs,
                config.max_scan_lines,
            )?,
            config: config.clone(),
            panes: HashMap::new(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn tracked_panes(&self) -> usize {
        self.panes.len()
    }

    pub fn update_metadata(&mut self, pane_id: &str, metadata: PaneMetadata) {
        pane_entry(&mut self.panes, &self.config, pane_id).metadata = metadata;
    }

    pub fn metadata(&self, pane_id: &str) -> Option<&PaneMetadata> {
        self.panes.get(pane_id).map(|state| &state.metadata)
    }

    /// Feeds one capture into the pane's change window. Detectors run only
    /// when the content hash changed.
    pub fn observe_content(
        &mut self,
        pane_id: &str,
        raw: &str,
        content_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> ContentObservation {
        let state = pane_entry(&mut self.panes, &self.config, pane_id);
        let hash_changed = state.window.submit(raw, content_hash, now);
        let detector_hits = if hash_changed {
            self.detectors.scan(raw, &mut state.last_emissions, now)
        } else {
            Vec::new()
        };
        ContentObservation {
            content_hash: state.window.current_hash().to_string(),
            hash_changed,
            detector_hits,
        }
    }

    /// Forgets everything about a pane.
    pub fn clear_pane(&mut self, pane_id: &str) {
        if self.panes.remove(pane_id).is_some() {
            tracing::debug!(pane_id = %pane_id, "Cleared heuristic pane state");
        }
    }

    /// Suppresses completion signals until the next `run`. Called when a
    /// native source resolves the pane.
    pub fn mark_resolved(&mut self, pane_id: &str) {
        pane_entry(&mut self.panes, &self.config, pane_id).suppressed_until_reactivation = true;
    }

    pub fn debug_state(&self, pane_id: &str, now: DateTime<Utc>) -> Option<HeuristicDebug> {
        self.panes.get(pane_id).map(|state| HeuristicDebug {
            last_signal: state.last_signal,
            last_signal_at: state.last_signal_at,
            suppressed_until_reactivation: state.suppressed_until_reactivation,
            interrupt_present: state.interrupt_present,
            approval_present: state.approval_present,
            quiet_secs: state.window.quiet_duration(now),
            cooldown_entries: state.last_emissions.len(),
            metadata: state.metadata.clone(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Activation Gate
    // ─────────────────────────────────────────────────────────────────────

    fn passes_allow_list(&self, metadata: &PaneMetadata) -> bool {
        if self.config.prefer_job_name && !metadata.job_name.is_empty() {
            let job = metadata.job_name.to_lowercase();
            if self
                .config
                .job_whitelist
                .iter()
                .any(|allowed| job.contains(&allowed.to_lowercase()))
            {
                return true;
            }
        }
        let title = metadata.title.to_lowercase();
        self.config
            .pane_whitelist
            .iter()
            .any(|allowed| title.contains(&allowed.to_lowercase()))
    }

    fn passes_hook_silence(&self, hook: &HookMonitorStatus, now: DateTime<Utc>) -> bool {
        if !hook.active {
            return true;
        }
        match hook.last_event_at {
            None => true,
            Some(last) => seconds_between(last, now) >= self.config.prompt_silence_secs,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Analysis
    // ─────────────────────────────────────────────────────────────────────

    pub fn analyze(
        &mut self,
        pane_id: &str,
        status: TaskStatus,
        hook: &HookMonitorStatus,
        now: DateTime<Utc>,
    ) -> HeuristicDecision {
        let metadata = self
            .panes
            .get(pane_id)
            .map(|state| state.metadata.clone())
            .unwrap_or_default();
        if !self.config.enabled
            || !self.passes_allow_list(&metadata)
            || !self.passes_hook_silence(hook, now)
        {
            return HeuristicDecision::skip("gate_failed");
        }

        let config = &self.config;
        let classifiers = &self.classifiers;
        let state = pane_entry(&mut self.panes, config, pane_id);

        let tail_lines = state.window.tail_lines(config.tail_lines);
        let quiet = state.window.quiet_duration(now);
        let newline_delta = state.window.newline_delta();
        let burst_length = state.window.burst_length();
        let hash_stable = state.window.is_hash_stable();
        let last_line = tail_lines.last().cloned().unwrap_or_default();

        if classifiers.is_negative(&last_line) {
            return HeuristicDecision::skip("negative_pattern");
        }

        let tail_text = tail_lines.join("\n");
        let interrupt_now = classifiers.has_interrupt(&tail_text);
        let approval_now = classifiers.has_approval(&tail_text);
        let interrupt_appeared = interrupt_now && !state.interrupt_present;
        let interrupt_disappeared = !interrupt_now && state.interrupt_present;
        let approval_appeared = approval_now && !state.approval_present;
        if interrupt_appeared {
            state.interrupt_seen_at = Some(now);
        }
        state.interrupt_present = interrupt_now;
        if approval_appeared {
            state.approval_seen_at = Some(now);
        }
        state.approval_present = approval_now;

        let decision = match status {
            TaskStatus::Idle => detect_run(
                state,
                config,
                now,
                newline_delta,
                burst_length,
                interrupt_appeared,
            ),
            TaskStatus::Running | TaskStatus::LongRunning => {
                if state.suppressed_until_reactivation {
                    HeuristicDecision::skip("suppressed_after_resolution")
                } else {
                    detect_completion(
                        state,
                        config,
                        classifiers,
                        CompletionInputs {
                            now,
                            quiet,
                            hash_stable,
                            last_line: &last_line,
                            interrupt_disappeared,
                            approval_appeared,
                        },
                    )
                }
            }
            _ => HeuristicDecision::skip("no_signal"),
        };

        if let Some(signal) = decision.signal {
            tracing::debug!(
                pane_id = %pane_id,
                signal = signal.event_type(),
                reason = %decision.reason,
                job = %metadata.job_name,
                "Heuristic emission"
            );
        } else {
            tracing::trace!(pane_id = %pane_id, reason = %decision.reason, "Heuristic skipped");
        }
        decision
    }
}

fn pane_entry<'a>(
    panes: &'a mut HashMap<String, HeuristicPaneState>,
    config: &HeuristicConfig,
    pane_id: &str,
) -> &'a mut HeuristicPaneState {
    panes
        .entry(pane_id.to_string())
        .or_insert_with(|| HeuristicPaneState::new(config))
}

fn in_debounce(
    state: &HeuristicPaneState,
    signal: HeuristicSignal,
    now: DateTime<Utc>,
    debounce_secs: f64,
) -> bool {
    if state.last_signal != Some(signal) {
        return false;
    }
    state
        .last_signal_at
        .map(|at| seconds_between(at, now) < debounce_secs)
        .unwrap_or(false)
}

fn detect_run(
    state: &mut HeuristicPaneState,
    config: &HeuristicConfig,
    now: DateTime<Utc>,
    newline_delta: i64,
    burst_length: i64,
    interrupt_appeared: bool,
) -> HeuristicDecision {
    let reason = if interrupt_appeared {
        "interrupt_appeared".to_string()
    } else {
        let has_newlines = newline_delta >= config.min_newlines;
        let has_burst = burst_length >= config.min_burst_chars;
        if !(has_newlines || has_burst) {
            return HeuristicDecision::skip("newline_gate");
        }
        format!("newlines={} burst={}", newline_delta, burst_length)
    };

    if in_debounce(state, HeuristicSignal::Run, now, config.debounce_secs) {
        return HeuristicDecision::skip("debounce");
    }
    state.suppressed_until_reactivation = false;
    state.record(HeuristicSignal::Run, now);
    HeuristicDecision::emit(HeuristicSignal::Run, reason)
}

struct CompletionInputs<'a> {
    now: DateTime<Utc>,
    quiet: f64,
    hash_stable: bool,
    last_line: &'a str,
    interrupt_disappeared: bool,
    approval_appeared: bool,
}

fn emit_done(state: &mut HeuristicPaneState, now: DateTime<Utc>, reason: String) -> HeuristicDecision {
    state.record(HeuristicSignal::Done, now);
    state.suppressed_until_reactivation = true;
    state.interrupt_seen_at = None;
    state.interrupt_present = false;
    HeuristicDecision::emit(HeuristicSignal::Done, reason)
}

fn detect_completion(
    state: &mut HeuristicPaneState,
    config: &HeuristicConfig,
    classifiers: &Classifiers,
    input: CompletionInputs<'_>,
) -> HeuristicDecision {
    let CompletionInputs {
        now,
        quiet,
        hash_stable,
        last_line,
        interrupt_disappeared,
        approval_appeared,
    } = input;
    let debounce = config.debounce_secs;

    if quiet >= config.quiet_done_secs && classifiers.is_finished_line(last_line) {
        if in_debounce(state, HeuristicSignal::Done, now, debounce) {
            return HeuristicDecision::skip("debounce");
        }
        return emit_done(state, now, format!("prompt_anchor quiet={:.1}s", quiet));
    }

    if interrupt_disappeared {
        let has_quiet = quiet >= config.interrupt_done_secs;
        if has_quiet || classifiers.is_finished_line(last_line) {
            if in_debounce(state, HeuristicSignal::Done, now, debounce) {
                return HeuristicDecision::skip("debounce");
            }
            return emit_done(state, now, format!("interrupt_disappeared quiet={:.1}s", quiet));
        }
        return HeuristicDecision::skip("interrupt_disappeared_no_quiet");
    }

    if approval_appeared {
        if in_debounce(state, HeuristicSignal::Wait, now, debounce) {
            return HeuristicDecision::skip("debounce");
        }
        state.record(HeuristicSignal::Wait, now);
        return HeuristicDecision::emit(HeuristicSignal::Wait, "approval_appeared".to_string());
    }

    if quiet >= config.quiet_wait_secs
        && (classifiers.is_spinner(last_line) || classifiers.is_interactive(last_line))
    {
        if in_debounce(state, HeuristicSignal::Wait, now, debounce) {
            return HeuristicDecision::skip("debounce");
        }
        state.record(HeuristicSignal::Wait, now);
        return HeuristicDecision::emit(
            HeuristicSignal::Wait,
            format!("spinner/interactivity quiet={:.1}s", quiet),
        );
    }

    if quiet >= config.quiet_idle_secs && hash_stable {
        if classifiers.is_spinner(last_line) {
            return HeuristicDecision::skip("spinner_active");
        }
        if classifiers.is_interactive(last_line) {
            return HeuristicDecision::skip("interactivity_active");
        }
        if classifiers.is_prompt_anchor(last_line) {
            return HeuristicDecision::skip("prompt_anchor_should_be_done");
        }
        if in_debounce(state, HeuristicSignal::Idle, now, debounce) {
            return HeuristicDecision::skip("debounce");
        }
        let throttled = state
            .last_idle_emit_at
            .map(|at| seconds_between(at, now) < config.reemit_idle_secs)
            .unwrap_or(false);
        if throttled {
            return HeuristicDecision::skip("idle_reemit_throttle");
        }
        state.record(HeuristicSignal::Idle, now);
        state.last_idle_emit_at = Some(now);
        state.suppressed_until_reactivation = true;
        return HeuristicDecision::emit(
            HeuristicSignal::Idle,
            format!("quiet_stable quiet={:.1}s", quiet),
        );
    }

    HeuristicDecision::skip("no_completion_signal")
}
