//! Ingress normalization.
//!
//! Raw hook events arrive with loosely formatted event names, unsanitized
//! command lines and session ids in several shapes. Everything is reduced to
//! a canonical [`Signal`] here before it reaches a pane queue.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::clock::seconds_between;
use crate::config::TimingConfig;
use crate::heuristic::HookMonitorStatus;
use crate::ids::normalize_pane_id;
use crate::rules::AI_TOOL_SOURCES;
use crate::types::Signal;

pub const MAX_COMMAND_LEN: usize = 120;

/// Sources whose events count as native hook activity for the heuristic
/// silence gate.
pub const NATIVE_HOOK_SOURCES: &[&str] = &["shell", "claude-code", "gemini", "codex"];

const FOCUS_SIGNAL: &str = "iterm.focus";

fn ai_tool_alias(event_type: &str) -> Option<&'static str> {
    let alias = match event_type.to_lowercase().as_str() {
        "stop" => "Stop",
        "pre_tool" | "pre_tool_use" => "PreToolUse",
        "post_tool" | "post_tool_use" => "PostToolUse",
        "session_start" => "SessionStart",
        "session_end" => "SessionEnd",
        "permission_prompt" => "Notification:permission_prompt",
        "idle_prompt" => "Notification:idle_prompt",
        "subagent_stop" => "SubagentStop",
        _ => return None,
    };
    Some(alias)
}

/// Canonical event type for `source`. AI-tool hooks accept snake_case
/// aliases, and a bare `Notification` is qualified by its
/// `notification_type` payload field.
pub fn normalize_event_type(source: &str, event_type: &str, payload: &Map<String, Value>) -> String {
    let event_type = event_type.trim();
    if !AI_TOOL_SOURCES.contains(&source) {
        return event_type.to_string();
    }
    if let Some(alias) = ai_tool_alias(event_type) {
        return alias.to_string();
    }
    if event_type == "Notification" {
        if let Some(kind) = payload
            .get("notification_type")
            .and_then(Value::as_str)
            .filter(|kind| !kind.is_empty())
        {
            return format!("Notification:{}", kind);
        }
    }
    event_type.to_string()
}

/// Removes NUL bytes, turns line breaks into spaces, collapses whitespace and
/// caps the result at `max_len` characters (with a trailing `...`).
pub fn sanitize_command(command: &str, max_len: usize) -> String {
    let collapsed = command
        .replace('\0', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.chars().count() <= max_len {
        return collapsed;
    }
    let keep = max_len.saturating_sub(3);
    let mut truncated: String = collapsed.chars().take(keep).collect();
    truncated.push_str("...");
    truncated
}

/// Why an event never became a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressRejection {
    EmptySource,
    EmptyPaneId,
    EmptyEventType,
    FocusDebounced,
}

impl IngressRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngressRejection::EmptySource => "empty_source",
            IngressRejection::EmptyPaneId => "empty_pane_id",
            IngressRejection::EmptyEventType => "empty_event_type",
            IngressRejection::FocusDebounced => "focus_debounced",
        }
    }
}

/// Stateful front door: focus debounce and native hook activity tracking.
#[derive(Debug, Clone)]
pub struct Ingress {
    focus_debounce_secs: f64,
    last_focus: Option<(String, DateTime<Utc>)>,
    hook_status: HashMap<String, HookMonitorStatus>,
}

impl Ingress {
    pub fn new(timing: &TimingConfig) -> Self {
        Self {
            focus_debounce_secs: timing.focus_debounce_secs,
            last_focus: None,
            hook_status: HashMap::new(),
        }
    }

    /// Builds the canonical signal for a raw event.
    pub fn normalize(
        &mut self,
        source: &str,
        pane_id: &str,
        event_type: &str,
        mut payload: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Signal, IngressRejection> {
        let source = source.trim().to_lowercase();
        if source.is_empty() {
            return Err(IngressRejection::EmptySource);
        }
        let pane_id = normalize_pane_id(pane_id);
        if pane_id.is_empty() {
            return Err(IngressRejection::EmptyPaneId);
        }
        let event_type = normalize_event_type(&source, event_type, &payload);
        if event_type.is_empty() {
            return Err(IngressRejection::EmptyEventType);
        }

        if source == "shell" && event_type == "command_start" {
            if let Some(command) = payload.get("command").and_then(Value::as_str) {
                let sanitized = sanitize_command(command, MAX_COMMAND_LEN);
                payload.insert("command".to_string(), Value::String(sanitized));
            }
        }

        let signal = Signal::new(source, pane_id, event_type, payload, now);

        if signal.signal == FOCUS_SIGNAL && self.is_focus_debounced(&signal.pane_id, now) {
            tracing::debug!(pane_id = %signal.pane_id, "Focus event debounced");
            return Err(IngressRejection::FocusDebounced);
        }

        if NATIVE_HOOK_SOURCES.contains(&signal.source.as_str()) {
            self.hook_status.insert(
                signal.pane_id.clone(),
                HookMonitorStatus {
                    active: true,
                    last_event_at: Some(now),
                },
            );
        }
        Ok(signal)
    }

    fn is_focus_debounced(&mut self, pane_id: &str, now: DateTime<Utc>) -> bool {
        if let Some((last_pane, last_at)) = &self.last_focus {
            if last_pane == pane_id && seconds_between(*last_at, now) < self.focus_debounce_secs {
                return true;
            }
        }
        self.last_focus = Some((pane_id.to_string(), now));
        false
    }

    pub fn hook_status(&self, pane_id: &str) -> HookMonitorStatus {
        self.hook_status.get(pane_id).cloned().unwrap_or_default()
    }

    /// Replaces a pane's hook status with one reported by an external monitor.
    pub fn set_hook_status(&mut self, pane_id: &str, status: HookMonitorStatus) {
        self.hook_status.insert(normalize_pane_id(pane_id), status);
    }

    pub fn forget(&mut self, pane_id: &str) {
        self.hook_status.remove(pane_id);
        if matches!(&self.last_focus, Some((last, _)) if last == pane_id) {
            self.last_focus = None;
        }
    }
}
