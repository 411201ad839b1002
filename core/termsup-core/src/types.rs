//! Core value types shared by the queue, rule table, state machine and
//! display layer.
//!
//! Everything here is plain data: cloneable, serializable, and free of
//! locking. Ownership of live state lives in [`crate::manager`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ═══════════════════════════════════════════════════════════════════════════════
// Task Status
// ═══════════════════════════════════════════════════════════════════════════════

/// The single authoritative status of a pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Idle,
    Running,
    LongRunning,
    WaitingApproval,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Idle => "IDLE",
            TaskStatus::Running => "RUNNING",
            TaskStatus::LongRunning => "LONG_RUNNING",
            TaskStatus::WaitingApproval => "WAITING_APPROVAL",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "IDLE" => Some(TaskStatus::Idle),
            "RUNNING" => Some(TaskStatus::Running),
            "LONG_RUNNING" => Some(TaskStatus::LongRunning),
            "WAITING_APPROVAL" => Some(TaskStatus::WaitingApproval),
            "DONE" => Some(TaskStatus::Done),
            "FAILED" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// RUNNING or LONG_RUNNING.
    pub fn is_running(&self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::LongRunning)
    }

    /// DONE or FAILED.
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    /// A status that some source is actively claiming.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Running | TaskStatus::LongRunning | TaskStatus::WaitingApproval
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Signals
// ═══════════════════════════════════════════════════════════════════════════════

/// A normalized observation about one pane.
///
/// `signal` is always `"{source}.{event_type}"`. A `pane_generation` of 0
/// means "not stamped yet"; the manager fills in the pane's current
/// generation on enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub source: String,
    pub pane_id: String,
    pub event_type: String,
    pub signal: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub pane_generation: u64,
}

impl Signal {
    pub fn new(
        source: impl Into<String>,
        pane_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Map<String, Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let source = source.into();
        let event_type = event_type.into();
        Self {
            signal: format!("{}.{}", source, event_type),
            source,
            pane_id: pane_id.into(),
            event_type,
            payload,
            timestamp,
            pane_generation: 0,
        }
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.pane_generation = generation;
        self
    }

    /// Same source, payload and stamping under a different event type.
    pub fn renamed(&self, event_type: &str) -> Self {
        Self {
            signal: format!("{}.{}", self.source, event_type),
            event_type: event_type.to_string(),
            ..self.clone()
        }
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Integer payload field; numeric strings are accepted since shell hooks
    /// often pass `$?` through as text.
    pub fn payload_i64(&self, key: &str) -> Option<i64> {
        match self.payload.get(key)? {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|value| value as i64)),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Renders a payload value the way it should appear in a description.
pub fn payload_display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// State Machine Output
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of one successful transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub pane_id: String,
    pub signal: String,
    pub old_status: TaskStatus,
    pub new_status: TaskStatus,
    pub old_source: String,
    pub new_source: String,
    pub description: String,
    pub state_id: u64,
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds between the previous `started_at` and the transition.
    pub running_duration: f64,
    pub timestamp: DateTime<Utc>,
}

/// One attempted transition, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub signal: String,
    pub from_status: TaskStatus,
    pub to_status: TaskStatus,
    pub from_source: String,
    pub to_source: String,
    pub description: String,
    pub state_id: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub pane_generation: u64,
}

/// Read-only view of a machine handed to predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub status: TaskStatus,
    pub source: String,
    pub state_id: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub pane_generation: u64,
    /// Generation in force when the pane escalated to LONG_RUNNING.
    pub escalated_generation: Option<u64>,
    pub now: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Display Projection
// ═══════════════════════════════════════════════════════════════════════════════

/// User-facing projection of a pane's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayState {
    pub status: TaskStatus,
    pub source: String,
    pub description: String,
    pub state_id: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub running_duration: f64,
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub recently_finished: bool,
    #[serde(default)]
    pub quiet_completion: bool,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            status: TaskStatus::Idle,
            source: "shell".to_string(),
            description: String::new(),
            state_id: 0,
            started_at: None,
            running_duration: 0.0,
            content_hash: String::new(),
            recently_finished: false,
            quiet_completion: false,
        }
    }
}

/// Delivered to subscribers on every visible change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayNotification {
    pub pane_id: String,
    pub state: DisplayState,
    pub suppressed: bool,
    pub reason: String,
}

/// Answer to `query_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaneStatus {
    pub pane_id: String,
    pub status: TaskStatus,
    pub source: String,
    pub description: String,
    pub state_id: u64,
    pub pane_generation: u64,
    pub running_duration: f64,
    pub display: DisplayState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn signal_string_joins_source_and_event() {
        let signal = Signal::new("shell", "%1", "command_start", Map::new(), Utc::now());
        assert_eq!(signal.signal, "shell.command_start");
        assert_eq!(signal.pane_generation, 0);
    }

    #[test]
    fn renamed_keeps_generation_and_payload() {
        let signal = Signal::new(
            "content",
            "%1",
            "changed",
            payload(json!({"content": "x"})),
            Utc::now(),
        )
        .with_generation(3);
        let renamed = signal.renamed("update");
        assert_eq!(renamed.signal, "content.update");
        assert_eq!(renamed.pane_generation, 3);
        assert_eq!(renamed.payload_str("content"), Some("x"));
    }

    #[test]
    fn payload_i64_accepts_numeric_strings() {
        let signal = Signal::new(
            "shell",
            "%1",
            "command_end",
            payload(json!({"exit_code": "2", "other": 7, "bad": "x"})),
            Utc::now(),
        );
        assert_eq!(signal.payload_i64("exit_code"), Some(2));
        assert_eq!(signal.payload_i64("other"), Some(7));
        assert_eq!(signal.payload_i64("bad"), None);
        assert_eq!(signal.payload_i64("missing"), None);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TaskStatus::Idle,
            TaskStatus::Running,
            TaskStatus::LongRunning,
            TaskStatus::WaitingApproval,
            TaskStatus::Done,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::from_str("working"), None);
    }

    #[test]
    fn status_serializes_screaming_snake_case() {
        let value = serde_json::to_value(TaskStatus::WaitingApproval).expect("serialize");
        assert_eq!(value, json!("WAITING_APPROVAL"));
    }
}
