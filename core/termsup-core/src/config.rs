//! Runtime configuration for the engine and daemon.
//!
//! Loaded from `~/.termsup/config.toml`. Every section and field has a
//! default, so a missing file or a partial file is fine; a file that does not
//! parse is a startup error.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, TermsupError};

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".termsup/config.toml";

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_QUEUE_HIGH_WATERMARK: f64 = 0.75;
pub const DEFAULT_LOW_PRIORITY_DROP_WATERMARK: f64 = 0.5;
pub const DEFAULT_HISTORY_MAX: usize = 30;
pub const DEFAULT_HISTORY_PERSIST: usize = 10;
pub const DEFAULT_DESCRIPTION_MAX: usize = 50;

// ═══════════════════════════════════════════════════════════════════════════════
// Top Level
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub priority: PriorityConfig,
    #[serde(default)]
    pub heuristic: HeuristicConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

pub fn default_config_path() -> std::result::Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

/// Reads the config file at `path` (or the default location). A missing file
/// yields defaults.
pub fn load_config(path: Option<PathBuf>) -> Result<RuntimeConfig> {
    let config_path = match path {
        Some(path) => path,
        None => match default_config_path() {
            Ok(path) => path,
            Err(_) => return Ok(RuntimeConfig::default()),
        },
    };

    if !config_path.exists() {
        return Ok(RuntimeConfig::default());
    }

    let content =
        fs_err::read_to_string(&config_path).map_err(|source| TermsupError::ConfigRead {
            path: config_path.clone(),
            source,
        })?;
    parse_config(&content, &config_path)
}

pub fn parse_config(content: &str, origin: &Path) -> Result<RuntimeConfig> {
    toml::from_str::<RuntimeConfig>(content).map_err(|err| TermsupError::ConfigMalformed {
        path: origin.to_path_buf(),
        details: err.to_string(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Actor Queue
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    #[serde(default = "default_queue_high_watermark")]
    pub high_watermark: f64,
    #[serde(default = "default_low_priority_drop_watermark")]
    pub low_priority_drop_watermark: f64,
    #[serde(default = "default_protected_signals")]
    pub protected_signals: Vec<String>,
    #[serde(default = "default_low_priority_signals")]
    pub low_priority_signals: Vec<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            high_watermark: default_queue_high_watermark(),
            low_priority_drop_watermark: default_low_priority_drop_watermark(),
            protected_signals: default_protected_signals(),
            low_priority_signals: default_low_priority_signals(),
        }
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_queue_high_watermark() -> f64 {
    DEFAULT_QUEUE_HIGH_WATERMARK
}

fn default_low_priority_drop_watermark() -> f64 {
    DEFAULT_LOW_PRIORITY_DROP_WATERMARK
}

fn default_protected_signals() -> Vec<String> {
    vec![
        "shell.command_end".to_string(),
        "claude-code.Stop".to_string(),
        "claude-code.SessionEnd".to_string(),
    ]
}

fn default_low_priority_signals() -> Vec<String> {
    vec!["content.changed".to_string(), "content.update".to_string()]
}

// ═══════════════════════════════════════════════════════════════════════════════
// State Machine
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    #[serde(default = "default_history_max")]
    pub history_max: usize,
    #[serde(default = "default_history_persist")]
    pub history_persist: usize,
    #[serde(default = "default_description_max")]
    pub description_max: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            history_max: default_history_max(),
            history_persist: default_history_persist(),
            description_max: default_description_max(),
        }
    }
}

fn default_history_max() -> usize {
    DEFAULT_HISTORY_MAX
}

fn default_history_persist() -> usize {
    DEFAULT_HISTORY_PERSIST
}

fn default_description_max() -> usize {
    DEFAULT_DESCRIPTION_MAX
}

// ═══════════════════════════════════════════════════════════════════════════════
// Timing
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_long_running_threshold_secs")]
    pub long_running_threshold_secs: f64,
    #[serde(default = "default_display_delay_secs")]
    pub display_delay_secs: f64,
    #[serde(default = "default_notification_min_duration_secs")]
    pub notification_min_duration_secs: f64,
    #[serde(default = "default_quiet_completion_threshold_secs")]
    pub quiet_completion_threshold_secs: f64,
    #[serde(default = "default_auto_dismiss_dwell_secs")]
    pub auto_dismiss_dwell_secs: f64,
    #[serde(default = "default_recently_finished_hint_secs")]
    pub recently_finished_hint_secs: f64,
    #[serde(default = "default_waiting_fallback_timeout_secs")]
    pub waiting_fallback_timeout_secs: f64,
    #[serde(default = "default_true")]
    pub waiting_fallback_to_running: bool,
    #[serde(default = "default_focus_debounce_secs")]
    pub focus_debounce_secs: f64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            long_running_threshold_secs: default_long_running_threshold_secs(),
            display_delay_secs: default_display_delay_secs(),
            notification_min_duration_secs: default_notification_min_duration_secs(),
            quiet_completion_threshold_secs: default_quiet_completion_threshold_secs(),
            auto_dismiss_dwell_secs: default_auto_dismiss_dwell_secs(),
            recently_finished_hint_secs: default_recently_finished_hint_secs(),
            waiting_fallback_timeout_secs: default_waiting_fallback_timeout_secs(),
            waiting_fallback_to_running: true,
            focus_debounce_secs: default_focus_debounce_secs(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

fn default_long_running_threshold_secs() -> f64 {
    60.0
}

fn default_display_delay_secs() -> f64 {
    5.0
}

fn default_notification_min_duration_secs() -> f64 {
    3.0
}

fn default_quiet_completion_threshold_secs() -> f64 {
    3.0
}

fn default_auto_dismiss_dwell_secs() -> f64 {
    60.0
}

fn default_recently_finished_hint_secs() -> f64 {
    10.0
}

fn default_waiting_fallback_timeout_secs() -> f64 {
    120.0
}

fn default_focus_debounce_secs() -> f64 {
    0.3
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

// ═══════════════════════════════════════════════════════════════════════════════
// Source Priority
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct PriorityConfig {
    #[serde(default = "default_priority_levels")]
    pub levels: BTreeMap<String, i32>,
    #[serde(default)]
    pub default_level: i32,
    #[serde(default = "default_user_sources")]
    pub user_sources: Vec<String>,
    #[serde(default = "default_passthrough_sources")]
    pub passthrough_sources: Vec<String>,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            levels: default_priority_levels(),
            default_level: 0,
            user_sources: default_user_sources(),
            passthrough_sources: default_passthrough_sources(),
        }
    }
}

fn default_priority_levels() -> BTreeMap<String, i32> {
    [
        ("claude-code", 10),
        ("gemini", 10),
        ("codex", 10),
        ("shell", 1),
        ("render", 1),
        ("content", 1),
        ("timer", 0),
    ]
    .into_iter()
    .map(|(source, level)| (source.to_string(), level))
    .collect()
}

fn default_user_sources() -> Vec<String> {
    vec!["iterm".to_string(), "frontend".to_string()]
}

fn default_passthrough_sources() -> Vec<String> {
    vec![
        "timer".to_string(),
        "render".to_string(),
        "content".to_string(),
    ]
}

// ═══════════════════════════════════════════════════════════════════════════════
// Content Heuristic
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct HeuristicConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub prefer_job_name: bool,
    #[serde(default = "default_heuristic_whitelist")]
    pub job_whitelist: Vec<String>,
    #[serde(default = "default_heuristic_whitelist")]
    pub pane_whitelist: Vec<String>,
    #[serde(default = "default_prompt_silence_secs")]
    pub prompt_silence_secs: f64,
    #[serde(default = "default_quiet_done_secs")]
    pub quiet_done_secs: f64,
    #[serde(default = "default_quiet_wait_secs")]
    pub quiet_wait_secs: f64,
    #[serde(default = "default_quiet_idle_secs")]
    pub quiet_idle_secs: f64,
    #[serde(default = "default_interrupt_done_secs")]
    pub interrupt_done_secs: f64,
    #[serde(default = "default_min_newlines")]
    pub min_newlines: i64,
    #[serde(default = "default_min_burst_chars")]
    pub min_burst_chars: i64,
    #[serde(default = "default_heuristic_debounce_secs")]
    pub debounce_secs: f64,
    #[serde(default = "default_reemit_idle_secs")]
    pub reemit_idle_secs: f64,
    #[serde(default = "default_new_record_lines")]
    pub new_record_lines: usize,
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
    #[serde(default = "default_max_scan_lines")]
    pub max_scan_lines: usize,
    #[serde(default = "default_detector_cooldown_secs")]
    pub detector_cooldown_secs: f64,
    #[serde(default = "default_prompt_anchor_regex")]
    pub prompt_anchor_regex: String,
    #[serde(default = "default_interactivity_regex")]
    pub interactivity_regex: String,
    #[serde(default = "default_spinner_patterns")]
    pub spinner_patterns: Vec<String>,
    #[serde(default = "default_negative_patterns")]
    pub negative_patterns: Vec<String>,
    #[serde(default = "default_completion_tokens")]
    pub completion_tokens: Vec<String>,
    #[serde(default = "default_interrupt_patterns")]
    pub interrupt_patterns: Vec<String>,
    #[serde(default = "default_approval_patterns")]
    pub approval_patterns: Vec<String>,
    #[serde(default)]
    pub detectors: Vec<DetectorConfig>,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefer_job_name: true,
            job_whitelist: default_heuristic_whitelist(),
            pane_whitelist: default_heuristic_whitelist(),
            prompt_silence_secs: default_prompt_silence_secs(),
            quiet_done_secs: default_quiet_done_secs(),
            quiet_wait_secs: default_quiet_wait_secs(),
            quiet_idle_secs: default_quiet_idle_secs(),
            interrupt_done_secs: default_interrupt_done_secs(),
            min_newlines: default_min_newlines(),
            min_burst_chars: default_min_burst_chars(),
            debounce_secs: default_heuristic_debounce_secs(),
            reemit_idle_secs: default_reemit_idle_secs(),
            new_record_lines: default_new_record_lines(),
            tail_lines: default_tail_lines(),
            max_scan_lines: default_max_scan_lines(),
            detector_cooldown_secs: default_detector_cooldown_secs(),
            prompt_anchor_regex: default_prompt_anchor_regex(),
            interactivity_regex: default_interactivity_regex(),
            spinner_patterns: default_spinner_patterns(),
            negative_patterns: default_negative_patterns(),
            completion_tokens: default_completion_tokens(),
            interrupt_patterns: default_interrupt_patterns(),
            approval_patterns: default_approval_patterns(),
            detectors: Vec::new(),
        }
    }
}

/// One configured pattern detector, compiled at startup by
/// [`crate::heuristic::detectors::DetectorTable`].
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DetectorConfig {
    pub name: String,
    pub regex: String,
    #[serde(default)]
    pub ignore_case: bool,
    #[serde(default)]
    pub signal: Option<String>,
    #[serde(default)]
    pub guards: Vec<String>,
    #[serde(default)]
    pub target_group: Option<usize>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub target_strip: String,
    #[serde(default)]
    pub cooldown_secs: Option<f64>,
}

fn default_heuristic_whitelist() -> Vec<String> {
    ["gemini", "codex", "aider", "opencode", "cursor-agent"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_prompt_silence_secs() -> f64 {
    5.0
}

fn default_quiet_done_secs() -> f64 {
    2.0
}

fn default_quiet_wait_secs() -> f64 {
    3.0
}

fn default_quiet_idle_secs() -> f64 {
    10.0
}

fn default_interrupt_done_secs() -> f64 {
    1.5
}

fn default_min_newlines() -> i64 {
    2
}

fn default_min_burst_chars() -> i64 {
    40
}

fn default_heuristic_debounce_secs() -> f64 {
    3.0
}

fn default_reemit_idle_secs() -> f64 {
    60.0
}

fn default_new_record_lines() -> usize {
    20
}

fn default_tail_lines() -> usize {
    5
}

fn default_max_scan_lines() -> usize {
    50
}

fn default_detector_cooldown_secs() -> f64 {
    10.0
}

fn default_prompt_anchor_regex() -> String {
    r"(?:^|\s)(?:[$#%>❯›»]|>>>)\s*$".to_string()
}

fn default_interactivity_regex() -> String {
    r"(?i)(?:\(y/n\)|\[y/n\]|\(yes/no\)|press enter|press any key|[?:]\s*$)".to_string()
}

fn default_spinner_patterns() -> Vec<String> {
    vec![
        r"[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]".to_string(),
        r"\b\d{1,3}%".to_string(),
        r"(?i)\b(?:thinking|working|loading)\.{0,3}\s*$".to_string(),
    ]
}

fn default_negative_patterns() -> Vec<String> {
    vec![
        r"(?i)--\s*(?:more|insert)\s*--".to_string(),
        r"^\(END\)\s*$".to_string(),
    ]
}

fn default_completion_tokens() -> Vec<String> {
    ["done", "completed", "finished", "✓", "✔"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_interrupt_patterns() -> Vec<String> {
    vec![
        r"esc to (?:interrupt|cancel)".to_string(),
        r"ctrl\+c to (?:interrupt|cancel)".to_string(),
    ]
}

fn default_approval_patterns() -> Vec<String> {
    vec![
        r"\b1\.\s*yes\b".to_string(),
        r"allow (?:once|always)".to_string(),
        r"do you want to (?:proceed|continue|allow)".to_string(),
    ]
}

// ═══════════════════════════════════════════════════════════════════════════════
// Daemon
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    #[default]
    None,
    Tmux,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub adapter: AdapterKind,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    #[serde(default = "default_true")]
    pub persist_snapshot: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterKind::None,
            poll_interval_ms: default_poll_interval_ms(),
            drain_interval_ms: default_drain_interval_ms(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            persist_snapshot: true,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_drain_interval_ms() -> u64 {
    100
}

fn default_snapshot_interval_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_config(Some(path)).expect("load config");
        assert_eq!(config.queue.capacity, 256);
        assert_eq!(config.queue.high_watermark, 0.75);
        assert_eq!(config.machine.history_max, 30);
        assert_eq!(config.timing.display_delay_secs, 5.0);
        assert!(config
            .queue
            .protected_signals
            .contains(&"claude-code.Stop".to_string()));
        assert_eq!(config.priority.levels.get("claude-code"), Some(&10));
        assert_eq!(config.daemon.adapter, AdapterKind::None);
    }

    #[test]
    fn load_config_merges_partial_sections_with_defaults() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[queue]
capacity = 8

[timing]
long_running_threshold_secs = 30.5

[priority.levels]
aider = 5

[heuristic]
job_whitelist = ["aider"]

[[heuristic.detectors]]
name = "tool"
regex = "Running tool: (\\w+)"
target_group = 1
cooldown_secs = 2.0

[daemon]
adapter = "tmux"
"#,
        )
        .expect("write config");

        let config = load_config(Some(path)).expect("load config");
        assert_eq!(config.queue.capacity, 8);
        assert_eq!(config.queue.high_watermark, 0.75);
        assert_eq!(config.timing.long_running_threshold_secs, 30.5);
        assert_eq!(config.timing.display_delay_secs, 5.0);
        assert_eq!(config.priority.levels.get("aider"), Some(&5));
        assert_eq!(config.heuristic.job_whitelist, vec!["aider".to_string()]);
        assert_eq!(config.heuristic.detectors.len(), 1);
        assert_eq!(config.heuristic.detectors[0].target_group, Some(1));
        assert_eq!(config.daemon.adapter, AdapterKind::Tmux);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[queue\ncapacity = ").expect("write config");
        let err = load_config(Some(path)).expect_err("malformed config");
        assert!(matches!(err, TermsupError::ConfigMalformed { .. }));
    }
}
