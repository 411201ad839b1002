//! Terminal adapters and the content poller.
//!
//! An adapter enumerates live panes and captures their visible text. The
//! poller feeds both into the [`Engine`]: captures become content
//! observations, and the pane list drives liveness cleanup.

use std::collections::HashSet;
use std::process::Command;

use crate::engine::Engine;
use crate::error::{Result, TermsupError};
use crate::heuristic::PaneMetadata;

/// One pane as reported by the terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaneInfo {
    pub pane_id: String,
    pub job_name: String,
    pub title: String,
    pub command_line: String,
}

impl PaneInfo {
    pub fn metadata(&self) -> PaneMetadata {
        PaneMetadata {
            job_name: self.job_name.clone(),
            title: self.title.clone(),
            command_line: self.command_line.clone(),
        }
    }
}

/// Access to a terminal multiplexer's panes.
///
/// Implementations must be cheap to call repeatedly; the poller invokes
/// `list_panes` once per cycle and `capture` once per pane.
pub trait TerminalAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn list_panes(&self) -> Result<Vec<PaneInfo>>;

    /// The last `lines` lines of a pane's visible content.
    fn capture(&self, pane_id: &str, lines: usize) -> Result<String>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// tmux
// ═══════════════════════════════════════════════════════════════════════════════

const LIST_PANES_FORMAT: &str =
    "#{pane_id}\t#{pane_current_command}\t#{pane_title}\t#{pane_start_command}";

#[derive(Debug, Clone, Default)]
pub struct TmuxCommandAdapter;

impl TerminalAdapter for TmuxCommandAdapter {
    fn name(&self) -> &'static str {
        "tmux"
    }

    fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        let output = run_tmux(&["list-panes", "-a", "-F", LIST_PANES_FORMAT])?;
        Ok(parse_list_panes(&output))
    }

    fn capture(&self, pane_id: &str, lines: usize) -> Result<String> {
        let start = format!("-{}", lines.max(1));
        run_tmux(&["capture-pane", "-p", "-J", "-t", pane_id, "-S", &start])
    }
}

fn run_tmux(args: &[&str]) -> Result<String> {
    let output = Command::new("tmux")
        .args(args)
        .output()
        .map_err(|err| TermsupError::AdapterUnavailable(format!("tmux: {}", err)))?;
    if !output.status.success() {
        return Err(TermsupError::CommandFailed {
            command: format!("tmux {}", args.join(" ")),
            details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub fn parse_list_panes(output: &str) -> Vec<PaneInfo> {
    let mut panes = output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let pane_id = parts.next()?.trim();
            if pane_id.is_empty() {
                return None;
            }
            let mut field = || parts.next().map(str::trim).unwrap_or_default().to_string();
            Some(PaneInfo {
                pane_id: pane_id.to_string(),
                job_name: field(),
                title: field(),
                command_line: field(),
            })
        })
        .collect::<Vec<_>>();
    panes.sort_by(|left, right| left.pane_id.cmp(&right.pane_id));
    panes
}

/// Adapter for hosts without a multiplexer: no panes, no content.
#[derive(Debug, Clone, Default)]
pub struct NullAdapter;

impl TerminalAdapter for NullAdapter {
    fn name(&self) -> &'static str {
        "none"
    }

    fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        Ok(Vec::new())
    }

    fn capture(&self, _pane_id: &str, _lines: usize) -> Result<String> {
        Ok(String::new())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Poller
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub panes: usize,
    pub captured: usize,
    pub failed: usize,
    pub closed: Vec<String>,
}

#[derive(Debug)]
pub struct ContentPoller<A: TerminalAdapter> {
    adapter: A,
    capture_lines: usize,
}

impl<A: TerminalAdapter> ContentPoller<A> {
    pub fn new(adapter: A, capture_lines: usize) -> Self {
        Self {
            adapter,
            capture_lines,
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// One poll cycle. A failed listing aborts the cycle without touching
    /// liveness, so a flaky multiplexer never wipes the registry.
    pub fn poll_once(&self, engine: &Engine) -> Result<PollSummary> {
        let panes = self.adapter.list_panes()?;
        let mut summary = PollSummary {
            panes: panes.len(),
            ..PollSummary::default()
        };

        for pane in &panes {
            engine.update_metadata(&pane.pane_id, pane.metadata());
            match self.adapter.capture(&pane.pane_id, self.capture_lines) {
                Ok(content) => {
                    engine.submit_content(&pane.pane_id, &content, None);
                    summary.captured += 1;
                }
                Err(err) => {
                    summary.failed += 1;
                    tracing::debug!(
                        adapter = self.adapter.name(),
                        pane_id = %pane.pane_id,
                        error = %err,
                        "Pane capture failed"
                    );
                }
            }
        }

        let live: HashSet<String> = panes.into_iter().map(|pane| pane.pane_id).collect();
        summary.closed = engine.sync_liveness(&live);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RuntimeConfig;
    use chrono::{DateTime, Utc};
    use serde_json::Map;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[test]
    fn parse_list_panes_skips_blank_ids_and_sorts() {
        let output = "%2\tcodex\tcodex: repo\tcodex --full-auto\n\t\t\t\n%1\tzsh\tshell\t\n";
        let panes = parse_list_panes(output);
        assert_eq!(panes.len(), 2);
        assert_eq!(panes[0].pane_id, "%1");
        assert_eq!(panes[0].command_line, "");
        assert_eq!(panes[1].job_name, "codex");
        assert_eq!(panes[1].title, "codex: repo");
        assert_eq!(panes[1].command_line, "codex --full-auto");
    }

    #[test]
    fn parse_list_panes_tolerates_missing_columns() {
        let panes = parse_list_panes("%7\tvim\n");
        assert_eq!(
            panes,
            vec![PaneInfo {
                pane_id: "%7".to_string(),
                job_name: "vim".to_string(),
                ..PaneInfo::default()
            }]
        );
    }

    struct FakeAdapter {
        panes: Mutex<Option<Vec<PaneInfo>>>,
        content: HashMap<String, String>,
    }

    impl FakeAdapter {
        fn new(panes: Vec<PaneInfo>, content: &[(&str, &str)]) -> Self {
            Self {
                panes: Mutex::new(Some(panes)),
                content: content
                    .iter()
                    .map(|(id, text)| (id.to_string(), text.to_string()))
                    .collect(),
            }
        }

        fn fail_listing(&self) {
            *self.panes.lock().unwrap() = None;
        }
    }

    impl TerminalAdapter for FakeAdapter {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn list_panes(&self) -> Result<Vec<PaneInfo>> {
            self.panes
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| TermsupError::AdapterUnavailable("gone".to_string()))
        }

        fn capture(&self, pane_id: &str, _lines: usize) -> Result<String> {
            self.content
                .get(pane_id)
                .cloned()
                .ok_or_else(|| TermsupError::CommandFailed {
                    command: "capture".to_string(),
                    details: pane_id.to_string(),
                })
        }
    }

    fn pane(id: &str, job: &str) -> PaneInfo {
        PaneInfo {
            pane_id: id.to_string(),
            job_name: job.to_string(),
            ..PaneInfo::default()
        }
    }

    fn engine() -> Engine {
        let start = DateTime::parse_from_rfc3339("2026-02-01T09:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        Engine::new(RuntimeConfig::default(), Arc::new(ManualClock::new(start))).expect("engine")
    }

    #[test]
    fn poll_captures_panes_and_removes_closed_ones() {
        let engine = engine();
        engine.submit("shell", "%9", "command_start", Map::new());

        let adapter = FakeAdapter::new(
            vec![pane("%1", "zsh"), pane("%2", "codex")],
            &[("%1", "$ ls\nfile\n")],
        );
        let poller = ContentPoller::new(adapter, 50);
        let summary = poller.poll_once(&engine).expect("poll");

        assert_eq!(summary.panes, 2);
        assert_eq!(summary.captured, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.closed, vec!["%9".to_string()]);
        assert!(engine.query_status("%9").is_none());
    }

    #[test]
    fn failed_listing_leaves_registry_alone() {
        let engine = engine();
        engine.submit("shell", "%1", "command_start", Map::new());
        let adapter = FakeAdapter::new(Vec::new(), &[]);
        adapter.fail_listing();
        let poller = ContentPoller::new(adapter, 50);

        assert!(poller.poll_once(&engine).is_err());
        assert!(engine.query_status("%1").is_some());
    }

    #[test]
    fn null_adapter_reports_nothing() {
        let adapter = NullAdapter;
        assert!(adapter.list_panes().unwrap().is_empty());
        assert_eq!(adapter.capture("%1", 10).unwrap(), "");
    }
}
