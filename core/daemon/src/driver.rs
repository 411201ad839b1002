//! Background threads: the drain/tick loop and the optional terminal poller.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use termsup_core::clock::duration_from_secs_f64;
use termsup_core::timer::DelayScheduler;
use termsup_core::{AdapterKind, ContentPoller, Engine, RuntimeConfig, TmuxCommandAdapter};

const TICK_INTERVAL: &str = "tick";
const SNAPSHOT_INTERVAL: &str = "snapshot";

/// Drains every pane queue on a short cadence and runs the tick and snapshot
/// intervals from one scheduler, so only this thread fires timers.
pub fn spawn_driver(engine: Arc<Engine>, config: &RuntimeConfig, snapshot_path: Option<PathBuf>) {
    let drain_every = Duration::from_millis(config.daemon.drain_interval_ms.max(10));
    let tick_every = duration_from_secs_f64(config.timing.tick_interval_ms.max(10) as f64 / 1000.0);
    let snapshot_every = duration_from_secs_f64(config.daemon.snapshot_interval_secs.max(1) as f64);

    thread::spawn(move || {
        let mut scheduler: DelayScheduler<()> = DelayScheduler::new();
        let started = Utc::now();
        scheduler.register_interval(TICK_INTERVAL, tick_every, started);
        if snapshot_path.is_some() {
            scheduler.register_interval(SNAPSHOT_INTERVAL, snapshot_every, started);
        }

        loop {
            thread::sleep(drain_every);
            let drained = engine.drain_all();
            if !drained.changes.is_empty() {
                debug!(
                    processed = drained.processed,
                    changes = drained.changes.len(),
                    "Drained pane queues"
                );
            }

            for name in scheduler.take_due_intervals(Utc::now()) {
                match name.as_str() {
                    TICK_INTERVAL => {
                        let report = engine.tick();
                        if !report.changes.is_empty() {
                            debug!(
                                delayed_actions = report.delayed_actions,
                                long_running = ?report.long_running,
                                waiting_fallbacks = ?report.waiting_fallbacks,
                                "Timer tick produced changes"
                            );
                            engine.drain_all();
                        }
                    }
                    SNAPSHOT_INTERVAL => {
                        if let Some(path) = snapshot_path.as_deref() {
                            if let Err(err) = engine.save(path) {
                                warn!(error = %err, path = %path.display(), "Failed to write snapshot");
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    });
}

/// Starts the content poller when an adapter is configured.
pub fn spawn_poller(engine: Arc<Engine>, config: &RuntimeConfig) {
    if config.daemon.adapter != AdapterKind::Tmux {
        info!("No terminal adapter configured; content polling disabled");
        return;
    }

    let every = Duration::from_millis(config.daemon.poll_interval_ms.max(100));
    let poller = ContentPoller::new(TmuxCommandAdapter, config.heuristic.max_scan_lines);

    thread::spawn(move || {
        let mut failing = false;
        loop {
            match poller.poll_once(&engine) {
                Ok(summary) => {
                    if failing {
                        info!("Terminal adapter recovered");
                        failing = false;
                    }
                    if !summary.closed.is_empty() || summary.failed > 0 {
                        debug!(
                            panes = summary.panes,
                            captured = summary.captured,
                            failed = summary.failed,
                            closed = ?summary.closed,
                            "Content poll"
                        );
                    }
                }
                Err(err) => {
                    if failing {
                        debug!(error = %err, "Terminal adapter still unavailable");
                    } else {
                        warn!(error = %err, "Terminal adapter poll failed");
                        failing = true;
                    }
                }
            }
            thread::sleep(every);
        }
    });
}
