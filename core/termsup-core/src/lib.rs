//! # termsup-core
//!
//! Per-pane task status arbitration for terminal supervisors. Hook events,
//! timers, focus changes and captured pane content all arrive as signals;
//! the engine decides what each pane is doing and what the UI should show.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Time comes from an injectable [`Clock`],
//!   and periodic work runs when the host calls [`Engine::tick`].
//! - **Per-pane serialization**: Every pane has a bounded queue drained by at
//!   most one thread at a time. Different panes never block each other.
//! - **Data-driven transitions**: The [`RuleTable`] owns every status change.
//!   Non-matching signals are recorded, not raised.
//! - **Graceful degradation**: A missing or corrupt snapshot means a cold
//!   start; a missing config file means defaults.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use termsup_core::{Engine, RuntimeConfig, SystemClock};
//!
//! let engine = Engine::new(RuntimeConfig::default(), Arc::new(SystemClock))?;
//! engine.submit("shell", "%3", "command_start", payload);
//! engine.drain_all();
//! let status = engine.query_status("%3");
//! ```

pub mod adapter;
pub mod clock;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod heuristic;
pub mod ids;
pub mod ingress;
pub mod machine;
pub mod manager;
pub mod persistence;
pub mod queue;
pub mod rules;
pub mod timer;
pub mod types;

pub use adapter::{ContentPoller, NullAdapter, PaneInfo, PollSummary, TerminalAdapter, TmuxCommandAdapter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, AdapterKind, RuntimeConfig};
pub use engine::{ContentOutcome, Engine, EngineDebugSnapshot, EngineHealth, SubmitOutcome};
pub use error::{Result, TermsupError};
pub use heuristic::{HeuristicSignal, HookMonitorStatus, PaneMetadata};
pub use ids::normalize_pane_id;
pub use machine::{PaneStateMachine, Transition};
pub use manager::{
    DebugEvent, DrainReport, ManagerMetrics, PaneDebugSnapshot, PaneSummary, StateManager,
    TickReport,
};
pub use persistence::{default_snapshot_path, EngineSnapshot};
pub use queue::{EnqueueOutcome, EnqueueResult};
pub use rules::{RuleTable, SourcePriority};
pub use types::*;
