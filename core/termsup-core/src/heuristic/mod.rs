//! Content heuristics for panes running tools without native hooks.
//!
//! - [`window`]: per-pane content records, hashing and change metrics
//! - [`patterns`]: prompt, spinner, interactivity and marker classifiers
//! - [`detectors`]: config-driven line detectors with per-target cooldowns
//! - [`analyzer`]: the run/done/wait/idle decision procedure

pub mod analyzer;
pub mod detectors;
pub mod patterns;
pub mod window;

pub use analyzer::{
    ContentObservation, HeuristicAnalyzer, HeuristicDebug, HeuristicDecision, HeuristicSignal,
    HookMonitorStatus, PaneMetadata,
};
pub use detectors::{cooldown_key, DetectorHit, DetectorTable};
pub use patterns::Classifiers;
pub use window::{changed_line_count, clean_content, content_hash, ContentWindow};
