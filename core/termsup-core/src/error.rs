//! Error types for termsup-core operations.
//!
//! Runtime rejections (stale generations, queue overflow, unmatched rules)
//! are values, not errors. Only startup configuration and I/O at the edges
//! surface as `TermsupError`.

use std::path::PathBuf;

/// All errors that can occur in termsup-core operations.
#[derive(Debug, thiserror::Error)]
pub enum TermsupError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file unreadable: {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Invalid pattern {name:?} ({pattern}): {source}")]
    InvalidPattern {
        name: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid rule table: rule {rule}: {details}")]
    InvalidRuleTable { rule: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Persistence Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Adapter Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Terminal adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("Command execution failed: {command}: {details}")]
    CommandFailed { command: String, details: String },
}

/// Convenience type alias for Results using TermsupError.
pub type Result<T> = std::result::Result<T, TermsupError>;

// Conversion for string error compatibility
impl From<TermsupError> for String {
    fn from(err: TermsupError) -> String {
        err.to_string()
    }
}
