//! File logging for the hook binary.
//!
//! Hooks run inside the user's shell and agent processes, so nothing may be
//! written to stdout or stderr. Logs go to `~/.termsup/logs/hook.log.<date>`.

use fs_err as fs;
use std::env;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_PREFIX: &str = "hook.log";

/// Installs the subscriber. The returned guard must live until exit so the
/// background writer flushes.
pub fn init() -> Option<WorkerGuard> {
    let dir = log_dir()?;
    if fs::create_dir_all(&dir).is_err() {
        return None;
    }

    let appender = tracing_appender::rolling::daily(&dir, LOG_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("TERMSUP_HOOK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    match tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
    {
        Ok(()) => Some(guard),
        Err(_) => None,
    }
}

fn log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".termsup").join("logs"))
}

fn debug_enabled() -> bool {
    env::var("TERMSUP_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}
