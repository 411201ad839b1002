//! Snapshot persistence.
//!
//! The engine state is written as one JSON document:
//!
//! ```json
//! { "version": 2, "saved_at": "...", "machines": {..}, "panes": {..}, "checksum": "<sha256>" }
//! ```
//!
//! The checksum covers the document without its `checksum` field. Writes go
//! through a temp file in the same directory and a rename. A missing file, a
//! version mismatch, a checksum mismatch or unparseable content all load as
//! "no snapshot"; the caller starts cold.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{Result, TermsupError};
use crate::machine::MachineRecord;
use crate::types::DisplayState;

pub const SNAPSHOT_VERSION: u32 = 2;
const CHECKSUM_FIELD: &str = "checksum";

/// Everything needed to restore the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub machines: BTreeMap<String, MachineRecord>,
    pub panes: BTreeMap<String, DisplayState>,
}

impl EngineSnapshot {
    pub fn new(
        saved_at: DateTime<Utc>,
        machines: BTreeMap<String, MachineRecord>,
        panes: BTreeMap<String, DisplayState>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at,
            machines,
            panes,
        }
    }
}

/// Default snapshot location: `~/.termsup/state.json`.
pub fn default_snapshot_path() -> std::result::Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not determine home directory")?;
    Ok(home.join(".termsup").join("state.json"))
}

fn checksum_of(value: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(value).map_err(|source| TermsupError::Json {
        context: "serializing snapshot for checksum".to_string(),
        source,
    })?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Writes `snapshot` atomically to `path`, creating parent directories.
pub fn save_snapshot(path: &Path, snapshot: &EngineSnapshot) -> Result<()> {
    let mut document = serde_json::to_value(snapshot).map_err(|source| TermsupError::Json {
        context: "serializing snapshot".to_string(),
        source,
    })?;
    let checksum = checksum_of(&document)?;
    if let Value::Object(map) = &mut document {
        map.insert(CHECKSUM_FIELD.to_string(), Value::String(checksum));
    }
    let contents = serde_json::to_string_pretty(&document).map_err(|source| TermsupError::Json {
        context: "encoding snapshot".to_string(),
        source,
    })?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs_err::create_dir_all(dir).map_err(|source| TermsupError::Io {
        context: format!("creating snapshot directory {}", dir.display()),
        source,
    })?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|source| TermsupError::Io {
        context: format!("creating temp file in {}", dir.display()),
        source,
    })?;
    tmp.write_all(contents.as_bytes())
        .map_err(|source| TermsupError::Io {
            context: format!("writing temp file for {}", path.display()),
            source,
        })?;
    tmp.flush().map_err(|source| TermsupError::Io {
        context: format!("flushing temp file for {}", path.display()),
        source,
    })?;
    tmp.persist(path).map_err(|err| TermsupError::Io {
        context: format!("persisting snapshot to {}", path.display()),
        source: err.error,
    })?;

    tracing::info!(
        path = %path.display(),
        machines = snapshot.machines.len(),
        panes = snapshot.panes.len(),
        "Saved engine snapshot"
    );
    Ok(())
}

/// Reads a snapshot. `Ok(None)` covers every "treat as absent" case; only an
/// unreadable existing file is an error.
pub fn load_snapshot(path: &Path) -> Result<Option<EngineSnapshot>> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No snapshot file");
        return Ok(None);
    }
    let contents = fs_err::read_to_string(path).map_err(|source| TermsupError::Io {
        context: format!("reading snapshot {}", path.display()),
        source,
    })?;

    let mut document: Value = match serde_json::from_str(&contents) {
        Ok(document) => document,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Snapshot is not valid JSON, ignoring");
            return Ok(None);
        }
    };

    let version = document.get("version").and_then(Value::as_u64).unwrap_or(1);
    if version != u64::from(SNAPSHOT_VERSION) {
        tracing::warn!(
            path = %path.display(),
            file_version = version,
            expected = SNAPSHOT_VERSION,
            "Snapshot version mismatch, ignoring"
        );
        return Ok(None);
    }

    let stored = document
        .as_object_mut()
        .and_then(|map| map.remove(CHECKSUM_FIELD))
        .and_then(|value| value.as_str().map(str::to_string));
    let Some(stored) = stored else {
        tracing::warn!(path = %path.display(), "Snapshot has no checksum, ignoring");
        return Ok(None);
    };
    let calculated = checksum_of(&document)?;
    if calculated != stored {
        tracing::warn!(path = %path.display(), "Snapshot checksum mismatch, ignoring");
        return Ok(None);
    }

    match serde_json::from_value::<EngineSnapshot>(document) {
        Ok(snapshot) => {
            tracing::info!(
                path = %path.display(),
                machines = snapshot.machines.len(),
                panes = snapshot.panes.len(),
                "Loaded engine snapshot"
            );
            Ok(Some(snapshot))
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Snapshot has unexpected shape, ignoring");
            Ok(None)
        }
    }
}
