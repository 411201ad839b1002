//! IPC protocol types and validation for termsup-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.
//!
//! Transport is one JSON request per line over a Unix socket, answered by one
//! JSON response line.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_CONTENT_BYTES: usize = 512 * 1024;
pub const MAX_PANE_ID_LEN: usize = 256;
pub const MAX_SOURCE_LEN: usize = 64;
pub const MAX_EVENT_TYPE_LEN: usize = 128;
pub const MAX_LIST_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Event,
    Content,
    GetStatus,
    GetSnapshot,
    ListSnapshots,
    SyncLiveness,
    BumpGeneration,
    RemovePane,
    SetFocus,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Method Parameters
// ═══════════════════════════════════════════════════════════════════════════════

/// `event`: one hook event for a pane.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EventEnvelope {
    pub source: String,
    pub pane_id: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl EventEnvelope {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_bounded(&self.source, "source", MAX_SOURCE_LEN)?;
        require_pane_id(&self.pane_id)?;
        require_bounded(&self.event_type, "event_type", MAX_EVENT_TYPE_LEN)?;
        Ok(())
    }
}

/// `content`: one captured snapshot of a pane's text.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ContentEnvelope {
    pub pane_id: String,
    pub content: String,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub command_line: Option<String>,
}

impl ContentEnvelope {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_pane_id(&self.pane_id)?;
        if self.content.len() > MAX_CONTENT_BYTES {
            return Err(ErrorInfo::new(
                "content_too_large",
                format!("content must be {} bytes or fewer", MAX_CONTENT_BYTES),
            ));
        }
        Ok(())
    }

    pub fn has_metadata(&self) -> bool {
        self.job_name.is_some() || self.title.is_some() || self.command_line.is_some()
    }
}

/// `get_status`, `bump_generation`, `remove_pane`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PaneParams {
    pub pane_id: String,
}

impl PaneParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_pane_id(&self.pane_id)
    }
}

/// `get_snapshot`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SnapshotParams {
    pub pane_id: String,
    #[serde(default)]
    pub max_history: Option<usize>,
    #[serde(default)]
    pub max_pending: Option<usize>,
}

impl SnapshotParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_pane_id(&self.pane_id)
    }
}

/// `list_snapshots`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ListParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl ListParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if let Some(limit) = self.limit {
            if limit > MAX_LIST_LIMIT {
                return Err(ErrorInfo::new(
                    "invalid_limit",
                    format!("limit must be {} or fewer", MAX_LIST_LIMIT),
                ));
            }
        }
        Ok(())
    }
}

/// `sync_liveness`: the complete set of panes that still exist.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LivenessParams {
    pub pane_ids: Vec<String>,
}

impl LivenessParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        for pane_id in &self.pane_ids {
            require_pane_id(pane_id)?;
        }
        Ok(())
    }
}

/// `set_focus`: `pane_id: null` clears focus.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FocusParams {
    #[serde(default)]
    pub pane_id: Option<String>,
}

impl FocusParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match &self.pane_id {
            Some(pane_id) => require_pane_id(pane_id),
            None => Ok(()),
        }
    }
}

fn decode<T: DeserializeOwned>(params: Option<Value>, what: &str) -> Result<T, ErrorInfo> {
    let params = params.unwrap_or(Value::Object(Map::new()));
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("{} params are invalid: {}", what, err),
        )
    })
}

pub fn parse_event(params: Option<Value>) -> Result<EventEnvelope, ErrorInfo> {
    let envelope: EventEnvelope = decode(params, "event")?;
    envelope.validate()?;
    Ok(envelope)
}

pub fn parse_content(params: Option<Value>) -> Result<ContentEnvelope, ErrorInfo> {
    let envelope: ContentEnvelope = decode(params, "content")?;
    envelope.validate()?;
    Ok(envelope)
}

pub fn parse_pane(params: Option<Value>) -> Result<PaneParams, ErrorInfo> {
    let parsed: PaneParams = decode(params, "pane")?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn parse_snapshot(params: Option<Value>) -> Result<SnapshotParams, ErrorInfo> {
    let parsed: SnapshotParams = decode(params, "get_snapshot")?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn parse_list(params: Option<Value>) -> Result<ListParams, ErrorInfo> {
    let parsed: ListParams = decode(params, "list_snapshots")?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn parse_liveness(params: Option<Value>) -> Result<LivenessParams, ErrorInfo> {
    let parsed: LivenessParams = decode(params, "sync_liveness")?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn parse_focus(params: Option<Value>) -> Result<FocusParams, ErrorInfo> {
    let parsed: FocusParams = decode(params, "set_focus")?;
    parsed.validate()?;
    Ok(parsed)
}

fn require_bounded(value: &str, field: &str, max_len: usize) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    if value.len() > max_len {
        return Err(ErrorInfo::new(
            "field_too_long",
            format!("{} must be {} characters or fewer", field, max_len),
        ));
    }
    Ok(())
}

fn require_pane_id(pane_id: &str) -> Result<(), ErrorInfo> {
    require_bounded(pane_id, "pane_id", MAX_PANE_ID_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_event_with_payload() {
        let envelope = parse_event(Some(json!({
            "source": "shell",
            "pane_id": "%3",
            "event_type": "command_start",
            "payload": {"command": "ls -la"}
        })))
        .expect("valid event");
        assert_eq!(envelope.pane_id, "%3");
        assert_eq!(envelope.payload["command"], "ls -la");
    }

    #[test]
    fn event_payload_defaults_to_empty() {
        let envelope = parse_event(Some(json!({
            "source": "iterm",
            "pane_id": "w0t0p0:ABC",
            "event_type": "focus"
        })))
        .expect("valid event");
        assert!(envelope.payload.is_empty());
    }

    #[test]
    fn rejects_unknown_event_fields() {
        let err = parse_event(Some(json!({
            "source": "shell",
            "pane_id": "%3",
            "event_type": "command_start",
            "session": "x"
        })))
        .unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn rejects_blank_source() {
        let err = parse_event(Some(json!({
            "source": "  ",
            "pane_id": "%3",
            "event_type": "command_start"
        })))
        .unwrap_err();
        assert_eq!(err.code, "missing_field");
    }

    #[test]
    fn rejects_long_pane_id() {
        let err = parse_pane(Some(json!({"pane_id": "a".repeat(300)}))).unwrap_err();
        assert_eq!(err.code, "field_too_long");
    }

    #[test]
    fn rejects_oversized_content() {
        let err = parse_content(Some(json!({
            "pane_id": "%1",
            "content": "x".repeat(MAX_CONTENT_BYTES + 1)
        })))
        .unwrap_err();
        assert_eq!(err.code, "content_too_large");
    }

    #[test]
    fn list_params_are_optional_and_bounded() {
        assert_eq!(parse_list(None).unwrap(), ListParams::default());
        assert!(parse_list(Some(json!({"limit": 10_000}))).is_err());
    }

    #[test]
    fn focus_accepts_null_pane() {
        let params = parse_focus(Some(json!({"pane_id": null}))).unwrap();
        assert_eq!(params.pane_id, None);
    }

    #[test]
    fn method_names_are_snake_case() {
        let request: Request = serde_json::from_value(json!({
            "protocol_version": 1,
            "method": "list_snapshots"
        }))
        .unwrap();
        assert_eq!(request.method, Method::ListSnapshots);
        assert!(serde_json::from_value::<Request>(json!({
            "protocol_version": 1,
            "method": "drop_tables"
        }))
        .is_err());
    }
}
