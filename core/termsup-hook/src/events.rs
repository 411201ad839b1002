//! Builds daemon envelopes from hook arguments and stdin payloads.

use serde_json::{Map, Value};
use termsup_daemon_protocol::{ContentEnvelope, EventEnvelope};

/// Environment variables that name the pane a hook runs in, in lookup order.
pub const PANE_ENV_VARS: &[&str] = &["TERMSUP_PANE_ID", "TMUX_PANE", "ITERM_SESSION_ID"];

/// Resolves the pane id from an explicit argument or the hook's environment.
pub fn resolve_pane(explicit: Option<String>, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    explicit
        .filter(|pane| !pane.trim().is_empty())
        .or_else(|| {
            PANE_ENV_VARS
                .iter()
                .filter_map(|key| lookup(key))
                .find(|value| !value.trim().is_empty())
        })
}

pub fn shell_start(pane_id: &str, command: &[String]) -> EventEnvelope {
    let mut payload = Map::new();
    payload.insert("command".to_string(), Value::String(command.join(" ")));
    EventEnvelope {
        source: "shell".to_string(),
        pane_id: pane_id.to_string(),
        event_type: "command_start".to_string(),
        payload,
    }
}

pub fn shell_end(pane_id: &str, exit_code: i32) -> EventEnvelope {
    let mut payload = Map::new();
    payload.insert("exit_code".to_string(), Value::from(exit_code));
    EventEnvelope {
        source: "shell".to_string(),
        pane_id: pane_id.to_string(),
        event_type: "command_end".to_string(),
        payload,
    }
}

/// Turns an AI-tool hook body into an event. The event type comes from
/// `explicit`, then `hook_event_name`, then `event`. Returns `None` when no
/// event type can be found.
pub fn agent(
    pane_id: &str,
    source: &str,
    explicit: Option<&str>,
    input: &str,
) -> Result<Option<EventEnvelope>, String> {
    let payload = if input.trim().is_empty() {
        Map::new()
    } else {
        match serde_json::from_str::<Value>(input)
            .map_err(|err| format!("Failed to parse hook input: {}", err))?
        {
            Value::Object(map) => map,
            _ => return Err("Hook input must be a JSON object".to_string()),
        }
    };

    let event_type = explicit
        .map(str::to_string)
        .or_else(|| string_field(&payload, "hook_event_name"))
        .or_else(|| string_field(&payload, "event"))
        .filter(|event_type| !event_type.trim().is_empty());

    Ok(event_type.map(|event_type| EventEnvelope {
        source: source.to_string(),
        pane_id: pane_id.to_string(),
        event_type,
        payload,
    }))
}

pub fn content(
    pane_id: &str,
    text: String,
    job_name: Option<String>,
    title: Option<String>,
    command_line: Option<String>,
) -> ContentEnvelope {
    ContentEnvelope {
        pane_id: pane_id.to_string(),
        content: text,
        content_hash: None,
        job_name,
        title,
        command_line,
    }
}

fn string_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_pane_wins_over_environment() {
        let pane = resolve_pane(Some("%4".to_string()), |_| Some("%9".to_string()));
        assert_eq!(pane.as_deref(), Some("%4"));
    }

    #[test]
    fn pane_falls_back_through_environment_in_order() {
        let pane = resolve_pane(None, |key| match key {
            "TMUX_PANE" => Some("%2".to_string()),
            "ITERM_SESSION_ID" => Some("w0t0p0:ABC".to_string()),
            _ => None,
        });
        assert_eq!(pane.as_deref(), Some("%2"));

        assert_eq!(resolve_pane(Some("  ".to_string()), |_| None), None);
    }

    #[test]
    fn shell_start_joins_command_words() {
        let envelope = shell_start("%1", &["cargo".to_string(), "test".to_string()]);
        assert_eq!(envelope.event_type, "command_start");
        assert_eq!(envelope.payload["command"], "cargo test");
    }

    #[test]
    fn shell_end_carries_exit_code() {
        let envelope = shell_end("%1", 130);
        assert_eq!(envelope.event_type, "command_end");
        assert_eq!(envelope.payload["exit_code"], 130);
    }

    #[test]
    fn agent_reads_event_name_from_hook_body() {
        let envelope = agent(
            "%1",
            "claude-code",
            None,
            r#"{"hook_event_name": "Notification", "notification_type": "permission_prompt"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(envelope.source, "claude-code");
        assert_eq!(envelope.event_type, "Notification");
        assert_eq!(envelope.payload["notification_type"], "permission_prompt");
    }

    #[test]
    fn agent_explicit_event_overrides_body() {
        let envelope = agent("%1", "codex", Some("stop"), r#"{"event": "other"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(envelope.event_type, "stop");
    }

    #[test]
    fn agent_without_event_name_is_skipped() {
        assert_eq!(agent("%1", "gemini", None, "").unwrap(), None);
        assert_eq!(agent("%1", "gemini", None, r#"{"cwd": "/tmp"}"#).unwrap(), None);
    }

    #[test]
    fn agent_rejects_non_object_input() {
        assert!(agent("%1", "claude-code", None, "[1, 2]").is_err());
        assert!(agent("%1", "claude-code", None, "{oops").is_err());
    }
}
