//! Description templates.
//!
//! `{key}` is replaced by the payload value, `{key:N}` by its first N
//! characters. Unknown keys render as empty text. The rendered result is
//! capped at a maximum length with a trailing `...`.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::types::payload_display;

const ELLIPSIS: &str = "...";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_\-]*)(?::(\d+))?\}").unwrap());

pub fn format_description(template: &str, payload: &Map<String, Value>, max_len: usize) -> String {
    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        let key = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let value = payload.get(key).map(payload_display).unwrap_or_default();
        match caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok()) {
            Some(limit) => value.chars().take(limit).collect(),
            None => value,
        }
    });
    truncate_with_ellipsis(&rendered, max_len)
}

/// Caps `text` at `max_len` characters, replacing the tail with `...`.
pub fn truncate_with_ellipsis(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    if max_len <= ELLIPSIS.len() {
        return text.chars().take(max_len).collect();
    }
    let mut truncated: String = text.chars().take(max_len - ELLIPSIS.len()).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Placeholder keys referenced by a template, in order of appearance.
pub fn placeholder_keys(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// `"42s"` under a minute, `"3m 5s"` above.
pub fn format_elapsed(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    if total < 60 {
        format!("{}s", total)
    } else {
        format!("{}m {}s", total / 60, total % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn substitutes_and_truncates_fields() {
        let data = payload(json!({"command": "cargo build --release --workspace --all-features"}));
        let text = format_description("Running: {command:10}", &data, 50);
        assert_eq!(text, "Running: cargo buil");
    }

    #[test]
    fn numbers_render_without_quotes() {
        let data = payload(json!({"exit_code": 2}));
        assert_eq!(
            format_description("Failed (exit={exit_code})", &data, 50),
            "Failed (exit=2)"
        );
    }

    #[test]
    fn missing_fields_render_empty() {
        assert_eq!(
            format_description("Tool: {tool_name:30}", &Map::new(), 50),
            "Tool: "
        );
    }

    #[test]
    fn whole_description_is_capped_with_ellipsis() {
        let data = payload(json!({"command": "x".repeat(80)}));
        let text = format_description("{command}", &data, 50);
        assert_eq!(text.chars().count(), 50);
        assert!(text.ends_with("..."));
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let text = truncate_with_ellipsis(&"é".repeat(10), 6);
        assert_eq!(text, "ééé...");
    }

    #[test]
    fn elapsed_switches_to_minutes() {
        assert_eq!(format_elapsed(42.9), "42s");
        assert_eq!(format_elapsed(185.0), "3m 5s");
        assert_eq!(format_elapsed(-1.0), "0s");
    }

    #[test]
    fn placeholder_keys_lists_fields() {
        assert_eq!(
            placeholder_keys("Failed (exit={exit_code}) {command:30}"),
            vec!["exit_code".to_string(), "command".to_string()]
        );
    }
}
