//! Agent hook stdin parsing.
//!
//! Each agent hook receives one JSON document on stdin. Claude Code sends
//! camelCase keys (`hookEventName`); our own fixtures use snake_case, so
//! lookups try both.

use serde_json::Value;

/// The fields the engine cares about from a hook invocation.
#[derive(Debug, Clone, Default)]
pub struct HookInput {
    pub hook_event_name: String,
    /// The agent's own session identifier (a bare uuid for Claude Code).
    pub session_id: String,
    pub transcript_path: String,
    pub cwd: String,
    pub prompt: String,
    pub tool_name: String,
    pub tool_use_id: String,
}

impl HookInput {
    /// Parse hook stdin. Empty input yields a default (the hook then
    /// no-ops instead of failing the agent).
    pub fn parse(stdin: &str) -> anyhow::Result<Self> {
        if stdin.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: Value = serde_json::from_str(stdin)?;
        Ok(Self {
            hook_event_name: get_str(&raw, "hook_event_name"),
            session_id: get_str(&raw, "session_id"),
            transcript_path: get_str(&raw, "transcript_path"),
            cwd: get_str(&raw, "cwd"),
            prompt: get_str(&raw, "prompt"),
            tool_name: get_str(&raw, "tool_name"),
            tool_use_id: get_str(&raw, "tool_use_id"),
        })
    }
}

/// Get a string field, trying snake_case then camelCase.
fn get_str(value: &Value, snake_key: &str) -> String {
    if let Some(s) = value.get(snake_key).and_then(Value::as_str) {
        return s.to_string();
    }
    let camel = snake_to_camel(snake_key);
    value
        .get(&camel)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn snake_to_camel(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper_next = false;
    for ch in s.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}
