//! Transcript delta reading.
//!
//! The agent appends JSONL entries to its transcript file while a turn
//! runs. The engine only ever reads forward: from a recorded start line to
//! end-of-file. A final line without a trailing newline is still being
//! flushed by the agent and is deferred to the next read. Transcript
//! *parsing* stays shallow here: entries are consumed as opaque JSON
//! with a stable identifier plus the few fields the engine needs
//! (prompt text, touched files, token usage).

use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hash::sha256_hex;
use crate::CoreError;

/// How long to wait for the agent to flush a transcript file that does
/// not exist yet.
const TRANSCRIPT_WAIT: Duration = Duration::from_millis(500);
const TRANSCRIPT_POLL: Duration = Duration::from_millis(50);

/// One parsed transcript entry.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    /// Stable identifier of the entry (`uuid` field).
    pub identifier: String,
    /// Entry type: `user`, `assistant`, or anything else the agent emits.
    pub entry_type: String,
    /// The verbatim JSONL line, without trailing newline.
    pub raw: String,
    /// Parsed form for field extraction.
    pub value: Value,
}

/// The readable portion of a transcript from a start line to the last
/// complete line.
#[derive(Debug, Clone, Default)]
pub struct TranscriptDelta {
    pub entries: Vec<TranscriptEntry>,
    /// Line index the delta started at.
    pub start_line: usize,
    /// Line index to resume from next time (start + consumed lines).
    pub next_start_line: usize,
    /// Identifier of the last complete entry, if any.
    pub last_identifier: Option<String>,
}

impl TranscriptDelta {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The delta content as stored in checkpoint trees: verbatim lines,
    /// newline-terminated.
    pub fn content(&self) -> String {
        let mut out = String::new();
        for e in &self.entries {
            out.push_str(&e.raw);
            out.push('\n');
        }
        out
    }

    /// sha-256 over the delta content; feeds the checkpoint id.
    pub fn content_hash(&self) -> String {
        sha256_hex(self.content().as_bytes())
    }
}

/// Token usage summed over the assistant entries of a delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

/// Read transcript entries from `start_line` to the last complete line.
///
/// A missing file is polled for up to 500ms (the agent may not have
/// flushed it yet); if it still does not exist, an empty delta is
/// returned and the caller logs a warning. Unparseable lines abort the
/// read; a corrupt transcript must not silently produce a checkpoint
/// with partial content.
pub fn read_delta(path: &Path, start_line: usize) -> Result<TranscriptDelta, CoreError> {
    if !wait_for_file(path) {
        return Ok(TranscriptDelta {
            start_line,
            next_start_line: start_line,
            ..Default::default()
        });
    }

    let data = std::fs::read_to_string(path)?;
    let complete = match data.rfind('\n') {
        Some(pos) => &data[..=pos],
        None => "",
    };

    let mut delta = TranscriptDelta {
        start_line,
        next_start_line: start_line,
        ..Default::default()
    };

    for (index, line) in complete.lines().enumerate() {
        if index < start_line {
            continue;
        }
        if line.trim().is_empty() {
            delta.next_start_line = index + 1;
            continue;
        }
        let value: Value =
            serde_json::from_str(line).map_err(|_| CoreError::TranscriptUnparseable {
                path: path.display().to_string(),
                line: index + 1,
            })?;
        let identifier = value
            .get("uuid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let entry_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        if !identifier.is_empty() {
            delta.last_identifier = Some(identifier.clone());
        }
        delta.entries.push(TranscriptEntry {
            identifier,
            entry_type,
            raw: line.to_string(),
            value,
        });
        delta.next_start_line = index + 1;
    }

    Ok(delta)
}

/// Parse transcript content already in memory (read back from a
/// checkpoint tree). Stored content was validated when first read, so
/// lines that no longer parse are skipped rather than fatal.
pub fn parse_content(content: &str) -> Vec<TranscriptEntry> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let value: Value = serde_json::from_str(line).ok()?;
            Some(TranscriptEntry {
                identifier: value
                    .get("uuid")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                entry_type: value
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                raw: line.to_string(),
                value,
            })
        })
        .collect()
}

/// All user prompt texts in order.
pub fn user_prompts(entries: &[TranscriptEntry]) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.entry_type == "user")
        .filter_map(|e| user_text(&e.value))
        .collect()
}

fn wait_for_file(path: &Path) -> bool {
    let deadline = Instant::now() + TRANSCRIPT_WAIT;
    loop {
        if path.exists() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(TRANSCRIPT_POLL);
    }
}

/// Extract the text of the first user prompt in a delta. Handles both
/// string content and content-block arrays.
pub fn first_user_prompt(entries: &[TranscriptEntry]) -> Option<String> {
    entries
        .iter()
        .filter(|e| e.entry_type == "user")
        .find_map(|e| user_text(&e.value))
}

fn user_text(value: &Value) -> Option<String> {
    let content = value.get("message")?.get("content")?;
    match content {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(blocks) => blocks.iter().find_map(|b| {
            (b.get("type").and_then(Value::as_str) == Some("text"))
                .then(|| b.get("text").and_then(Value::as_str))
                .flatten()
                .filter(|t| !t.trim().is_empty())
                .map(str::to_string)
        }),
        _ => None,
    }
}

/// Tool names whose invocations edit files.
const FILE_EDIT_TOOLS: [&str; 4] = ["Edit", "MultiEdit", "Write", "NotebookEdit"];

/// Collect the file paths touched by file-editing tool calls in a delta,
/// in first-seen order, deduplicated.
pub fn files_touched(entries: &[TranscriptEntry]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for entry in entries {
        let Some(blocks) = entry
            .value
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        for block in blocks {
            if block.get("type").and_then(Value::as_str) != Some("tool_use") {
                continue;
            }
            let name = block.get("name").and_then(Value::as_str).unwrap_or("");
            if !FILE_EDIT_TOOLS.contains(&name) {
                continue;
            }
            let input = block.get("input");
            let path = input
                .and_then(|i| i.get("file_path"))
                .or_else(|| input.and_then(|i| i.get("notebook_path")))
                .and_then(Value::as_str);
            if let Some(p) = path {
                if seen.insert(p.to_string()) {
                    out.push(p.to_string());
                }
            }
        }
    }
    out
}

/// Sum token usage over assistant entries. Returns `None` when the agent
/// reports no usage at all.
pub fn token_usage(entries: &[TranscriptEntry]) -> Option<TokenUsage> {
    let mut total = TokenUsage::default();
    let mut any = false;
    for entry in entries.iter().filter(|e| e.entry_type == "assistant") {
        let Some(usage) = entry.value.get("message").and_then(|m| m.get("usage")) else {
            continue;
        };
        any = true;
        total.input_tokens += usage
            .get("input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        total.output_tokens += usage
            .get("output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
    }
    any.then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_lines(dir: &Path, lines: &[&str], trailing_newline: bool) -> std::path::PathBuf {
        let path = dir.join("transcript.jsonl");
        let mut f = std::fs::File::create(&path).unwrap();
        for (i, line) in lines.iter().enumerate() {
            if i > 0 {
                writeln!(f).unwrap();
            }
            write!(f, "{line}").unwrap();
        }
        if trailing_newline {
            writeln!(f).unwrap();
        }
        path
    }

    const USER: &str = r#"{"type":"user","uuid":"u1","message":{"content":"add foo"}}"#;
    const ASSISTANT: &str = r#"{"type":"assistant","uuid":"a1","message":{"content":[{"type":"text","text":"done"}],"usage":{"input_tokens":10,"output_tokens":20}}}"#;

    #[test]
    fn reads_from_start_line() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_lines(tmp.path(), &[USER, ASSISTANT], true);

        let all = read_delta(&path, 0).unwrap();
        assert_eq!(all.entries.len(), 2);
        assert_eq!(all.next_start_line, 2);
        assert_eq!(all.last_identifier.as_deref(), Some("a1"));

        let tail = read_delta(&path, 1).unwrap();
        assert_eq!(tail.entries.len(), 1);
        assert_eq!(tail.entries[0].identifier, "a1");
    }

    #[test]
    fn partial_final_line_is_deferred() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_lines(tmp.path(), &[USER, r#"{"type":"assistant","uu"#], false);

        let delta = read_delta(&path, 0).unwrap();
        assert_eq!(delta.entries.len(), 1);
        assert_eq!(delta.next_start_line, 1);
        assert_eq!(delta.last_identifier.as_deref(), Some("u1"));
    }

    #[test]
    fn missing_file_yields_empty_delta() {
        let tmp = tempfile::tempdir().unwrap();
        let delta = read_delta(&tmp.path().join("nope.jsonl"), 3).unwrap();
        assert!(delta.is_empty());
        assert_eq!(delta.next_start_line, 3);
    }

    #[test]
    fn corrupt_line_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_lines(tmp.path(), &[USER, "{not json"], true);
        let err = read_delta(&path, 0).unwrap_err();
        assert!(matches!(err, CoreError::TranscriptUnparseable { line: 2, .. }));
    }

    #[test]
    fn content_hash_is_stable_and_content_sensitive() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_lines(tmp.path(), &[USER, ASSISTANT], true);
        let a = read_delta(&path, 0).unwrap().content_hash();
        let b = read_delta(&path, 0).unwrap().content_hash();
        assert_eq!(a, b);
        let c = read_delta(&path, 1).unwrap().content_hash();
        assert_ne!(a, c);
    }

    #[test]
    fn extracts_first_user_prompt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_lines(tmp.path(), &[ASSISTANT, USER], true);
        let delta = read_delta(&path, 0).unwrap();
        assert_eq!(first_user_prompt(&delta.entries).as_deref(), Some("add foo"));
    }

    #[test]
    fn extracts_files_touched_from_tool_use() {
        let line = r#"{"type":"assistant","uuid":"a2","message":{"content":[{"type":"tool_use","name":"Edit","input":{"file_path":"src/main.rs"}},{"type":"tool_use","name":"Write","input":{"file_path":"src/lib.rs"}},{"type":"tool_use","name":"Bash","input":{"command":"ls"}},{"type":"tool_use","name":"Edit","input":{"file_path":"src/main.rs"}}]}}"#;
        let tmp = tempfile::tempdir().unwrap();
        let path = write_lines(tmp.path(), &[line], true);
        let delta = read_delta(&path, 0).unwrap();
        assert_eq!(files_touched(&delta.entries), vec!["src/main.rs", "src/lib.rs"]);
    }

    #[test]
    fn sums_token_usage() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_lines(tmp.path(), &[USER, ASSISTANT, ASSISTANT], true);
        let delta = read_delta(&path, 0).unwrap();
        let usage = token_usage(&delta.entries).unwrap();
        assert_eq!(usage.input_tokens, 20);
        assert_eq!(usage.output_tokens, 40);
    }

    #[test]
    fn no_usage_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_lines(tmp.path(), &[USER], true);
        let delta = read_delta(&path, 0).unwrap();
        assert!(token_usage(&delta.entries).is_none());
    }
}
