//! Commit message trailers.
//!
//! Shadow commits carry `Entire-Session`, `Entire-Metadata` and
//! `Entire-Strategy`; user commits carry `Entire-Checkpoint`. The
//! checkpoint trailer is the stable join key between a committed change
//! and its condensed record, so parsing is strict: a value that is not a
//! well-formed checkpoint id is treated as no trailer at all.

use crate::CheckpointId;

pub const CHECKPOINT_TRAILER: &str = "Entire-Checkpoint";
pub const SESSION_TRAILER: &str = "Entire-Session";
pub const METADATA_TRAILER: &str = "Entire-Metadata";
pub const STRATEGY_TRAILER: &str = "Entire-Strategy";

/// Find the value of `key: value` on any line of a commit message.
/// Returns the trimmed value of the last occurrence.
fn parse_trailer(message: &str, key: &str) -> Option<String> {
    let prefix = format!("{key}:");
    message
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(&prefix))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an `Entire-Checkpoint` trailer. Malformed values (hand edits,
/// truncation) are treated as absent.
pub fn parse_checkpoint(message: &str) -> Option<CheckpointId> {
    parse_trailer(message, CHECKPOINT_TRAILER).and_then(|v| CheckpointId::parse(&v).ok())
}

/// Parse an `Entire-Session` trailer.
pub fn parse_session(message: &str) -> Option<String> {
    parse_trailer(message, SESSION_TRAILER)
}

/// Parse an `Entire-Metadata` trailer.
pub fn parse_metadata(message: &str) -> Option<String> {
    parse_trailer(message, METADATA_TRAILER)
}

/// Append a trailer block to a commit message, separating it from the
/// body with a blank line unless the message already ends with one.
pub fn append_trailer(message: &str, key: &str, value: &str) -> String {
    let mut out = message.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    // A trailer needs a blank line before it unless the last line is
    // already one of ours. Checking for the `Entire-` prefix keeps a
    // `fix: something` subject from being mistaken for a trailer block.
    let last_nonempty = out.lines().rev().find(|l| !l.trim().is_empty());
    let follows_trailer = last_nonempty.is_some_and(|l| l.starts_with("Entire-") && l.contains(':'));
    if !out.is_empty() && !follows_trailer && !out.ends_with("\n\n") {
        out.push('\n');
    }
    out.push_str(&format!("{key}: {value}\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_checkpoint_valid() {
        let msg = "add foo\n\nEntire-Checkpoint: abcdef012345\n";
        assert_eq!(parse_checkpoint(msg).unwrap().as_str(), "abcdef012345");
    }

    #[test]
    fn parse_checkpoint_malformed_is_absent() {
        for msg in [
            "x\n\nEntire-Checkpoint: not-hex-here\n",
            "x\n\nEntire-Checkpoint: abcdef01234\n",
            "x\n\nEntire-Checkpoint: ABCDEF012345\n",
            "x\n\nEntire-Checkpoint:\n",
            "x\n",
        ] {
            assert!(parse_checkpoint(msg).is_none(), "should reject {msg:?}");
        }
    }

    #[test]
    fn parse_session_trailer() {
        let msg = "checkpoint\n\nEntire-Session: 2026-08-01-abc\nEntire-Strategy: manual-commit\n";
        assert_eq!(parse_session(msg).as_deref(), Some("2026-08-01-abc"));
    }

    #[test]
    fn append_adds_blank_line_before_trailer() {
        let out = append_trailer("subject line", CHECKPOINT_TRAILER, "abcdef012345");
        assert_eq!(out, "subject line\n\nEntire-Checkpoint: abcdef012345\n");
    }

    #[test]
    fn append_after_existing_trailer_stays_in_block() {
        let msg = "subject\n\nEntire-Session: s1\n";
        let out = append_trailer(msg, METADATA_TRAILER, "entire/sessions");
        assert_eq!(
            out,
            "subject\n\nEntire-Session: s1\nEntire-Metadata: entire/sessions\n"
        );
    }

    #[test]
    fn append_then_parse_roundtrip() {
        let out = append_trailer("fix bug\n", CHECKPOINT_TRAILER, "0123456789ab");
        assert_eq!(parse_checkpoint(&out).unwrap().as_str(), "0123456789ab");
    }
}
