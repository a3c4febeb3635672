//! Checkpoint identifiers.
//!
//! A checkpoint id is 12 lowercase hex characters derived from the
//! session, the base commit, the checkpoint index, and the transcript
//! content hash. The same inputs always produce the same id, so re-running
//! a condensation (or amending the resulting commit) cannot mint a second
//! id for the same content. Different transcript content produces a
//! different id.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hash::sha256_hex;
use crate::CoreError;

/// Number of hex characters in a checkpoint id.
pub const CHECKPOINT_ID_LEN: usize = 12;

/// A 12-hex-character checkpoint identifier.
///
/// Used as the `Entire-Checkpoint` trailer value on user commits and as
/// the sharded directory name on the metadata branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(String);

impl CheckpointId {
    /// Derive the id for a checkpoint.
    ///
    /// `transcript_hash` is the sha-256 (hex) of the transcript bytes for
    /// the turn range being checkpointed.
    pub fn derive(
        session_id: &str,
        base_commit: &str,
        checkpoint_index: usize,
        transcript_hash: &str,
    ) -> Self {
        let material = format!("{session_id}{base_commit}{checkpoint_index}{transcript_hash}");
        Self(sha256_hex(material.as_bytes())[..CHECKPOINT_ID_LEN].to_string())
    }

    /// Parse a checkpoint id, rejecting anything that is not exactly 12
    /// lowercase hex characters. Hand-edited trailer values that fail this
    /// check are treated as absent by callers.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if s.len() == CHECKPOINT_ID_LEN
            && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            Ok(Self(s.to_string()))
        } else {
            Err(CoreError::MalformedCheckpointId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The sharded path components: first two chars, then the rest.
    pub fn shard(&self) -> (&str, &str) {
        self.0.split_at(2)
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_stable() {
        let a = CheckpointId::derive("2026-08-01-abc", "deadbeef", 3, "cafe");
        let b = CheckpointId::derive("2026-08-01-abc", "deadbeef", 3, "cafe");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), CHECKPOINT_ID_LEN);
    }

    #[test]
    fn derive_changes_with_any_input() {
        let base = CheckpointId::derive("s", "b", 1, "t");
        assert_ne!(base, CheckpointId::derive("s2", "b", 1, "t"));
        assert_ne!(base, CheckpointId::derive("s", "b2", 1, "t"));
        assert_ne!(base, CheckpointId::derive("s", "b", 2, "t"));
        assert_ne!(base, CheckpointId::derive("s", "b", 1, "t2"));
    }

    #[test]
    fn parse_accepts_lowercase_hex_only() {
        assert!(CheckpointId::parse("abcdef012345").is_ok());
        assert!(CheckpointId::parse("ABCDEF012345").is_err());
        assert!(CheckpointId::parse("abcdef01234").is_err());
        assert!(CheckpointId::parse("abcdef0123456").is_err());
        assert!(CheckpointId::parse("ghijkl012345").is_err());
        assert!(CheckpointId::parse("").is_err());
    }

    #[test]
    fn shard_splits_after_two_chars() {
        let id = CheckpointId::parse("abcdef012345").unwrap();
        assert_eq!(id.shard(), ("ab", "cdef012345"));
    }
}
