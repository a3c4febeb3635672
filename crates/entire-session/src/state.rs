//! The mutable per-session record.
//!
//! One JSON file per session in the shared state directory. Every hook
//! loads it, transitions the phase machine, applies actions, and saves it
//! back; there is no other channel between hook processes. The schema
//! tolerates fields written by older releases and normalises them on
//! load.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::agent::AgentKind;
use crate::phase::{transition, Action, Event, Phase, TransitionContext};

/// Per-turn tally of user edits made between the previous checkpoint and
/// a prompt submission. Feeds the attribution engine at commit time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptAttribution {
    pub checkpoint_number: usize,
    pub user_lines_added: usize,
    pub user_lines_removed: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user_added_per_file: BTreeMap<String, usize>,
}

/// The session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub session_id: String,

    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_interaction_at: Option<OffsetDateTime>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ended_at: Option<OffsetDateTime>,

    #[serde(default)]
    pub phase: Phase,

    /// HEAD at session start; updated by shadow-branch migration.
    #[serde(default)]
    pub base_commit: String,

    #[serde(default)]
    pub worktree_path: String,
    /// Linked-worktree name; empty in the main worktree.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub worktree_id: String,

    /// Number of checkpoints written for this session.
    #[serde(default, rename = "checkpoint_count")]
    pub step_count: usize,

    /// Line index of the first transcript entry belonging to content not
    /// yet condensed.
    #[serde(default)]
    pub checkpoint_transcript_start: usize,

    /// Deprecated spelling of `checkpoint_transcript_start`; migrated on
    /// load, never written.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub condensed_transcript_lines: usize,
    /// Deprecated; cleared on load, never written.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub transcript_lines_at_start: usize,

    /// Stable id of the last transcript entry seen.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_transcript_identifier: String,

    /// Untracked, non-ignored paths present when the session began.
    /// Rewind never deletes these.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub untracked_files_at_start: Vec<String>,

    /// Checkpoint id reserved by the last condensation; reused verbatim
    /// while the user amends, cleared when a new checkpoint is saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_checkpoint_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prompt_attributions: Vec<PromptAttribution>,

    #[serde(default, rename = "agent")]
    pub agent_type: AgentKind,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl State {
    pub fn new(
        session_id: impl Into<String>,
        agent_type: AgentKind,
        base_commit: impl Into<String>,
        worktree_path: impl Into<String>,
        worktree_id: Option<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            started_at: now,
            last_interaction_at: Some(now),
            ended_at: None,
            phase: Phase::Idle,
            base_commit: base_commit.into(),
            worktree_path: worktree_path.into(),
            worktree_id: worktree_id.unwrap_or_default(),
            step_count: 0,
            checkpoint_transcript_start: 0,
            condensed_transcript_lines: 0,
            transcript_lines_at_start: 0,
            last_transcript_identifier: String::new(),
            untracked_files_at_start: Vec::new(),
            pending_checkpoint_id: None,
            prompt_attributions: Vec::new(),
            agent_type,
        }
    }

    /// Map deprecated field spellings into the canonical schema.
    pub fn normalize_after_load(&mut self) {
        if self.checkpoint_transcript_start == 0 && self.condensed_transcript_lines > 0 {
            self.checkpoint_transcript_start = self.condensed_transcript_lines;
        }
        self.condensed_transcript_lines = 0;
        self.transcript_lines_at_start = 0;
    }

    /// Run the phase machine for `event`, apply the record-level actions
    /// (`UpdateLastInteraction`, `ClearEndedAt`, the phase change itself),
    /// and return the remaining strategy-level actions for the caller.
    pub fn apply_transition(
        &mut self,
        event: Event,
        ctx: TransitionContext,
        now: OffsetDateTime,
    ) -> Vec<Action> {
        let old_phase = self.phase;
        let result = transition(old_phase, event, ctx);

        if result.new_phase != old_phase {
            tracing::info!(
                session_id = %self.session_id,
                event = %event,
                from = %old_phase,
                to = %result.new_phase,
                "phase transition"
            );
        } else {
            tracing::debug!(
                session_id = %self.session_id,
                event = %event,
                phase = %old_phase,
                "phase unchanged"
            );
        }

        self.phase = result.new_phase;
        if event == Event::SessionStop && result.new_phase == Phase::Ended && old_phase != Phase::Ended {
            self.ended_at = Some(now);
        }

        let mut remaining = Vec::new();
        for action in result.actions {
            match action {
                Action::UpdateLastInteraction => self.last_interaction_at = Some(now),
                Action::ClearEndedAt => self.ended_at = None,
                other => remaining.push(other),
            }
        }
        remaining
    }
}

/// Mint a session id: `YYYY-MM-DD-<uuid>`.
pub fn new_session_id(now: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}-{}",
        now.year(),
        now.month() as u8,
        now.day(),
        Uuid::new_v4()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn blank(now: OffsetDateTime) -> State {
        State::new(
            "2026-08-01-abc",
            AgentKind::ClaudeCode,
            "deadbeef",
            "/repo",
            None,
            now,
        )
    }

    #[test]
    fn normalize_migrates_condensed_transcript_lines() {
        let mut state = blank(datetime!(2026-08-01 10:00 UTC));
        state.condensed_transcript_lines = 150;
        state.normalize_after_load();
        assert_eq!(state.checkpoint_transcript_start, 150);
        assert_eq!(state.condensed_transcript_lines, 0);
        assert_eq!(state.transcript_lines_at_start, 0);
    }

    #[test]
    fn normalize_prefers_new_field() {
        let mut state = blank(datetime!(2026-08-01 10:00 UTC));
        state.checkpoint_transcript_start = 200;
        state.condensed_transcript_lines = 150;
        state.normalize_after_load();
        assert_eq!(state.checkpoint_transcript_start, 200);
        assert_eq!(state.condensed_transcript_lines, 0);
    }

    #[test]
    fn normalize_json_roundtrip() {
        let cases = [
            (
                r#"{"session_id":"s1","started_at":"2026-08-01T10:00:00Z","condensed_transcript_lines":42,"checkpoint_count":5}"#,
                42,
                5,
            ),
            (
                r#"{"session_id":"s1","started_at":"2026-08-01T10:00:00Z","condensed_transcript_lines":10,"checkpoint_transcript_start":50}"#,
                50,
                0,
            ),
            (
                r#"{"session_id":"s1","started_at":"2026-08-01T10:00:00Z","checkpoint_transcript_start":25,"checkpoint_count":3}"#,
                25,
                3,
            ),
        ];
        for (json, want_start, want_step) in cases {
            let mut state: State = serde_json::from_str(json).unwrap();
            state.normalize_after_load();
            assert_eq!(state.checkpoint_transcript_start, want_start);
            assert_eq!(state.step_count, want_step);
            assert_eq!(state.condensed_transcript_lines, 0);
        }
    }

    #[test]
    fn unknown_phase_decodes_to_idle() {
        let json = r#"{"session_id":"s1","started_at":"2026-08-01T10:00:00Z","phase":"bogus"}"#;
        let state: State = serde_json::from_str(json).unwrap();
        assert_eq!(state.phase, Phase::Idle);
    }

    #[test]
    fn apply_transition_updates_record() {
        let t0 = datetime!(2026-08-01 10:00 UTC);
        let t1 = datetime!(2026-08-01 10:05 UTC);
        let mut state = blank(t0);

        let remaining = state.apply_transition(Event::TurnStart, TransitionContext::default(), t1);
        assert!(remaining.is_empty());
        assert_eq!(state.phase, Phase::Active);
        assert_eq!(state.last_interaction_at, Some(t1));

        let remaining =
            state.apply_transition(Event::GitCommit, TransitionContext::default(), t1);
        assert_eq!(remaining, vec![Action::MigrateShadowBranch]);
        assert_eq!(state.phase, Phase::ActiveCommitted);
    }

    #[test]
    fn session_stop_sets_ended_at_and_turn_start_clears_it() {
        let t0 = datetime!(2026-08-01 10:00 UTC);
        let t1 = datetime!(2026-08-01 11:00 UTC);
        let mut state = blank(t0);

        state.apply_transition(Event::SessionStop, TransitionContext::default(), t1);
        assert_eq!(state.phase, Phase::Ended);
        assert_eq!(state.ended_at, Some(t1));

        state.apply_transition(Event::TurnStart, TransitionContext::default(), t1);
        assert_eq!(state.phase, Phase::Active);
        assert!(state.ended_at.is_none());
    }

    #[test]
    fn rebase_git_commit_leaves_record_untouched() {
        let t0 = datetime!(2026-08-01 10:00 UTC);
        let mut state = blank(t0);
        state.phase = Phase::Active;
        let before = state.last_interaction_at;
        let remaining = state.apply_transition(
            Event::GitCommit,
            TransitionContext {
                is_rebase_in_progress: true,
                ..Default::default()
            },
            datetime!(2026-08-01 12:00 UTC),
        );
        assert!(remaining.is_empty());
        assert_eq!(state.phase, Phase::Active);
        assert_eq!(state.last_interaction_at, before);
    }

    #[test]
    fn session_id_format() {
        let id = new_session_id(datetime!(2026-08-02 09:30 UTC));
        assert!(id.starts_with("2026-08-02-"));
        assert!(Uuid::parse_str(&id[11..]).is_ok());
    }
}
