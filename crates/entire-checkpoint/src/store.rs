//! The append-only checkpoint store on the shadow ref.
//!
//! Every agent turn ends with a commit on `entire/<base[:7]>` capturing
//! the worktree state of the files the turn touched plus the accumulated
//! uncondensed transcript under `.entire/metadata/<session>/`. The chain
//! of parents on the shadow ref is the checkpoint order; condensation
//! later collapses the chain into one permanent record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use entire_core::paths::{is_infrastructure_path, session_metadata_dir, shadow_ref_name, METADATA_BRANCH};
use entire_core::textutil::commit_subject;
use entire_core::trailers;
use entire_core::transcript::{
    files_touched, first_user_prompt, read_delta, token_usage, TokenUsage, TranscriptDelta,
    TranscriptEntry,
};
use entire_git::{FileSpec, Repository};
use entire_session::{State, StateStore};

use crate::error::{CheckpointError, Result};
use crate::shadow::{migrate_and_persist_if_needed, shadow_ref_for};

/// Strategy identifier written to the `Entire-Strategy` trailer.
pub const STRATEGY_NAME: &str = "manual-commit";

/// Name of the per-checkpoint metadata file inside the tree.
const CHECKPOINT_FILE: &str = "checkpoint.json";
/// Name of the accumulated transcript file inside the tree.
const TRANSCRIPT_FILE: &str = "transcript.jsonl";

/// Metadata stored in each checkpoint tree next to the transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub session_id: String,
    pub step: usize,
    pub transcript_start_line: usize,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_task_checkpoint: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

/// A checkpoint commit as listed from a shadow ref.
#[derive(Debug, Clone)]
pub struct TemporaryCheckpoint {
    pub commit_hash: String,
    pub base_commit: String,
    pub session_id: String,
    /// Commit time, seconds since epoch.
    pub seconds: i64,
    /// First line of the checkpoint message, trailers excluded.
    pub message: String,
    pub metadata_dir: String,
    pub is_task_checkpoint: bool,
    pub tool_use_id: Option<String>,
    pub transcript_start_line: usize,
    pub token_usage: Option<TokenUsage>,
}

/// Result of writing one checkpoint.
#[derive(Debug, Clone)]
pub struct SavedCheckpoint {
    pub commit: String,
    pub shadow_ref: String,
    pub message: String,
    pub files: Vec<String>,
}

pub struct CheckpointStore<'r> {
    repo: &'r Repository,
    state_store: &'r StateStore,
}

impl<'r> CheckpointStore<'r> {
    pub fn new(repo: &'r Repository, state_store: &'r StateStore) -> Self {
        Self { repo, state_store }
    }

    /// Save a turn checkpoint: the worktree state of this turn's touched
    /// files plus the accumulated transcript. Returns `None` when there
    /// is nothing new to record.
    pub fn save_changes(
        &self,
        state: &mut State,
        transcript_path: &Path,
    ) -> Result<Option<SavedCheckpoint>> {
        self.save_internal(state, transcript_path, None)
    }

    /// Save a task checkpoint for a finished sub-agent tool use. Same
    /// flow as a turn checkpoint with a synthetic message.
    pub fn save_task_checkpoint(
        &self,
        state: &mut State,
        tool_use_id: &str,
        transcript_path: &Path,
    ) -> Result<Option<SavedCheckpoint>> {
        self.save_internal(state, transcript_path, Some(tool_use_id))
    }

    fn save_internal(
        &self,
        state: &mut State,
        transcript_path: &Path,
        task_tool_use_id: Option<&str>,
    ) -> Result<Option<SavedCheckpoint>> {
        if self.repo.is_rebase_in_progress() {
            return Err(CheckpointError::RebaseInProgress);
        }

        migrate_and_persist_if_needed(self.repo, self.state_store, state)?;
        if state.base_commit.is_empty() {
            state.base_commit = self.repo.head_commit()?;
        }

        let delta = read_delta(transcript_path, state.checkpoint_transcript_start)?;
        let turn_entries = entries_after(&delta, &state.last_transcript_identifier);
        let turn_files = self.relative_turn_files(&turn_entries);

        let shadow_ref = shadow_ref_for(state);
        if delta.is_empty() && turn_files.is_empty() {
            tracing::debug!(session_id = %state.session_id, "no new transcript or files, skipping checkpoint");
            return Ok(None);
        }

        let record = CheckpointRecord {
            session_id: state.session_id.clone(),
            step: state.step_count + 1,
            transcript_start_line: delta.start_line,
            is_task_checkpoint: task_tool_use_id.is_some(),
            tool_use_id: task_tool_use_id.map(str::to_string),
            token_usage: token_usage(&turn_entries),
        };

        let message = self.checkpoint_message(state, &turn_entries, task_tool_use_id);

        // Advance the shadow ref with one retry: a concurrent save from
        // another agent instance may move the tip under us.
        let mut last_tip = None;
        for attempt in 0..2 {
            let tip = self.repo.ref_target(&shadow_ref)?;
            last_tip = tip.clone();
            let parent = tip.clone().unwrap_or_else(|| state.base_commit.clone());
            let tree = self.build_checkpoint_tree(state, &parent, &turn_files, &delta, &record)?;
            let commit = self
                .repo
                .commit_tree(&tree, &[parent], &message)?;
            if self
                .repo
                .compare_and_set_ref(&shadow_ref, tip.as_deref(), &commit)?
            {
                state.step_count += 1;
                if let Some(id) = &delta.last_identifier {
                    state.last_transcript_identifier = id.clone();
                }
                // New content invalidates any id reserved by an earlier
                // condensation.
                state.pending_checkpoint_id = None;
                self.state_store.save(state)?;
                return Ok(Some(SavedCheckpoint {
                    commit,
                    shadow_ref,
                    message,
                    files: turn_files,
                }));
            }
            tracing::warn!(shadow_ref = %shadow_ref, attempt, "shadow ref moved underneath us, retrying");
        }

        tracing::warn!(shadow_ref = %shadow_ref, tip = ?last_tip, "giving up after shadow ref race");
        Err(CheckpointError::ShadowRefLostRace(shadow_ref))
    }

    fn checkpoint_message(
        &self,
        state: &State,
        turn_entries: &[TranscriptEntry],
        task_tool_use_id: Option<&str>,
    ) -> String {
        let subject = match task_tool_use_id {
            Some(tool_use_id) => format!("task: {tool_use_id}"),
            None => first_user_prompt(turn_entries)
                .map(|p| commit_subject(&p))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("checkpoint {}", state.step_count + 1)),
        };
        let mut message = trailers::append_trailer(
            &subject,
            trailers::SESSION_TRAILER,
            &state.session_id,
        );
        message = trailers::append_trailer(&message, trailers::METADATA_TRAILER, METADATA_BRANCH);
        trailers::append_trailer(&message, trailers::STRATEGY_TRAILER, STRATEGY_NAME)
    }

    /// Checkpoint content: the parent tree, with the worktree state of
    /// this turn's files (plus files the user edited between checkpoints,
    /// so the shadow snapshot reflects intermediate user edits) overlaid,
    /// and the accumulated transcript under the session metadata dir.
    fn build_checkpoint_tree(
        &self,
        state: &State,
        parent: &str,
        turn_files: &[String],
        delta: &TranscriptDelta,
        record: &CheckpointRecord,
    ) -> Result<String> {
        let mut files: BTreeMap<String, FileSpec> = self
            .repo
            .tree_entries(parent)?
            .into_iter()
            .map(|(path, entry)| (path, FileSpec::from_blob(entry.id, entry.executable)))
            .collect();

        let mut overlay: Vec<&String> = turn_files.iter().collect();
        for attribution in &state.prompt_attributions {
            for path in attribution.user_added_per_file.keys() {
                if !turn_files.contains(path) {
                    overlay.push(path);
                }
            }
        }

        let root = self.repo.worktree_path().to_path_buf();
        for path in overlay {
            if is_infrastructure_path(path) {
                continue;
            }
            let on_disk = root.join(path);
            match std::fs::read(&on_disk) {
                Ok(bytes) => {
                    files.insert(
                        path.clone(),
                        FileSpec::from_bytes(bytes, is_executable(&on_disk)),
                    );
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    files.remove(path);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let metadata_dir = session_metadata_dir(&state.session_id);
        files.insert(
            format!("{metadata_dir}/{TRANSCRIPT_FILE}"),
            FileSpec::from_bytes(delta.content(), false),
        );
        files.insert(
            format!("{metadata_dir}/{CHECKPOINT_FILE}"),
            FileSpec::from_bytes(serde_json::to_vec_pretty(record)?, false),
        );

        Ok(self.repo.build_tree(&files)?)
    }

    /// Paths this turn's tool calls touched, relative to the worktree,
    /// with infrastructure and out-of-tree paths dropped.
    fn relative_turn_files(&self, turn_entries: &[TranscriptEntry]) -> Vec<String> {
        let root = self.repo.worktree_path();
        files_touched(turn_entries)
            .into_iter()
            .filter_map(|raw| {
                let path = Path::new(&raw);
                let relative: PathBuf = if path.is_absolute() {
                    path.strip_prefix(root).ok()?.to_path_buf()
                } else {
                    path.to_path_buf()
                };
                let rel = relative.to_string_lossy().replace('\\', "/");
                (!rel.is_empty() && !is_infrastructure_path(&rel)).then_some(rel)
            })
            .collect()
    }

    /// Checkpoints for one session on the shadow ref of `base`, newest
    /// first, limited to `limit`.
    pub fn list_temporary(
        &self,
        base_commit: &str,
        worktree_id: Option<&str>,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<TemporaryCheckpoint>> {
        let shadow_ref = shadow_ref_name(base_commit, worktree_id);
        let Some(tip) = self.repo.ref_target(&shadow_ref)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for info in self.repo.commits_between(&tip, base_commit)? {
            let Some(commit_session) = trailers::parse_session(&info.message) else {
                continue;
            };
            if commit_session != session_id {
                continue;
            }
            let record = self.read_checkpoint_record(&info.id, session_id);
            out.push(TemporaryCheckpoint {
                commit_hash: info.id,
                base_commit: base_commit.to_string(),
                session_id: commit_session,
                seconds: info.seconds,
                message: info.summary,
                metadata_dir: session_metadata_dir(session_id),
                is_task_checkpoint: record.is_task_checkpoint,
                tool_use_id: record.tool_use_id,
                transcript_start_line: record.transcript_start_line,
                token_usage: record.token_usage,
            });
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// The per-checkpoint metadata stored in a shadow commit's tree.
    /// Missing or unreadable records fall back to defaults.
    pub(crate) fn read_checkpoint_record(&self, commit: &str, session_id: &str) -> CheckpointRecord {
        let path = format!("{}/{CHECKPOINT_FILE}", session_metadata_dir(session_id));
        self.repo
            .read_blob(commit, &path)
            .ok()
            .flatten()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    /// Read the accumulated transcript stored in a shadow commit's tree.
    pub fn read_transcript(&self, commit: &str, session_id: &str) -> Result<Option<String>> {
        let path = format!("{}/{TRANSCRIPT_FILE}", session_metadata_dir(session_id));
        Ok(self
            .repo
            .read_blob(commit, &path)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Reset the session's shadow ref to a checkpoint commit, so the next
    /// turn builds on the rewound state.
    pub fn reset_shadow_to(&self, state: &State, checkpoint_commit: &str) -> Result<()> {
        if !self.repo.commit_exists(checkpoint_commit) {
            return Err(CheckpointError::RewindPointNotFound(
                checkpoint_commit.to_string(),
            ));
        }
        let shadow_ref = shadow_ref_for(state);
        self.repo.set_ref(&shadow_ref, checkpoint_commit)?;
        tracing::info!(shadow_ref = %shadow_ref, commit = %&checkpoint_commit[..7], "reset shadow ref to checkpoint");
        Ok(())
    }
}

/// The entries of a delta that belong to the current turn: everything
/// after the last identifier seen by the previous checkpoint.
fn entries_after(delta: &TranscriptDelta, last_identifier: &str) -> Vec<TranscriptEntry> {
    if last_identifier.is_empty() {
        return delta.entries.clone();
    }
    match delta
        .entries
        .iter()
        .rposition(|e| e.identifier == last_identifier)
    {
        Some(pos) => delta.entries[pos + 1..].to_vec(),
        None => delta.entries.clone(),
    }
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        false
    }
}
