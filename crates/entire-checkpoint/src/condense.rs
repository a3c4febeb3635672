//! Condensation: collapse a shadow-ref chain into one permanent,
//! content-addressed entry on the orphan metadata branch.
//!
//! Each entry lives at `<id[:2]>/<id[2:]>/` and carries `metadata.json`,
//! the cumulative `full.jsonl`, its `content_hash.txt`, plus `prompt.txt`,
//! `context.md` and `summary.txt`. The returned checkpoint id becomes the
//! `Entire-Checkpoint` trailer on the user commit in progress, and is
//! also reserved on the session as `pending_checkpoint_id` so amends of
//! that commit reuse it verbatim.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use entire_core::hash::sha256_hex;
use entire_core::paths::{
    checkpoint_shard_path, is_infrastructure_path, metadata_ref_name, session_metadata_dir,
};
use entire_core::transcript::{parse_content, user_prompts, TokenUsage};
use entire_core::CheckpointId;
use entire_git::{FileSpec, Repository};
use entire_session::{State, StateStore};

use crate::attribution::{calculate_with_accumulated, AttributionResult, TreeContent};
use crate::error::{CheckpointError, Result};
use crate::shadow::shadow_ref_for;

/// Retry budget for advancing the metadata ref under contention.
const METADATA_REF_ATTEMPTS: u32 = 5;
const METADATA_BACKOFF_BASE_MS: u64 = 25;

/// Optional collaborator that turns a transcript into a short summary.
/// Condensation works without one; `summary.txt` then falls back to the
/// first user prompt.
pub trait Summarizer {
    fn summarize(&self, transcript: &str) -> Option<String>;
}

/// Condensed checkpoint metadata, stored as `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub checkpoint_id: CheckpointId,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_ids: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub checkpoints_count: usize,
    pub files_touched: Vec<String>,
    /// Human-readable agent name.
    pub agent: String,
    /// True when every condensed turn was a sub-agent task checkpoint.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_task: bool,
    /// The task's tool-use id when `is_task` and the chain agrees on one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_checkpoint_id: Option<CheckpointId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<AttributionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

#[derive(Clone, Default)]
pub struct CondenseOptions<'a> {
    /// Discard the session instead of condensing when the shadow chain
    /// touched no files (the `DiscardIfNoFiles` action).
    pub discard_if_no_files: bool,
    pub summarizer: Option<&'a dyn Summarizer>,
}

/// Result of one condensation.
#[derive(Debug, Clone)]
pub struct CondenseOutcome {
    pub checkpoint_id: CheckpointId,
    /// New commit on the metadata branch; `None` when an existing entry
    /// was reused via `pending_checkpoint_id`.
    pub metadata_commit: Option<String>,
    pub checkpoints_count: usize,
    pub files_touched: Vec<String>,
}

/// Condense the session's shadow chain into the metadata branch.
///
/// Returns `None` (no trailer) when there is nothing to condense, or when
/// the chain was discarded. On success the session record carries the id
/// as `pending_checkpoint_id` and its transcript cursor advances past the
/// condensed content.
pub fn condense(
    repo: &Repository,
    state_store: &StateStore,
    state: &mut State,
    opts: &CondenseOptions<'_>,
) -> Result<Option<CondenseOutcome>> {
    let shadow_ref = shadow_ref_for(state);
    let tip = repo.ref_target(&shadow_ref)?;

    let Some(tip) = tip.filter(|t| *t != state.base_commit) else {
        if opts.discard_if_no_files {
            discard_session(repo, state_store, state, &shadow_ref)?;
        }
        return Ok(None);
    };

    // A reserved id whose entry already exists means this condensation
    // already ran (an aborted commit being retried, or an amend while the
    // shadow ref still exists). Reuse it verbatim.
    if let Some(pending) = &state.pending_checkpoint_id {
        if let Ok(id) = CheckpointId::parse(pending) {
            if let Some(info) = read_checkpoint_info(repo, &id)? {
                return Ok(Some(CondenseOutcome {
                    checkpoint_id: id,
                    metadata_commit: None,
                    checkpoints_count: info.checkpoints_count,
                    files_touched: info.files_touched,
                }));
            }
        }
    }

    let turns = repo.commits_between(&tip, &state.base_commit)?;
    let checkpoints_count = turns.len();

    let files_touched: Vec<String> = repo
        .changed_files_between(Some(&state.base_commit), Some(&tip))?
        .into_iter()
        .filter(|p| !is_infrastructure_path(p))
        .collect();

    if files_touched.is_empty() && opts.discard_if_no_files {
        discard_session(repo, state_store, state, &shadow_ref)?;
        return Ok(None);
    }

    // Uncondensed transcript, as stored by the latest checkpoint.
    let transcript_path = format!(
        "{}/transcript.jsonl",
        session_metadata_dir(&state.session_id)
    );
    let transcript = repo
        .read_blob(&tip, &transcript_path)?
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();

    let checkpoint_id = CheckpointId::derive(
        &state.session_id,
        &state.base_commit,
        state.step_count,
        &sha256_hex(transcript.as_bytes()),
    );

    // Previous condensed entry for the same session chain.
    let parent = latest_entry_for_session(repo, &state.session_id)?;
    let parent_full = match &parent {
        Some(info) => read_full_transcript(repo, &info.checkpoint_id)?.unwrap_or_default(),
        None => String::new(),
    };
    let full_jsonl = format!("{parent_full}{transcript}");
    let content_hash = sha256_hex(full_jsonl.as_bytes());

    let attribution = compute_attribution(repo, state, &tip, &files_touched)?;
    let entries = parse_content(&transcript);
    let prompts = user_prompts(&entries);
    let summary = opts
        .summarizer
        .and_then(|s| s.summarize(&full_jsonl))
        .or_else(|| prompts.first().cloned())
        .unwrap_or_default();

    // The task marker carries over only when the whole chain is task
    // checkpoints agreeing on one tool-use id; a mixed chain is a normal
    // condensation.
    let checkpoint_store = crate::store::CheckpointStore::new(repo, state_store);
    let records: Vec<crate::store::CheckpointRecord> = turns
        .iter()
        .map(|turn| checkpoint_store.read_checkpoint_record(&turn.id, &state.session_id))
        .collect();
    let is_task = !records.is_empty() && records.iter().all(|r| r.is_task_checkpoint);
    let tool_use_id = if is_task {
        let first = records[0].tool_use_id.clone();
        records
            .iter()
            .all(|r| r.tool_use_id == first)
            .then_some(first)
            .flatten()
    } else {
        None
    };

    let info = CheckpointInfo {
        checkpoint_id: checkpoint_id.clone(),
        session_id: state.session_id.clone(),
        session_ids: vec![state.session_id.clone()],
        created_at: OffsetDateTime::now_utc(),
        checkpoints_count,
        files_touched: files_touched.clone(),
        agent: state.agent_type.name().to_string(),
        is_task,
        tool_use_id,
        parent_checkpoint_id: parent.map(|p| p.checkpoint_id),
        attribution,
        token_usage: entire_core::transcript::token_usage(&entries),
    };

    let shard = checkpoint_shard_path(&checkpoint_id);
    let mut entry_files: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    entry_files.insert(format!("{shard}/metadata.json"), serde_json::to_vec_pretty(&info)?);
    entry_files.insert(format!("{shard}/full.jsonl"), full_jsonl.clone().into_bytes());
    entry_files.insert(format!("{shard}/content_hash.txt"), content_hash.clone().into_bytes());
    entry_files.insert(format!("{shard}/prompt.txt"), prompts.join("\n\n").into_bytes());
    entry_files.insert(
        format!("{shard}/context.md"),
        render_context(state, &info).into_bytes(),
    );
    entry_files.insert(format!("{shard}/summary.txt"), summary.into_bytes());

    let message = format!(
        "checkpoint {checkpoint_id}: {checkpoints_count} checkpoint(s) from {}",
        state.session_id
    );
    let metadata_commit = commit_on_metadata_branch(repo, &entry_files, &message)?;

    // Invariant I3: the entry we just wrote must hash-agree.
    let written = read_full_transcript(repo, &checkpoint_id)?.unwrap_or_default();
    let recomputed = sha256_hex(written.as_bytes());
    if recomputed != content_hash {
        return Err(CheckpointError::ContentHashMismatch {
            expected: content_hash,
            actual: recomputed,
        });
    }

    state.pending_checkpoint_id = Some(checkpoint_id.as_str().to_string());
    state.checkpoint_transcript_start += crate::attribution::count_lines(&transcript);
    state.prompt_attributions.clear();
    state_store.save(state)?;

    tracing::info!(
        checkpoint_id = %checkpoint_id,
        commit = %metadata_commit,
        checkpoints = checkpoints_count,
        "condensed shadow branch"
    );

    Ok(Some(CondenseOutcome {
        checkpoint_id,
        metadata_commit: Some(metadata_commit),
        checkpoints_count,
        files_touched,
    }))
}

fn discard_session(
    repo: &Repository,
    state_store: &StateStore,
    state: &State,
    shadow_ref: &str,
) -> Result<()> {
    repo.delete_ref(shadow_ref)?;
    state_store.delete(&state.session_id)?;
    tracing::info!(session_id = %state.session_id, "discarded session with no files touched");
    Ok(())
}

/// Attribution inputs: base tree, shadow tip tree, and the worktree
/// content about to be committed, limited to candidate files.
fn compute_attribution(
    repo: &Repository,
    state: &State,
    tip: &str,
    files_touched: &[String],
) -> Result<Option<AttributionResult>> {
    let mut candidates: Vec<String> = files_touched.to_vec();
    for attribution in &state.prompt_attributions {
        for file in attribution.user_added_per_file.keys() {
            if !candidates.contains(file) {
                candidates.push(file.clone());
            }
        }
    }

    let mut base = TreeContent::new();
    let mut shadow = TreeContent::new();
    let mut head = TreeContent::new();
    let root = repo.worktree_path().to_path_buf();
    for file in &candidates {
        if let Some(bytes) = repo.read_blob(&state.base_commit, file)? {
            base.insert(file.clone(), String::from_utf8_lossy(&bytes).into_owned());
        }
        if let Some(bytes) = repo.read_blob(tip, file)? {
            shadow.insert(file.clone(), String::from_utf8_lossy(&bytes).into_owned());
        }
        if let Ok(bytes) = std::fs::read(root.join(file)) {
            head.insert(file.clone(), String::from_utf8_lossy(&bytes).into_owned());
        }
    }

    Ok(calculate_with_accumulated(
        &base,
        &shadow,
        &head,
        files_touched,
        &state.prompt_attributions,
    ))
}

fn render_context(state: &State, info: &CheckpointInfo) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Session {}\n\n", state.session_id));
    out.push_str(&format!("- Agent: {}\n", info.agent));
    out.push_str(&format!("- Base commit: {}\n", state.base_commit));
    out.push_str(&format!("- Checkpoints: {}\n", info.checkpoints_count));
    if let Some(attribution) = &info.attribution {
        out.push_str(&format!(
            "- Attribution: {} agent / {} human added ({:.1}% agent)\n",
            attribution.agent_lines, attribution.human_added, attribution.agent_percentage
        ));
    }
    if !info.files_touched.is_empty() {
        out.push_str("\n## Files touched\n\n");
        for file in &info.files_touched {
            out.push_str(&format!("- {file}\n"));
        }
    }
    out
}

/// Commit new entry files onto the metadata branch, carrying all prior
/// entries forward. Contention is resolved by compare-and-set with
/// bounded, jittered exponential backoff; the loser rebuilds against the
/// winner's tip.
fn commit_on_metadata_branch(
    repo: &Repository,
    entry_files: &BTreeMap<String, Vec<u8>>,
    message: &str,
) -> Result<String> {
    let meta_ref = metadata_ref_name();
    for attempt in 0..METADATA_REF_ATTEMPTS {
        let tip = repo.ref_target(&meta_ref)?;

        let mut files: BTreeMap<String, FileSpec> = match &tip {
            Some(tip) => repo
                .tree_entries(tip)?
                .into_iter()
                .map(|(path, entry)| (path, FileSpec::from_blob(entry.id, entry.executable)))
                .collect(),
            None => BTreeMap::new(),
        };
        for (path, bytes) in entry_files {
            files.insert(path.clone(), FileSpec::from_bytes(bytes.clone(), false));
        }

        let tree = repo.build_tree(&files)?;
        let parents: Vec<String> = tip.clone().into_iter().collect();
        let commit = repo.commit_tree(&tree, &parents, message)?;
        if repo.compare_and_set_ref(&meta_ref, tip.as_deref(), &commit)? {
            return Ok(commit);
        }

        let jitter = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| u64::from(d.subsec_nanos()) % METADATA_BACKOFF_BASE_MS)
            .unwrap_or(0);
        let backoff = METADATA_BACKOFF_BASE_MS * (1 << attempt) + jitter;
        tracing::warn!(attempt, backoff_ms = backoff, "metadata ref contention, backing off");
        std::thread::sleep(std::time::Duration::from_millis(backoff));
    }
    Err(CheckpointError::MetadataRefConflict {
        attempts: METADATA_REF_ATTEMPTS,
    })
}

/// Tip of the metadata branch, if it exists.
pub fn metadata_tip(repo: &Repository) -> Result<Option<String>> {
    Ok(repo.ref_target(&metadata_ref_name())?)
}

/// Read one condensed entry's metadata, `None` when absent.
pub fn read_checkpoint_info(repo: &Repository, id: &CheckpointId) -> Result<Option<CheckpointInfo>> {
    let Some(tip) = metadata_tip(repo)? else {
        return Ok(None);
    };
    let path = format!("{}/metadata.json", checkpoint_shard_path(id));
    match repo.read_blob(&tip, &path)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Read a condensed entry's `full.jsonl`, verifying it against the stored
/// `content_hash.txt` (invariant I3). A mismatch is fatal.
pub fn read_full_transcript(repo: &Repository, id: &CheckpointId) -> Result<Option<String>> {
    let Some(tip) = metadata_tip(repo)? else {
        return Ok(None);
    };
    let shard = checkpoint_shard_path(id);
    let Some(bytes) = repo.read_blob(&tip, &format!("{shard}/full.jsonl"))? else {
        return Ok(None);
    };
    let content = String::from_utf8_lossy(&bytes).into_owned();
    if let Some(stored) = repo.read_blob(&tip, &format!("{shard}/content_hash.txt"))? {
        let stored = String::from_utf8_lossy(&stored).trim().to_string();
        let actual = sha256_hex(content.as_bytes());
        if stored != actual {
            return Err(CheckpointError::ContentHashMismatch {
                expected: stored,
                actual,
            });
        }
    }
    Ok(Some(content))
}

/// All condensed entries reachable from the metadata tip.
pub fn list_checkpoint_infos(repo: &Repository) -> Result<Vec<CheckpointInfo>> {
    let Some(tip) = metadata_tip(repo)? else {
        return Ok(Vec::new());
    };
    let mut infos = Vec::new();
    for (path, entry) in repo.tree_entries(&tip)? {
        if !path.ends_with("/metadata.json") {
            continue;
        }
        let bytes = repo.blob_content(&entry.id)?;
        match serde_json::from_slice::<CheckpointInfo>(&bytes) {
            Ok(info) => infos.push(info),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "skipping unreadable checkpoint metadata");
            }
        }
    }
    Ok(infos)
}

fn latest_entry_for_session(
    repo: &Repository,
    session_id: &str,
) -> Result<Option<CheckpointInfo>> {
    let mut infos: Vec<CheckpointInfo> = list_checkpoint_infos(repo)?
        .into_iter()
        .filter(|info| {
            info.session_id == session_id || info.session_ids.iter().any(|s| s == session_id)
        })
        .collect();
    infos.sort_by_key(|info| info.created_at);
    Ok(infos.pop())
}
