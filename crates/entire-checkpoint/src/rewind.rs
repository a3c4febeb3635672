//! Rewind: project a past checkpoint back onto the working tree.
//!
//! Two kinds of points. *Full* points are checkpoint commits still on a
//! shadow ref; restoring one overwrites files and resets the shadow tip
//! so later turns build on the rewound state. *Logs-only* points are
//! commits whose shadow has been condensed away; only the agent's
//! transcript can be restored, the working tree is never touched.
//!
//! Deletion is deliberately narrow: a file disappears only when it is
//! absent from the checkpoint, untracked in HEAD, and not part of the
//! untracked set captured at session start. Uncommitted changes are
//! expected and overwritten; callers show the preview first.

use std::path::{Path, PathBuf};

use entire_core::paths::is_excluded_from_rewind;
use entire_core::trailers;
use entire_core::CheckpointId;
use entire_git::Repository;
use entire_session::{AgentKind, StateStore};

use crate::condense::{list_checkpoint_infos, read_checkpoint_info, read_full_transcript};
use crate::error::{CheckpointError, Result};
use crate::store::CheckpointStore;

/// Maximum commits of branch history scanned for logs-only points.
const LOGS_ONLY_SCAN_LIMIT: usize = 50;

/// A restorable point in session history.
#[derive(Debug, Clone)]
pub struct RewindPoint {
    /// Commit hash (shadow checkpoint for full points, user commit for
    /// logs-only points).
    pub id: String,
    pub message: String,
    pub seconds: i64,
    pub session_id: Option<String>,
    pub is_task_checkpoint: bool,
    pub tool_use_id: Option<String>,
    pub is_logs_only: bool,
    pub checkpoint_id: Option<CheckpointId>,
    pub agent: Option<String>,
}

/// What a rewind would do, without doing it.
#[derive(Debug, Clone, Default)]
pub struct RewindPreview {
    pub files_to_restore: Vec<String>,
    pub files_to_delete: Vec<String>,
}

/// What a rewind actually did.
#[derive(Debug, Clone, Default)]
pub struct RewindSummary {
    pub restored: Vec<String>,
    pub deleted: Vec<String>,
}

/// Available rewind points: checkpoints of sessions based on the current
/// HEAD, merged with logs-only points from branch history, newest first.
pub fn rewind_points(
    repo: &Repository,
    state_store: &StateStore,
    limit: usize,
) -> Result<Vec<RewindPoint>> {
    let head = repo.head_commit()?;
    let checkpoint_store = CheckpointStore::new(repo, state_store);

    let mut points = Vec::new();
    for state in state_store.list()? {
        if state.base_commit != head {
            continue;
        }
        let worktree_id = (!state.worktree_id.is_empty()).then_some(state.worktree_id.as_str());
        let Ok(checkpoints) = checkpoint_store.list_temporary(
            &state.base_commit,
            worktree_id,
            &state.session_id,
            limit,
        ) else {
            continue;
        };
        for cp in checkpoints {
            points.push(RewindPoint {
                id: cp.commit_hash,
                message: cp.message,
                seconds: cp.seconds,
                session_id: Some(cp.session_id),
                is_task_checkpoint: cp.is_task_checkpoint,
                tool_use_id: cp.tool_use_id,
                is_logs_only: false,
                checkpoint_id: None,
                agent: Some(state.agent_type.name().to_string()),
            });
        }
    }

    for point in logs_only_points(repo, limit)? {
        if points.iter().all(|p| p.id != point.id) {
            points.push(point);
        }
    }

    points.sort_by_key(|p| std::cmp::Reverse(p.seconds));
    points.truncate(limit);
    Ok(points)
}

/// Commits in branch history whose `Entire-Checkpoint` trailer resolves
/// to a condensed entry on the metadata branch.
pub fn logs_only_points(repo: &Repository, limit: usize) -> Result<Vec<RewindPoint>> {
    let infos = list_checkpoint_infos(repo)?;
    if infos.is_empty() {
        return Ok(Vec::new());
    }
    let by_id: std::collections::HashMap<&str, &crate::condense::CheckpointInfo> = infos
        .iter()
        .map(|info| (info.checkpoint_id.as_str(), info))
        .collect();

    let head = repo.head_commit()?;
    let mut points = Vec::new();
    for commit in repo.iter_log(&head, LOGS_ONLY_SCAN_LIMIT)? {
        let Some(checkpoint_id) = trailers::parse_checkpoint(&commit.message) else {
            continue;
        };
        let Some(info) = by_id.get(checkpoint_id.as_str()) else {
            continue;
        };
        points.push(RewindPoint {
            id: commit.id,
            message: commit.summary,
            seconds: commit.seconds,
            session_id: Some(info.session_id.clone()),
            is_task_checkpoint: false,
            tool_use_id: None,
            is_logs_only: true,
            checkpoint_id: Some(checkpoint_id),
            agent: Some(info.agent.clone()),
        });
        if points.len() >= limit {
            break;
        }
    }
    Ok(points)
}

/// Report what `rewind` would restore and delete. Logs-only points never
/// touch the working tree, so their preview is empty.
pub fn preview_rewind(
    repo: &Repository,
    state_store: &StateStore,
    point: &RewindPoint,
) -> Result<RewindPreview> {
    if point.is_logs_only {
        return Ok(RewindPreview::default());
    }
    let plan = build_plan(repo, state_store, point)?;
    Ok(RewindPreview {
        files_to_restore: plan.restore.iter().map(|(p, _)| p.clone()).collect(),
        files_to_delete: plan.delete.clone(),
    })
}

/// Execute a full rewind: delete later-created untracked files, project
/// the checkpoint tree to disk, and reset the shadow ref to the
/// checkpoint so the next turn continues from here.
pub fn rewind(
    repo: &Repository,
    state_store: &StateStore,
    point: &RewindPoint,
) -> Result<RewindSummary> {
    if point.is_logs_only {
        return Err(CheckpointError::RewindPointNotFound(format!(
            "{} is a logs-only point; it restores transcripts, not files",
            point.id
        )));
    }
    let plan = build_plan(repo, state_store, point)?;
    let root = repo.worktree_path().to_path_buf();
    let mut summary = RewindSummary::default();

    for path in &plan.delete {
        match std::fs::remove_file(root.join(path)) {
            Ok(()) => {
                tracing::info!(path = %path, "deleted");
                summary.deleted.push(path.clone());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "failed to delete");
            }
        }
    }

    for (path, entry) in &plan.restore {
        let target = root.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = repo.blob_content(&entry.id)?;
        std::fs::write(&target, content)?;
        set_executable(&target, entry.executable);
        tracing::info!(path = %path, "restored");
        summary.restored.push(path.clone());
    }

    // Reset the shadow ref so subsequent turns build on this state. File
    // restoration is the primary operation; a failure here only warns.
    if let Err(e) = reset_shadow(repo, state_store, point) {
        tracing::warn!(error = %e, "failed to reset shadow ref after rewind");
    }

    Ok(summary)
}

/// Restore a logs-only point: fetch `full.jsonl` from the metadata branch
/// and write it where the agent keeps this session's transcript. Returns
/// the written path. The working tree is not modified.
pub fn restore_logs_only(repo: &Repository, point: &RewindPoint) -> Result<PathBuf> {
    let checkpoint_id = point
        .checkpoint_id
        .clone()
        .ok_or_else(|| CheckpointError::RewindPointNotFound(point.id.clone()))?;
    let content = read_full_transcript(repo, &checkpoint_id)?
        .ok_or_else(|| CheckpointError::RewindPointNotFound(checkpoint_id.to_string()))?;
    let info = read_checkpoint_info(repo, &checkpoint_id)?
        .ok_or_else(|| CheckpointError::RewindPointNotFound(checkpoint_id.to_string()))?;

    let agent = AgentKind::from_name(&info.agent);
    let repo_path = repo.worktree_path().to_string_lossy().into_owned();
    let dest = agent
        .session_file(&repo_path, &info.session_id)
        .ok_or_else(|| {
            CheckpointError::RewindPointNotFound(format!(
                "no agent session dir for {}",
                info.session_id
            ))
        })?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&dest, content)?;
    tracing::info!(path = %dest.display(), "restored session transcript");
    Ok(dest)
}

struct RewindPlan {
    restore: Vec<(String, entire_git::TreeFile)>,
    delete: Vec<String>,
}

fn build_plan(
    repo: &Repository,
    state_store: &StateStore,
    point: &RewindPoint,
) -> Result<RewindPlan> {
    if !repo.commit_exists(&point.id) {
        return Err(CheckpointError::RewindPointNotFound(point.id.clone()));
    }

    // Files the checkpoint will project, engine paths excluded.
    let mut restore: Vec<(String, entire_git::TreeFile)> = repo
        .tree_entries(&point.id)?
        .into_iter()
        .filter(|(path, _)| !is_excluded_from_rewind(path))
        .collect();
    restore.sort_by(|(a, _), (b, _)| a.cmp(b));
    let in_checkpoint: std::collections::HashSet<&str> =
        restore.iter().map(|(p, _)| p.as_str()).collect();

    // Untracked files present at session start are never deleted
    // (invariant I5).
    let session_id = point.session_id.clone().or_else(|| {
        repo.commit_info(&point.id)
            .ok()
            .and_then(|info| trailers::parse_session(&info.message))
    });
    let preserved: std::collections::HashSet<String> = session_id
        .as_deref()
        .and_then(|sid| state_store.load(sid).ok().flatten())
        .map(|state| state.untracked_files_at_start.into_iter().collect())
        .unwrap_or_default();

    // Files tracked in HEAD are the user's committed work; untouched.
    let head = repo.head_commit()?;
    let tracked = repo.tree_entries(&head)?;

    let root = repo.worktree_path().to_path_buf();
    let mut delete = Vec::new();
    for path in walk_worktree(&root) {
        if in_checkpoint.contains(path.as_str())
            || tracked.contains_key(&path)
            || preserved.contains(&path)
        {
            continue;
        }
        delete.push(path);
    }
    delete.sort();

    Ok(RewindPlan { restore, delete })
}

fn reset_shadow(repo: &Repository, state_store: &StateStore, point: &RewindPoint) -> Result<()> {
    let session_id = point
        .session_id
        .clone()
        .or_else(|| {
            repo.commit_info(&point.id)
                .ok()
                .and_then(|info| trailers::parse_session(&info.message))
        })
        .ok_or_else(|| {
            CheckpointError::RewindPointNotFound("checkpoint has no session trailer".into())
        })?;
    let Some(state) = state_store.load(&session_id)? else {
        return Err(CheckpointError::RewindPointNotFound(format!(
            "session {session_id} not found"
        )));
    };
    CheckpointStore::new(repo, state_store).reset_shadow_to(&state, &point.id)
}

/// Relative paths of all regular files under `root`, skipping the
/// excluded engine/VCS directories.
fn walk_worktree(root: &Path) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let rel = relative.to_string_lossy().replace('\\', "/");
            if is_excluded_from_rewind(&rel) {
                continue;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                out.push(rel);
            }
        }
    }
    out
}

fn set_executable(path: &Path, executable: bool) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if executable { 0o755 } else { 0o644 };
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
    }
    #[cfg(not(unix))]
    {
        let _ = (path, executable);
    }
}
