//! Shadow branch naming and base-commit migration.
//!
//! One shadow ref exists per (base commit, worktree). When HEAD moves
//! mid-session (a rebase, a pull, an amend done by the agent itself),
//! the ref is renamed to the new base so the checkpoint chain stays
//! attached. This migration is the sole mechanism keeping sessions
//! coherent across HEAD changes.

use entire_core::paths::shadow_ref_name;
use entire_git::Repository;
use entire_session::{State, StateStore};

use crate::error::Result;

/// The worktree id of a session, `None` for the main worktree.
fn worktree_suffix(state: &State) -> Option<&str> {
    if state.worktree_id.is_empty() {
        None
    } else {
        Some(&state.worktree_id)
    }
}

/// Fully-qualified shadow ref name for a session's current base.
pub fn shadow_ref_for(state: &State) -> String {
    shadow_ref_name(&state.base_commit, worktree_suffix(state))
}

/// Fully-qualified shadow ref name for an arbitrary base in this
/// session's worktree.
pub fn shadow_ref_for_base(state: &State, base_commit: &str) -> String {
    shadow_ref_name(base_commit, worktree_suffix(state))
}

/// If HEAD no longer matches `state.base_commit`, move the shadow ref to
/// the name derived from the current HEAD and update the record.
///
/// Three shapes:
/// - old and new names collide on the truncated prefix: update only the
///   record, the ref already has the right name;
/// - the old ref does not exist (first checkpoint after the HEAD change):
///   update only the record;
/// - otherwise: create the new ref at the old tip, then drop the old
///   name. A failed delete is non-fatal; the new ref is what matters.
///
/// Returns `true` when the record changed; the caller persists it before
/// continuing.
pub fn migrate_shadow_branch_if_needed(repo: &Repository, state: &mut State) -> Result<bool> {
    if state.base_commit.is_empty() {
        return Ok(false);
    }

    let head = repo.head_commit()?;
    if state.base_commit == head {
        return Ok(false);
    }

    let old_ref = shadow_ref_for(state);
    let new_ref = shadow_ref_for_base(state, &head);

    if old_ref == new_ref {
        // Truncated-prefix hash collision.
        state.base_commit = head;
        return Ok(true);
    }

    let Some(old_tip) = repo.ref_target(&old_ref)? else {
        tracing::info!(
            session_id = %state.session_id,
            base = %&head[..7.min(head.len())],
            "updated session base commit (HEAD changed during session)"
        );
        state.base_commit = head;
        return Ok(true);
    };

    repo.set_ref(&new_ref, &old_tip)?;
    if let Err(e) = repo.delete_ref(&old_ref) {
        tracing::warn!(old_ref = %old_ref, error = %e, "failed to remove old shadow ref");
    }
    tracing::info!(
        session_id = %state.session_id,
        from = %old_ref,
        to = %new_ref,
        "moved shadow branch (HEAD changed during session)"
    );

    state.base_commit = head;
    Ok(true)
}

/// Migrate and, when anything changed, persist the session record before
/// the caller continues writing checkpoints.
pub fn migrate_and_persist_if_needed(
    repo: &Repository,
    store: &StateStore,
    state: &mut State,
) -> Result<bool> {
    let migrated = migrate_shadow_branch_if_needed(repo, state)?;
    if migrated {
        store.save(state)?;
    }
    Ok(migrated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use entire_session::AgentKind;
    use std::collections::BTreeMap;
    use time::OffsetDateTime;

    fn fixture() -> (tempfile::TempDir, Repository) {
        let tmp = tempfile::tempdir().unwrap();
        let raw = git2::Repository::init(tmp.path()).unwrap();
        let mut config = raw.config().unwrap();
        config.set_str("user.name", "Test").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        drop(config);
        drop(raw);
        std::fs::write(tmp.path().join("a.txt"), "a\n").unwrap();
        let repo = Repository::open(tmp.path()).unwrap();
        repo.commit_workdir("initial").unwrap();
        (tmp, repo)
    }

    fn state_for(repo: &Repository) -> State {
        State::new(
            "2026-08-01-mig",
            AgentKind::ClaudeCode,
            repo.head_commit().unwrap(),
            repo.worktree_path().to_string_lossy().into_owned(),
            None,
            OffsetDateTime::now_utc(),
        )
    }

    #[test]
    fn no_migration_when_head_unchanged() {
        let (_tmp, repo) = fixture();
        let mut state = state_for(&repo);
        assert!(!migrate_shadow_branch_if_needed(&repo, &mut state).unwrap());
    }

    #[test]
    fn migration_without_old_ref_updates_state_only() {
        let (tmp, repo) = fixture();
        let mut state = state_for(&repo);
        let old_base = state.base_commit.clone();

        std::fs::write(tmp.path().join("b.txt"), "b\n").unwrap();
        let new_head = repo.commit_workdir("second").unwrap();

        assert!(migrate_shadow_branch_if_needed(&repo, &mut state).unwrap());
        assert_eq!(state.base_commit, new_head);
        assert_ne!(state.base_commit, old_base);
    }

    #[test]
    fn migration_renames_existing_shadow_ref() {
        let (tmp, repo) = fixture();
        let mut state = state_for(&repo);
        let old_base = state.base_commit.clone();

        // A checkpoint commit on the old shadow ref.
        let tree = repo.build_tree(&BTreeMap::new()).unwrap();
        let cp = repo.commit_tree(&tree, &[old_base.clone()], "checkpoint").unwrap();
        let old_ref = shadow_ref_for(&state);
        repo.set_ref(&old_ref, &cp).unwrap();

        std::fs::write(tmp.path().join("b.txt"), "b\n").unwrap();
        let new_head = repo.commit_workdir("second").unwrap();

        assert!(migrate_shadow_branch_if_needed(&repo, &mut state).unwrap());
        assert_eq!(state.base_commit, new_head);

        let new_ref = shadow_ref_for(&state);
        assert_ne!(old_ref, new_ref);
        assert!(repo.ref_target(&old_ref).unwrap().is_none());
        assert_eq!(repo.ref_target(&new_ref).unwrap().as_deref(), Some(cp.as_str()));
    }

    #[test]
    fn shadow_ref_carries_worktree_suffix() {
        let (_tmp, repo) = fixture();
        let mut state = state_for(&repo);
        state.worktree_id = "feat-x".into();
        let name = shadow_ref_for(&state);
        assert!(name.ends_with("+feat-x"), "{name}");
    }
}
