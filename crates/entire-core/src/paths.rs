//! Well-known names and path formulas. Pure computation, no I/O, so both
//! the checkpoint store and the rewind engine derive identical names.

use std::path::PathBuf;

use crate::CheckpointId;

/// Working-tree directory for transient metadata; always excluded from a
/// checkpoint's tracked-file set and from rewind.
pub const ENTIRE_DIR: &str = ".entire";
/// Agent configuration directory, never touched by rewind.
pub const CLAUDE_DIR: &str = ".claude";
pub const GIT_DIR: &str = ".git";

/// Directory under the git common dir holding session state files.
pub const SESSION_STATE_DIR: &str = "entire-sessions";

/// The single orphan branch holding condensed session records.
pub const METADATA_BRANCH: &str = "entire/sessions";

/// Number of base-commit hex characters in a shadow branch name. Kept
/// short for readable ref names; a prefix collision during migration
/// falls back to a state-only update rather than a ref rename.
pub const SHADOW_PREFIX_LEN: usize = 7;

/// Shadow branch name for a base commit: `entire/<base[:7]>`, suffixed
/// with `+<worktree-id>` in linked worktrees so parallel worktrees on the
/// same base cannot collide.
pub fn shadow_branch_name(base_commit: &str, worktree_id: Option<&str>) -> String {
    let prefix = &base_commit[..SHADOW_PREFIX_LEN.min(base_commit.len())];
    match worktree_id {
        Some(wt) if !wt.is_empty() => format!("entire/{prefix}+{wt}"),
        _ => format!("entire/{prefix}"),
    }
}

/// Fully-qualified shadow ref name.
pub fn shadow_ref_name(base_commit: &str, worktree_id: Option<&str>) -> String {
    format!("refs/heads/{}", shadow_branch_name(base_commit, worktree_id))
}

/// Fully-qualified metadata branch ref name.
pub fn metadata_ref_name() -> String {
    format!("refs/heads/{METADATA_BRANCH}")
}

/// Sharded directory for a condensed checkpoint: `<id[:2]>/<id[2:]>`.
pub fn checkpoint_shard_path(id: &CheckpointId) -> String {
    let (head, tail) = id.shard();
    format!("{head}/{tail}")
}

/// In-tree metadata directory for a session's checkpoint artifacts.
pub fn session_metadata_dir(session_id: &str) -> String {
    format!("{ENTIRE_DIR}/metadata/{session_id}")
}

/// True for paths that belong to the engine itself rather than the user's
/// project (`.entire` and everything under it).
pub fn is_infrastructure_path(path: &str) -> bool {
    path == ENTIRE_DIR || path.starts_with(&format!("{ENTIRE_DIR}/"))
}

/// True for paths rewind must never create or delete.
pub fn is_excluded_from_rewind(path: &str) -> bool {
    for dir in [ENTIRE_DIR, CLAUDE_DIR, GIT_DIR] {
        if path == dir || path.starts_with(&format!("{dir}/")) {
            return true;
        }
    }
    false
}

/// Sanitize an absolute repo path the way the agent names its per-project
/// directories: every non-alphanumeric character becomes `-`.
pub fn sanitize_path_for_claude(path: &str) -> String {
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Directory where the agent stores session transcripts for a repository.
/// `ENTIRE_TEST_CLAUDE_PROJECT_DIR` overrides it in tests.
pub fn claude_project_dir(repo_path: &str) -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("ENTIRE_TEST_CLAUDE_PROJECT_DIR") {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    let home = dirs::home_dir()?;
    Some(
        home.join(".claude")
            .join("projects")
            .join(sanitize_path_for_claude(repo_path)),
    )
}

/// The agent-side session id: our session ids are `YYYY-MM-DD-<uuid>`,
/// the agent's transcript files are named by the bare uuid.
pub fn model_session_id(session_id: &str) -> &str {
    let bytes = session_id.as_bytes();
    let dated = bytes.len() > 11
        && bytes[..11].iter().enumerate().all(|(i, b)| match i {
            4 | 7 | 10 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if dated {
        &session_id[11..]
    } else {
        session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_branch_name_truncates_base() {
        let name = shadow_branch_name("0123456789abcdef", None);
        assert_eq!(name, "entire/0123456");
    }

    #[test]
    fn shadow_branch_name_includes_worktree_id() {
        let name = shadow_branch_name("0123456789abcdef", Some("feat-x"));
        assert_eq!(name, "entire/0123456+feat-x");
        // Main worktree has no suffix.
        assert_eq!(
            shadow_branch_name("0123456789abcdef", Some("")),
            "entire/0123456"
        );
    }

    #[test]
    fn shard_path_splits_id() {
        let id = CheckpointId::parse("abcdef012345").unwrap();
        assert_eq!(checkpoint_shard_path(&id), "ab/cdef012345");
    }

    #[test]
    fn infrastructure_paths() {
        assert!(is_infrastructure_path(".entire"));
        assert!(is_infrastructure_path(".entire/metadata/test"));
        assert!(!is_infrastructure_path("src/main.rs"));
        assert!(!is_infrastructure_path(".entirefile"));
    }

    #[test]
    fn rewind_exclusions() {
        assert!(is_excluded_from_rewind(".git/config"));
        assert!(is_excluded_from_rewind(".claude/settings.json"));
        assert!(is_excluded_from_rewind(".entire/metadata/s/transcript.jsonl"));
        assert!(!is_excluded_from_rewind("src/lib.rs"));
        assert!(!is_excluded_from_rewind(".gitignore"));
    }

    #[test]
    fn sanitize_for_claude() {
        assert_eq!(sanitize_path_for_claude("/Users/test/myrepo"), "-Users-test-myrepo");
        assert_eq!(sanitize_path_for_claude("simple"), "simple");
        assert_eq!(
            sanitize_path_for_claude("/path/with spaces/here"),
            "-path-with-spaces-here"
        );
        assert_eq!(
            sanitize_path_for_claude("/path.with.dots/file"),
            "-path-with-dots-file"
        );
    }

    #[test]
    fn model_session_id_strips_date_prefix() {
        assert_eq!(
            model_session_id("2026-08-01-9f1c2d3e-aaaa"),
            "9f1c2d3e-aaaa"
        );
        assert_eq!(model_session_id("no-date-prefix"), "no-date-prefix");
        assert_eq!(model_session_id("short"), "short");
    }
}
