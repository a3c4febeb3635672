//! Repository adapter: the one place the engine talks to git.
//!
//! Everything is plumbing (trees, blobs, commits, refs), so the engine
//! never mutates the user's index or HEAD. The only porcelain-shaped
//! helper is [`Repository::commit_workdir`], which stages and commits the
//! working tree the way a user would; the hook flows never call it, but
//! the integration fixtures do.
//!
//! Ref updates that can race across hook processes go through
//! [`Repository::compare_and_set_ref`]; callers decide the retry budget.

mod error;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use git2::{ErrorCode, ObjectType, Oid, RepositoryState, Signature, Sort, TreeWalkMode, TreeWalkResult};

use entire_core::paths::is_infrastructure_path;

pub use error::{GitError, Result};

/// Regular-file permission bits git distinguishes.
const MODE_BLOB: i32 = 0o100644;
const MODE_BLOB_EXECUTABLE: i32 = 0o100755;
const MODE_TREE: i32 = 0o040000;

/// Content for one path when building a tree.
#[derive(Debug, Clone)]
pub enum FileContent {
    /// Literal bytes; a blob is written for them.
    Bytes(Vec<u8>),
    /// An existing blob, referenced by hex oid. Lets callers reuse a base
    /// tree's entries without reading their content.
    Blob(String),
}

/// One file in a tree under construction.
#[derive(Debug, Clone)]
pub struct FileSpec {
    pub content: FileContent,
    pub executable: bool,
}

impl FileSpec {
    pub fn from_bytes(content: impl Into<Vec<u8>>, executable: bool) -> Self {
        Self {
            content: FileContent::Bytes(content.into()),
            executable,
        }
    }

    pub fn from_blob(id: impl Into<String>, executable: bool) -> Self {
        Self {
            content: FileContent::Blob(id.into()),
            executable,
        }
    }
}

/// A blob entry read out of a committed tree.
#[derive(Debug, Clone)]
pub struct TreeFile {
    /// Hex blob oid.
    pub id: String,
    pub executable: bool,
}

/// Owned summary of a commit.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: String,
    pub summary: String,
    pub message: String,
    /// Commit time, seconds since epoch.
    pub seconds: i64,
}

/// A non-bare git repository (possibly a linked worktree).
pub struct Repository {
    inner: git2::Repository,
}

impl Repository {
    /// Discover the repository containing the current working directory.
    pub fn open_from_cwd() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Self::open(&cwd)
    }

    /// Discover the repository containing `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let inner = git2::Repository::discover(path).map_err(|_| GitError::RepoUnavailable)?;
        if inner.workdir().is_none() {
            return Err(GitError::RepoUnavailable);
        }
        Ok(Self { inner })
    }

    /// The working tree root of this (possibly linked) worktree.
    pub fn worktree_path(&self) -> &Path {
        // Checked non-bare in open().
        self.inner.workdir().expect("non-bare repository")
    }

    /// The shared git directory, identical across all worktrees. For a
    /// linked worktree the per-worktree gitdir contains a `commondir`
    /// file pointing back at it.
    pub fn common_dir(&self) -> PathBuf {
        let gitdir = self.inner.path();
        let pointer = gitdir.join("commondir");
        if let Ok(content) = std::fs::read_to_string(&pointer) {
            let target = Path::new(content.trim());
            let resolved = if target.is_absolute() {
                target.to_path_buf()
            } else {
                gitdir.join(target)
            };
            if let Ok(canonical) = resolved.canonicalize() {
                return canonical;
            }
            return resolved;
        }
        gitdir.to_path_buf()
    }

    /// The linked-worktree name, `None` in the main worktree. Linked
    /// worktrees have their gitdir at `<common>/worktrees/<name>`.
    pub fn worktree_id(&self) -> Option<String> {
        let gitdir = self.inner.path();
        let parent = gitdir.parent()?;
        if parent.file_name()? == "worktrees" {
            Some(gitdir.file_name()?.to_string_lossy().into_owned())
        } else {
            None
        }
    }

    /// Current HEAD commit id.
    pub fn head_commit(&self) -> Result<String> {
        let head = self
            .inner
            .head()
            .map_err(|_| GitError::RefNotFound("HEAD".into()))?;
        let commit = head
            .peel_to_commit()
            .map_err(|_| GitError::RefNotFound("HEAD".into()))?;
        Ok(commit.id().to_string())
    }

    /// Name of the checked-out branch, `None` when HEAD is detached.
    pub fn current_branch(&self) -> Option<String> {
        let head = self.inner.head().ok()?;
        if head.is_branch() {
            head.shorthand().map(str::to_string)
        } else {
            None
        }
    }

    /// True while a rebase (merge or apply backend, interactive or not)
    /// is in progress in this worktree.
    pub fn is_rebase_in_progress(&self) -> bool {
        matches!(
            self.inner.state(),
            RepositoryState::Rebase
                | RepositoryState::RebaseInteractive
                | RepositoryState::RebaseMerge
                | RepositoryState::ApplyMailboxOrRebase
        )
    }

    /// Whether the worktree has tracked modifications, staged changes, or
    /// untracked non-ignored files. Honors repository and user-level
    /// ignore rules (including the global excludes file); the engine's
    /// own `.entire/` directory never counts.
    pub fn has_uncommitted_changes(&self) -> Result<bool> {
        Ok(!self.status_paths(None)?.is_empty())
    }

    /// Untracked, non-ignored files (relative paths).
    pub fn untracked_files(&self) -> Result<Vec<String>> {
        self.status_paths(Some(git2::Status::WT_NEW))
    }

    /// All paths that differ from HEAD in the index or worktree.
    pub fn changed_paths(&self) -> Result<Vec<String>> {
        self.status_paths(None)
    }

    fn status_paths(&self, filter: Option<git2::Status>) -> Result<Vec<String>> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false)
            .exclude_submodules(true);
        let statuses = self.inner.statuses(Some(&mut opts))?;
        let mut paths = Vec::new();
        for entry in statuses.iter() {
            let Some(path) = entry.path() else { continue };
            if is_infrastructure_path(path) {
                continue;
            }
            if let Some(wanted) = filter {
                if !entry.status().intersects(wanted) {
                    continue;
                }
            }
            paths.push(path.to_string());
        }
        paths.sort();
        Ok(paths)
    }

    /// All regular-file entries of a commit's tree, keyed by
    /// repo-relative path. Symlinks and submodules are not content the
    /// checkpoint engine owns, so they are skipped here; rewind leaves
    /// them as the commit restored them.
    pub fn tree_entries(&self, commit_id: &str) -> Result<BTreeMap<String, TreeFile>> {
        let commit = self.find_commit(commit_id)?;
        let tree = commit.tree()?;
        let mut out = BTreeMap::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            let mode = entry.filemode();
            if entry.kind() == Some(ObjectType::Blob)
                && (mode == MODE_BLOB || mode == MODE_BLOB_EXECUTABLE)
            {
                if let Some(name) = entry.name() {
                    out.insert(
                        format!("{root}{name}"),
                        TreeFile {
                            id: entry.id().to_string(),
                            executable: mode == MODE_BLOB_EXECUTABLE,
                        },
                    );
                }
            }
            TreeWalkResult::Ok
        })?;
        Ok(out)
    }

    /// Content of a blob by hex oid.
    pub fn blob_content(&self, blob_id: &str) -> Result<Vec<u8>> {
        let oid = Oid::from_str(blob_id)?;
        Ok(self.inner.find_blob(oid)?.content().to_vec())
    }

    /// Content of `path` in a commit's tree, `None` if absent.
    pub fn read_blob(&self, commit_id: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let commit = self.find_commit(commit_id)?;
        let tree = commit.tree()?;
        match tree.get_path(Path::new(path)) {
            Ok(entry) if entry.kind() == Some(ObjectType::Blob) => {
                Ok(Some(self.inner.find_blob(entry.id())?.content().to_vec()))
            }
            Ok(_) => Ok(None),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Build a tree from a full path→content map. Paths are
    /// case-sensitive, `/`-separated, relative; nested directories are
    /// created as needed. Returns the tree oid.
    pub fn build_tree(&self, files: &BTreeMap<String, FileSpec>) -> Result<String> {
        #[derive(Default)]
        struct Dir {
            files: BTreeMap<String, (Oid, i32)>,
            dirs: BTreeMap<String, Dir>,
        }

        let mut root = Dir::default();
        for (path, spec) in files {
            let oid = match &spec.content {
                FileContent::Bytes(bytes) => self.inner.blob(bytes)?,
                FileContent::Blob(id) => Oid::from_str(id)?,
            };
            let mode = if spec.executable {
                MODE_BLOB_EXECUTABLE
            } else {
                MODE_BLOB
            };
            let mut dir = &mut root;
            let mut parts = path.split('/').peekable();
            while let Some(part) = parts.next() {
                if parts.peek().is_some() {
                    dir = dir.dirs.entry(part.to_string()).or_default();
                } else {
                    dir.files.insert(part.to_string(), (oid, mode));
                }
            }
        }

        fn write_dir(repo: &git2::Repository, dir: &Dir) -> Result<Oid> {
            let mut builder = repo.treebuilder(None)?;
            for (name, sub) in &dir.dirs {
                let sub_oid = write_dir(repo, sub)?;
                builder.insert(name, sub_oid, MODE_TREE)?;
            }
            for (name, (oid, mode)) in &dir.files {
                builder.insert(name, *oid, *mode)?;
            }
            Ok(builder.write()?)
        }

        Ok(write_dir(&self.inner, &root)?.to_string())
    }

    /// Create a commit object pointing at `tree_id` without moving any
    /// ref. Author/committer come from repository then global config,
    /// falling back to a deterministic default identity.
    pub fn commit_tree(&self, tree_id: &str, parents: &[String], message: &str) -> Result<String> {
        let tree = self.inner.find_tree(Oid::from_str(tree_id)?)?;
        let mut parent_commits = Vec::with_capacity(parents.len());
        for parent in parents {
            parent_commits.push(self.find_commit(parent)?);
        }
        let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();
        let sig = self.signature()?;
        let oid = self
            .inner
            .commit(None, &sig, &sig, message, &tree, &parent_refs)?;
        Ok(oid.to_string())
    }

    fn signature(&self) -> Result<Signature<'static>> {
        match self.inner.signature() {
            Ok(sig) => Ok(sig),
            Err(_) => Ok(Signature::now("entire", "entire@localhost")?),
        }
    }

    /// Resolve a fully-qualified ref name to its target commit id.
    pub fn ref_target(&self, name: &str) -> Result<Option<String>> {
        match self.inner.find_reference(name) {
            Ok(reference) => Ok(reference
                .resolve()?
                .target()
                .map(|oid| oid.to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Point `name` at `target`, creating or force-updating it.
    pub fn set_ref(&self, name: &str, target: &str) -> Result<()> {
        let oid = Oid::from_str(target)?;
        self.inner.reference(name, oid, true, "entire: update ref")?;
        Ok(())
    }

    /// Compare-and-set a ref. `expected` of `None` means "must not exist
    /// yet". Returns `false` (without updating) when another process got
    /// there first.
    pub fn compare_and_set_ref(
        &self,
        name: &str,
        expected: Option<&str>,
        target: &str,
    ) -> Result<bool> {
        let oid = Oid::from_str(target)?;
        let result = match expected {
            None => self
                .inner
                .reference(name, oid, false, "entire: create ref")
                .map(|_| ()),
            Some(current) => self
                .inner
                .reference_matching(
                    name,
                    oid,
                    true,
                    Oid::from_str(current)?,
                    "entire: advance ref",
                )
                .map(|_| ()),
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if matches!(e.code(), ErrorCode::Exists | ErrorCode::Modified | ErrorCode::NotFound) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a ref. Missing refs are fine; deletion is idempotent.
    pub fn delete_ref(&self, name: &str) -> Result<()> {
        match self.inner.find_reference(name) {
            Ok(mut reference) => {
                reference.delete()?;
                Ok(())
            }
            Err(e) if e.code() == ErrorCode::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Rename a ref, failing if the target name already exists.
    pub fn rename_ref(&self, old: &str, new: &str) -> Result<()> {
        let mut reference = self
            .inner
            .find_reference(old)
            .map_err(|_| GitError::RefNotFound(old.to_string()))?;
        reference.rename(new, false, "entire: rename ref")?;
        Ok(())
    }

    /// Walk history from `from`, newest first, up to `max` commits.
    pub fn iter_log(&self, from: &str, max: usize) -> Result<Vec<CommitInfo>> {
        let mut walk = self.inner.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        walk.push(Oid::from_str(from)?)?;
        let mut out = Vec::new();
        for oid in walk {
            if out.len() >= max {
                break;
            }
            out.push(self.commit_info(&oid?.to_string())?);
        }
        Ok(out)
    }

    /// Commits reachable from `tip` but not from `base`, newest first.
    pub fn commits_between(&self, tip: &str, base: &str) -> Result<Vec<CommitInfo>> {
        let mut walk = self.inner.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        walk.push(Oid::from_str(tip)?)?;
        walk.hide(
            Oid::from_str(base)
                .map_err(|_| GitError::BaseCommitUnreadable(base.to_string()))?,
        )
        .map_err(|_| GitError::BaseCommitUnreadable(base.to_string()))?;
        let mut out = Vec::new();
        for oid in walk {
            out.push(self.commit_info(&oid?.to_string())?);
        }
        Ok(out)
    }

    /// Owned info for one commit.
    pub fn commit_info(&self, id: &str) -> Result<CommitInfo> {
        let commit = self.find_commit(id)?;
        Ok(CommitInfo {
            id: commit.id().to_string(),
            summary: commit.summary().unwrap_or_default().to_string(),
            message: commit.message().unwrap_or_default().to_string(),
            seconds: commit.time().seconds(),
        })
    }

    /// Paths whose blobs differ between two commits' trees. Either side
    /// may be `None` (empty tree).
    pub fn changed_files_between(
        &self,
        old: Option<&str>,
        new: Option<&str>,
    ) -> Result<Vec<String>> {
        let old_tree = match old {
            Some(id) => Some(self.find_commit(id)?.tree()?),
            None => None,
        };
        let new_tree = match new {
            Some(id) => Some(self.find_commit(id)?.tree()?),
            None => None,
        };
        let diff =
            self.inner
                .diff_tree_to_tree(old_tree.as_ref(), new_tree.as_ref(), None)?;
        let mut paths = Vec::new();
        for delta in diff.deltas() {
            let path = delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path());
            if let Some(p) = path.and_then(Path::to_str) {
                paths.push(p.to_string());
            }
        }
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    /// True when `refs/remotes/origin/<branch>` exists.
    pub fn remote_branch_exists(&self, branch: &str) -> bool {
        self.inner
            .find_reference(&format!("refs/remotes/origin/{branch}"))
            .is_ok()
    }

    /// Whether a commit object is readable.
    pub fn commit_exists(&self, id: &str) -> bool {
        Oid::from_str(id)
            .ok()
            .and_then(|oid| self.inner.find_commit(oid).ok())
            .is_some()
    }

    fn find_commit(&self, id: &str) -> Result<git2::Commit<'_>> {
        let oid = Oid::from_str(id)?;
        self.inner
            .find_commit(oid)
            .map_err(|_| GitError::BaseCommitUnreadable(id.to_string()))
    }

    /// Stage everything except `.entire/` and commit to HEAD, the way a
    /// user-side `git add -A && git commit` would. Hook flows never call
    /// this; it exists for fixtures and drivers that need a user commit.
    pub fn commit_workdir(&self, message: &str) -> Result<String> {
        let mut index = self.inner.index()?;
        index.add_all(
            ["*"].iter(),
            git2::IndexAddOption::DEFAULT,
            Some(&mut |path: &Path, _matched: &[u8]| {
                let p = path.to_string_lossy();
                if is_infrastructure_path(&p) {
                    1
                } else {
                    0
                }
            }),
        )?;
        index.write()?;
        let tree_oid = index.write_tree()?;
        let tree = self.inner.find_tree(tree_oid)?;
        let sig = self.signature()?;
        let parent = self.inner.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = self
            .inner
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        Ok(oid.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, Repository) {
        let tmp = tempfile::tempdir().unwrap();
        let raw = git2::Repository::init(tmp.path()).unwrap();
        let mut config = raw.config().unwrap();
        config.set_str("user.name", "Test").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        drop(config);
        drop(raw);
        fs::write(tmp.path().join("README.md"), "hello\n").unwrap();
        let repo = Repository::open(tmp.path()).unwrap();
        repo.commit_workdir("initial").unwrap();
        (tmp, repo)
    }

    #[test]
    fn open_outside_repo_fails() {
        let tmp = tempfile::tempdir().unwrap();
        // A bare path with no repo above it (tempdirs live outside any).
        let result = Repository::open(tmp.path());
        assert!(matches!(result, Err(GitError::RepoUnavailable)));
    }

    #[test]
    fn head_and_commit_info() {
        let (_tmp, repo) = fixture();
        let head = repo.head_commit().unwrap();
        let info = repo.commit_info(&head).unwrap();
        assert_eq!(info.summary, "initial");
        assert_eq!(info.id, head);
    }

    #[test]
    fn worktree_id_is_none_in_main_worktree() {
        let (_tmp, repo) = fixture();
        assert!(repo.worktree_id().is_none());
    }

    #[test]
    fn common_dir_is_gitdir_in_main_worktree() {
        let (tmp, repo) = fixture();
        let common = repo.common_dir();
        assert_eq!(
            common.canonicalize().unwrap(),
            tmp.path().join(".git").canonicalize().unwrap()
        );
    }

    #[test]
    fn build_tree_and_read_back() {
        let (_tmp, repo) = fixture();
        let mut files = BTreeMap::new();
        files.insert(
            "src/main.rs".to_string(),
            FileSpec::from_bytes("fn main() {}\n", false),
        );
        files.insert(
            "bin/run.sh".to_string(),
            FileSpec::from_bytes("#!/bin/sh\n", true),
        );
        let tree = repo.build_tree(&files).unwrap();
        let head = repo.head_commit().unwrap();
        let commit = repo.commit_tree(&tree, &[head], "snapshot").unwrap();

        let entries = repo.tree_entries(&commit).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries["bin/run.sh"].executable);
        assert!(!entries["src/main.rs"].executable);

        let content = repo.read_blob(&commit, "src/main.rs").unwrap().unwrap();
        assert_eq!(content, b"fn main() {}\n");
        assert!(repo.read_blob(&commit, "missing.rs").unwrap().is_none());
    }

    #[test]
    fn build_tree_can_reference_existing_blobs() {
        let (_tmp, repo) = fixture();
        let head = repo.head_commit().unwrap();
        let base = repo.tree_entries(&head).unwrap();
        let readme = &base["README.md"];

        let mut files = BTreeMap::new();
        files.insert(
            "README.md".to_string(),
            FileSpec::from_blob(readme.id.clone(), false),
        );
        let tree = repo.build_tree(&files).unwrap();
        let commit = repo.commit_tree(&tree, &[head], "reuse blob").unwrap();
        assert_eq!(
            repo.read_blob(&commit, "README.md").unwrap().unwrap(),
            b"hello\n"
        );
    }

    #[test]
    fn ref_lifecycle_and_cas() {
        let (_tmp, repo) = fixture();
        let head = repo.head_commit().unwrap();
        let name = "refs/heads/entire/abc1234";

        // Create expecting absence.
        assert!(repo.compare_and_set_ref(name, None, &head).unwrap());
        // A second create loses.
        assert!(!repo.compare_and_set_ref(name, None, &head).unwrap());
        assert_eq!(repo.ref_target(name).unwrap().as_deref(), Some(head.as_str()));

        // Advance with matching expectation.
        let tree = repo.build_tree(&BTreeMap::new()).unwrap();
        let next = repo.commit_tree(&tree, &[head.clone()], "next").unwrap();
        assert!(repo.compare_and_set_ref(name, Some(&head), &next).unwrap());
        // Stale expectation loses.
        assert!(!repo.compare_and_set_ref(name, Some(&head), &next).unwrap());

        repo.delete_ref(name).unwrap();
        assert!(repo.ref_target(name).unwrap().is_none());
        // Idempotent delete.
        repo.delete_ref(name).unwrap();
    }

    #[test]
    fn rename_ref_moves_target() {
        let (_tmp, repo) = fixture();
        let head = repo.head_commit().unwrap();
        repo.set_ref("refs/heads/entire/aaa1111", &head).unwrap();
        repo.rename_ref("refs/heads/entire/aaa1111", "refs/heads/entire/bbb2222")
            .unwrap();
        assert!(repo.ref_target("refs/heads/entire/aaa1111").unwrap().is_none());
        assert_eq!(
            repo.ref_target("refs/heads/entire/bbb2222").unwrap().as_deref(),
            Some(head.as_str())
        );
        assert!(matches!(
            repo.rename_ref("refs/heads/entire/aaa1111", "refs/heads/x"),
            Err(GitError::RefNotFound(_))
        ));
    }

    #[test]
    fn status_sees_untracked_but_not_infrastructure() {
        let (tmp, repo) = fixture();
        assert!(!repo.has_uncommitted_changes().unwrap());

        fs::write(tmp.path().join("notes.txt"), "scratch\n").unwrap();
        fs::create_dir_all(tmp.path().join(".entire/logs")).unwrap();
        fs::write(tmp.path().join(".entire/logs/debug.log"), "x\n").unwrap();

        assert!(repo.has_uncommitted_changes().unwrap());
        assert_eq!(repo.untracked_files().unwrap(), vec!["notes.txt"]);
    }

    #[test]
    fn status_honors_gitignore() {
        let (tmp, repo) = fixture();
        fs::write(tmp.path().join(".gitignore"), "*.tmp\n").unwrap();
        repo.commit_workdir("add gitignore").unwrap();
        fs::write(tmp.path().join("scratch.tmp"), "ignored\n").unwrap();
        assert!(!repo.has_uncommitted_changes().unwrap());
    }

    #[test]
    fn commits_between_walks_shadow_chain() {
        let (_tmp, repo) = fixture();
        let base = repo.head_commit().unwrap();
        let tree = repo.build_tree(&BTreeMap::new()).unwrap();
        let c1 = repo.commit_tree(&tree, &[base.clone()], "one").unwrap();
        let c2 = repo.commit_tree(&tree, &[c1.clone()], "two").unwrap();

        let between = repo.commits_between(&c2, &base).unwrap();
        let ids: Vec<&str> = between.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![c2.as_str(), c1.as_str()]);

        assert!(repo.commits_between(&base, &base).unwrap().is_empty());
    }

    #[test]
    fn changed_files_between_commits() {
        let (tmp, repo) = fixture();
        let base = repo.head_commit().unwrap();
        fs::write(tmp.path().join("new.rs"), "x\n").unwrap();
        fs::write(tmp.path().join("README.md"), "changed\n").unwrap();
        let next = repo.commit_workdir("change").unwrap();
        let changed = repo.changed_files_between(Some(&base), Some(&next)).unwrap();
        assert_eq!(changed, vec!["README.md", "new.rs"]);
    }

    #[test]
    fn remote_branch_exists_sees_tracking_refs() {
        let (_tmp, repo) = fixture();
        assert!(!repo.remote_branch_exists("entire/sessions"));

        let head = repo.head_commit().unwrap();
        repo.set_ref("refs/remotes/origin/entire/sessions", &head)
            .unwrap();
        assert!(repo.remote_branch_exists("entire/sessions"));
        assert!(!repo.remote_branch_exists("entire/other"));
    }

    #[test]
    fn rebase_not_in_progress_normally() {
        let (_tmp, repo) = fixture();
        assert!(!repo.is_rebase_in_progress());
    }
}
