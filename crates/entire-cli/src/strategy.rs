//! The manual-commit strategy: glue between hooks, the phase machine,
//! and the checkpoint engine.
//!
//! Every entry point is one short-lived hook process. The only shared
//! state is the session record and the repository itself, so each
//! handler loads the session, feeds one event through the phase machine,
//! applies the returned actions, and persists. Internal failures are
//! logged and swallowed; the user's workflow is never blocked by the
//! engine's own problems.

use std::path::{Path, PathBuf};

use anyhow::Context;
use time::OffsetDateTime;

use entire_checkpoint::attribution::{calculate_prompt_attribution, TreeContent};
use entire_checkpoint::condense::{condense, CondenseOptions};
use entire_checkpoint::shadow::{migrate_and_persist_if_needed, shadow_ref_for};
use entire_checkpoint::{CheckpointError, CheckpointStore};
use entire_core::paths::{is_infrastructure_path, METADATA_BRANCH};
use entire_core::trailers;
use entire_core::transcript::read_delta;
use entire_git::Repository;
use entire_session::{Action, AgentKind, Event, State, StateStore, TransitionContext};

use crate::hook_input::HookInput;
use crate::settings::Settings;

/// What a hook hands back to the agent: optional stdout JSON and an
/// optional stderr warning. Hooks exit 0 either way; only user-visible
/// errors exit 1, and none of the manual-commit hooks produce those.
#[derive(Debug, Default, Clone)]
pub struct HookResult {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl HookResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            stdout: None,
            stderr: Some(message.into()),
        }
    }
}

pub struct ManualCommit {
    repo: Repository,
    state_store: StateStore,
    settings: Settings,
}

impl ManualCommit {
    pub fn open() -> anyhow::Result<Self> {
        let repo = Repository::open_from_cwd().context("opening repository")?;
        Ok(Self::with_repo(repo))
    }

    pub fn open_at(path: &Path) -> anyhow::Result<Self> {
        let repo = Repository::open(path).context("opening repository")?;
        Ok(Self::with_repo(repo))
    }

    fn with_repo(repo: Repository) -> Self {
        let state_store = StateStore::new(&repo.common_dir());
        let settings = Settings::load(repo.worktree_path());
        Self {
            repo,
            state_store,
            settings,
        }
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn state_store(&self) -> &StateStore {
        &self.state_store
    }

    fn enabled(&self) -> bool {
        self.settings.strategy == "manual-commit"
    }

    // ── Agent hooks ──

    /// `session-start`: create the session record and capture the
    /// untracked set rewind must preserve.
    pub fn session_start(&self, input: &HookInput, agent: AgentKind) -> HookResult {
        if !self.enabled() || input.session_id.is_empty() {
            return HookResult::empty();
        }
        match self.resolve_session(&input.session_id) {
            Some(mut state) => {
                let actions = state.apply_transition(
                    Event::SessionStart,
                    self.transition_context(&state),
                    OffsetDateTime::now_utc(),
                );
                let result = if actions.contains(&Action::WarnStaleSession) {
                    HookResult::warning(format!(
                        "[entire] session {} is still marked active; a second agent may be driving it",
                        state.session_id
                    ))
                } else {
                    HookResult::empty()
                };
                self.persist(&state);
                result
            }
            None => {
                if let Err(e) = self.create_session(input, agent) {
                    tracing::warn!(error = %e, "failed to create session");
                }
                HookResult::empty()
            }
        }
    }

    /// `user-prompt-submit`: tally user edits made since the last
    /// checkpoint, then start the turn.
    pub fn user_prompt_submit(&self, input: &HookInput, agent: AgentKind) -> HookResult {
        if !self.enabled() || input.session_id.is_empty() {
            return HookResult::empty();
        }
        let mut state = match self.resolve_session(&input.session_id) {
            Some(state) => state,
            None => match self.create_session(input, agent) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to create session at prompt submit");
                    return HookResult::empty();
                }
            },
        };

        if let Err(e) = self.record_prompt_attribution(&mut state) {
            tracing::warn!(error = %e, "failed to record prompt attribution");
        }

        state.apply_transition(
            Event::TurnStart,
            self.transition_context(&state),
            OffsetDateTime::now_utc(),
        );
        self.persist(&state);
        HookResult::empty()
    }

    /// `post-tool-use`: a finished sub-agent task gets its own
    /// checkpoint.
    pub fn post_tool_use(&self, input: &HookInput) -> HookResult {
        if !self.enabled() || input.tool_name != "Task" || input.tool_use_id.is_empty() {
            return HookResult::empty();
        }
        let Some(mut state) = self.resolve_session(&input.session_id) else {
            return HookResult::empty();
        };
        let store = CheckpointStore::new(&self.repo, &self.state_store);
        match store.save_task_checkpoint(
            &mut state,
            &input.tool_use_id,
            Path::new(&input.transcript_path),
        ) {
            Ok(_) => {}
            Err(CheckpointError::RebaseInProgress) => {
                tracing::debug!("rebase in progress, deferring task checkpoint");
            }
            Err(e) => tracing::warn!(error = %e, "failed to save task checkpoint"),
        }
        HookResult::empty()
    }

    /// `stop`: save the turn's checkpoint, then end the turn. A turn
    /// that saw a mid-turn commit condenses now.
    pub fn stop(&self, input: &HookInput) -> HookResult {
        if !self.enabled() || input.session_id.is_empty() {
            return HookResult::empty();
        }
        let Some(mut state) = self.resolve_session(&input.session_id) else {
            return HookResult::empty();
        };

        let store = CheckpointStore::new(&self.repo, &self.state_store);
        match store.save_changes(&mut state, Path::new(&input.transcript_path)) {
            Ok(_) => {}
            Err(CheckpointError::RebaseInProgress) => {
                tracing::debug!("rebase in progress, deferring checkpoint");
            }
            Err(e) => tracing::warn!(error = %e, "failed to save checkpoint"),
        }

        let actions = state.apply_transition(
            Event::TurnEnd,
            self.transition_context(&state),
            OffsetDateTime::now_utc(),
        );
        let mut result = HookResult::empty();
        for action in actions {
            if action == Action::Condense {
                if let Err(e) = condense(
                    &self.repo,
                    &self.state_store,
                    &mut state,
                    &CondenseOptions::default(),
                ) {
                    tracing::warn!(error = %e, "failed to condense after committed turn");
                    result = HookResult::warning(
                        "[entire] failed to condense session history; will retry at next commit"
                            .to_string(),
                    );
                }
            }
        }
        self.persist(&state);
        result
    }

    /// `session-end`: the agent session is over. The record stays until
    /// condensation or explicit cleanup purges it.
    pub fn session_stop(&self, input: &HookInput) -> HookResult {
        if !self.enabled() || input.session_id.is_empty() {
            return HookResult::empty();
        }
        let Some(mut state) = self.resolve_session(&input.session_id) else {
            return HookResult::empty();
        };
        state.apply_transition(
            Event::SessionStop,
            self.transition_context(&state),
            OffsetDateTime::now_utc(),
        );
        self.persist(&state);
        HookResult::empty()
    }

    // ── Git hooks ──

    /// `prepare-commit-msg`: run the `GitCommit` event, condense when the
    /// phase machine says so, and inject the `Entire-Checkpoint` trailer.
    /// Amends reuse the reserved id instead of minting a new one.
    pub fn prepare_commit_msg(&self, msg_file: &Path, source: Option<&str>) -> anyhow::Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        match source {
            // Merge and squash commits belong to git, not to a turn.
            Some("merge") | Some("squash") => return Ok(()),
            // An amend: keep an existing trailer, restore a lost one.
            Some("commit") => return self.restore_trailer_if_missing(msg_file),
            _ => {}
        }

        let Some(mut state) = self.most_recent_session() else {
            return Ok(());
        };

        let ctx = self.transition_context(&state);
        let actions =
            state.apply_transition(Event::GitCommit, ctx, OffsetDateTime::now_utc());

        let mut checkpoint_id = None;
        for action in actions {
            match action {
                Action::MigrateShadowBranch => {
                    migrate_and_persist_if_needed(&self.repo, &self.state_store, &mut state)?;
                }
                Action::Condense | Action::CondenseIfFilesTouched => {
                    let outcome = condense(
                        &self.repo,
                        &self.state_store,
                        &mut state,
                        &CondenseOptions::default(),
                    )?;
                    checkpoint_id = outcome.map(|o| o.checkpoint_id);
                }
                Action::DiscardIfNoFiles => {
                    condense(
                        &self.repo,
                        &self.state_store,
                        &mut state,
                        &CondenseOptions {
                            discard_if_no_files: true,
                            summarizer: None,
                        },
                    )?;
                }
                _ => {}
            }
        }
        self.persist(&state);

        if let Some(id) = checkpoint_id {
            let content = std::fs::read_to_string(msg_file)
                .with_context(|| format!("reading {}", msg_file.display()))?;
            if trailers::parse_checkpoint(&content).is_none() {
                let updated =
                    trailers::append_trailer(&content, trailers::CHECKPOINT_TRAILER, id.as_str());
                std::fs::write(msg_file, updated)
                    .with_context(|| format!("writing {}", msg_file.display()))?;
            }
        }
        Ok(())
    }

    /// `commit-msg`: idempotent re-injection when the trailer went
    /// missing between prepare-commit-msg and validation.
    pub fn commit_msg(&self, msg_file: &Path) -> anyhow::Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        self.restore_trailer_if_missing(msg_file)
    }

    fn restore_trailer_if_missing(&self, msg_file: &Path) -> anyhow::Result<()> {
        let content = std::fs::read_to_string(msg_file)
            .with_context(|| format!("reading {}", msg_file.display()))?;
        if trailers::parse_checkpoint(&content).is_some() {
            return Ok(());
        }
        let pending = self
            .most_recent_session()
            .and_then(|state| state.pending_checkpoint_id)
            .and_then(|id| entire_core::CheckpointId::parse(&id).ok());
        if let Some(id) = pending {
            let updated =
                trailers::append_trailer(&content, trailers::CHECKPOINT_TRAILER, id.as_str());
            std::fs::write(msg_file, updated)
                .with_context(|| format!("writing {}", msg_file.display()))?;
        }
        Ok(())
    }

    /// `post-commit`: the user commit landed. If it carries the trailer
    /// the last condensation reserved, the shadow chain is fully
    /// recorded and the ref can go. An aborted or trailer-less commit
    /// leaves the shadow untouched.
    pub fn post_commit(&self) -> anyhow::Result<()> {
        if !self.enabled() || self.repo.is_rebase_in_progress() {
            return Ok(());
        }
        let Some(state) = self.most_recent_session() else {
            return Ok(());
        };
        let Some(pending) = &state.pending_checkpoint_id else {
            return Ok(());
        };

        let head = self.repo.head_commit()?;
        let info = self.repo.commit_info(&head)?;
        let committed = trailers::parse_checkpoint(&info.message);
        if committed.map(|id| id.as_str().to_string()) == Some(pending.clone()) {
            let shadow_ref = shadow_ref_for(&state);
            self.repo.delete_ref(&shadow_ref)?;
            tracing::info!(shadow_ref = %shadow_ref, checkpoint_id = %pending, "deleted shadow ref after condensed commit");
        }
        Ok(())
    }

    /// `pre-push`: carry the metadata branch along, unless disabled.
    pub fn pre_push(&self, remote: &str) -> anyhow::Result<()> {
        if !self.enabled() || !self.settings.push_metadata {
            return Ok(());
        }
        let meta_ref = entire_core::paths::metadata_ref_name();
        let Some(tip) = self.repo.ref_target(&meta_ref)? else {
            return Ok(());
        };
        // pre-push fires on every push; when the remote already has the
        // branch and its tracking ref matches our tip there is nothing to
        // carry along, so skip the extra subprocess.
        if remote == "origin" && self.repo.remote_branch_exists(METADATA_BRANCH) {
            let tracking = format!("refs/remotes/origin/{METADATA_BRANCH}");
            if self.repo.ref_target(&tracking)?.as_deref() == Some(tip.as_str()) {
                tracing::debug!(branch = METADATA_BRANCH, "metadata branch already up to date");
                return Ok(());
            }
        }
        let refspec = format!("{meta_ref}:{meta_ref}");
        let status = std::process::Command::new("git")
            .arg("push")
            .arg(remote)
            .arg(&refspec)
            .current_dir(self.repo.worktree_path())
            .status();
        match status {
            Ok(s) if s.success() => {
                tracing::info!(remote, branch = METADATA_BRANCH, "pushed metadata branch");
            }
            Ok(s) => {
                tracing::warn!(remote, code = ?s.code(), "failed to push metadata branch");
            }
            Err(e) => {
                tracing::warn!(remote, error = %e, "failed to run git push for metadata branch");
            }
        }
        Ok(())
    }

    // ── Internals ──

    fn transition_context(&self, state: &State) -> TransitionContext {
        TransitionContext {
            is_rebase_in_progress: self.repo.is_rebase_in_progress(),
            has_files_touched: self.has_files_touched(state),
        }
    }

    fn has_files_touched(&self, state: &State) -> bool {
        let shadow_ref = shadow_ref_for(state);
        let Ok(Some(tip)) = self.repo.ref_target(&shadow_ref) else {
            return false;
        };
        if tip == state.base_commit {
            return false;
        }
        self.repo
            .changed_files_between(Some(&state.base_commit), Some(&tip))
            .map(|files| files.iter().any(|f| !is_infrastructure_path(f)))
            .unwrap_or(false)
    }

    /// Find the session owning an agent-side id, across the date prefix.
    fn resolve_session(&self, agent_session_id: &str) -> Option<State> {
        let states = match self.state_store.list() {
            Ok(states) => states,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list sessions");
                return None;
            }
        };
        states
            .into_iter()
            .filter(|s| entire_core::paths::model_session_id(&s.session_id) == agent_session_id)
            .max_by_key(|s| (s.last_interaction_at, s.started_at))
    }

    fn most_recent_session(&self) -> Option<State> {
        let id = self
            .state_store
            .find_most_recent(Some(self.repo.worktree_path()))
            .ok()??;
        self.state_store.load(&id).ok()?
    }

    fn create_session(&self, input: &HookInput, agent: AgentKind) -> anyhow::Result<State> {
        let now = OffsetDateTime::now_utc();
        let session_id = format!(
            "{:04}-{:02}-{:02}-{}",
            now.year(),
            now.month() as u8,
            now.day(),
            input.session_id
        );
        let head = self.repo.head_commit().context("reading HEAD")?;
        let mut state = State::new(
            session_id,
            agent,
            head,
            self.repo.worktree_path().to_string_lossy().into_owned(),
            self.repo.worktree_id(),
            now,
        );
        state.untracked_files_at_start = self.repo.untracked_files()?;
        // A resumed conversation already has transcript content that
        // belongs to earlier sessions; start the cursor past it.
        if !input.transcript_path.is_empty() {
            match read_delta(Path::new(&input.transcript_path), 0) {
                Ok(delta) => state.checkpoint_transcript_start = delta.next_start_line,
                Err(e) => {
                    tracing::warn!(error = %e, "could not size existing transcript");
                }
            }
        }
        self.state_store.save(&state)?;
        tracing::info!(session_id = %state.session_id, base = %state.base_commit, "created session");
        Ok(state)
    }

    /// Diff the worktree against the shadow tip and append a per-turn
    /// user-edit tally. Runs before the turn starts, so everything that
    /// changed since the last checkpoint is the user's.
    fn record_prompt_attribution(&self, state: &mut State) -> anyhow::Result<()> {
        let shadow_ref = shadow_ref_for(state);
        let Some(tip) = self.repo.ref_target(&shadow_ref)? else {
            return Ok(());
        };
        if tip == state.base_commit {
            return Ok(());
        }

        let mut candidates = self
            .repo
            .changed_files_between(Some(&state.base_commit), Some(&tip))?;
        for path in self.repo.changed_paths()? {
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }
        candidates.retain(|p| !is_infrastructure_path(p));
        if candidates.is_empty() {
            return Ok(());
        }

        let mut base = TreeContent::new();
        let mut checkpoint = TreeContent::new();
        let mut worktree = TreeContent::new();
        let root: PathBuf = self.repo.worktree_path().to_path_buf();
        for file in &candidates {
            if let Some(bytes) = self.repo.read_blob(&state.base_commit, file)? {
                base.insert(file.clone(), String::from_utf8_lossy(&bytes).into_owned());
            }
            if let Some(bytes) = self.repo.read_blob(&tip, file)? {
                checkpoint.insert(file.clone(), String::from_utf8_lossy(&bytes).into_owned());
            }
            if let Ok(bytes) = std::fs::read(root.join(file)) {
                worktree.insert(file.clone(), String::from_utf8_lossy(&bytes).into_owned());
            }
        }

        let attribution =
            calculate_prompt_attribution(&base, &checkpoint, &worktree, state.step_count);
        if attribution.user_lines_added > 0 || attribution.user_lines_removed > 0 {
            tracing::debug!(
                added = attribution.user_lines_added,
                removed = attribution.user_lines_removed,
                "recorded user edits since last checkpoint"
            );
            state.prompt_attributions.push(attribution);
        }
        Ok(())
    }

    fn persist(&self, state: &State) {
        if let Err(e) = self.state_store.save(state) {
            tracing::warn!(session_id = %state.session_id, error = %e, "failed to save session state");
        }
    }
}
