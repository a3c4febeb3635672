//! On-disk session state store.
//!
//! One file per session at `<git-common-dir>/entire-sessions/<id>.json`,
//! shared across worktrees. Writes go through a temp file in the same
//! directory and a rename, so a crashed hook can never leave a
//! half-written record. Last writer wins; sessions are single-writer by
//! contract and a second concurrent writer is surfaced through
//! `WarnStaleSession` instead of locking.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use entire_core::paths::SESSION_STATE_DIR;

use crate::error::{Result, SessionError};
use crate::state::State;

fn session_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap())
}

/// Reject ids that could escape the state directory.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id_re().is_match(session_id) {
        Ok(())
    } else {
        Err(SessionError::InvalidSessionId(session_id.to_string()))
    }
}

pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Store rooted in the git common dir, so all worktrees share it.
    pub fn new(common_dir: &Path) -> Self {
        Self {
            dir: common_dir.join(SESSION_STATE_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_file(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    /// Load a session. `Ok(None)` when it does not exist.
    pub fn load(&self, session_id: &str) -> Result<Option<State>> {
        let path = self.state_file(session_id)?;
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut state: State =
            serde_json::from_str(&data).map_err(|e| SessionError::CorruptSessionState {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        state.normalize_after_load();
        Ok(Some(state))
    }

    /// Save atomically: temp file in the state dir, then rename.
    pub fn save(&self, state: &State) -> Result<()> {
        let path = self.state_file(&state.session_id)?;
        std::fs::create_dir_all(&self.dir)?;
        let data = serde_json::to_string_pretty(state).map_err(|e| {
            SessionError::CorruptSessionState {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;
        let mut tmp = tempfile::Builder::new()
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        tmp.write_all(data.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Remove a session file; already-gone is not an error.
    pub fn delete(&self, session_id: &str) -> Result<()> {
        let path = self.state_file(session_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All loadable sessions. Corrupt files are skipped with a warning so
    /// one bad record cannot take down session listing.
    pub fn list(&self) -> Result<Vec<State>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut states = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(stem) {
                Ok(Some(state)) => states.push(state),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping unreadable session state");
                }
            }
        }
        Ok(states)
    }

    /// Id of the most recently interacted session, scoped to
    /// `worktree_path` when any session belongs to it (comparing resolved
    /// paths), otherwise repository-wide. Ties and missing interaction
    /// times fall back to `started_at`.
    pub fn find_most_recent(&self, worktree_path: Option<&Path>) -> Result<Option<String>> {
        let mut states = self.list()?;
        if states.is_empty() {
            return Ok(None);
        }

        if let Some(wt) = worktree_path {
            let resolved_wt = resolve(wt);
            let scoped: Vec<State> = states
                .iter()
                .filter(|s| resolve(Path::new(&s.worktree_path)) == resolved_wt)
                .cloned()
                .collect();
            if !scoped.is_empty() {
                states = scoped;
            }
        }

        let by_interaction = states
            .iter()
            .filter(|s| s.last_interaction_at.is_some())
            .max_by_key(|s| (s.last_interaction_at, s.started_at));
        if let Some(best) = by_interaction {
            return Ok(Some(best.session_id.clone()));
        }
        Ok(states
            .iter()
            .max_by_key(|s| s.started_at)
            .map(|s| s.session_id.clone()))
    }
}

fn resolve(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
