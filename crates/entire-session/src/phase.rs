//! The session phase state machine.
//!
//! `transition` is a pure function from `(phase, event, context)` to
//! `(next phase, actions)`. Hooks feed events in; the strategy layer
//! applies the returned actions. Keeping it pure means every hook process
//! computes the same answer from the same persisted phase, which is what
//! lets independent processes cooperate through the state file alone.
//!
//! One override dominates the table: while a rebase is in progress, a
//! `GitCommit` event does nothing at all. Rebases replay user commits and
//! must not condense, migrate, or touch refs.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Active,
    ActiveCommitted,
    Ended,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Active => "active",
            Phase::ActiveCommitted => "active_committed",
            Phase::Ended => "ended",
        }
    }

    /// Parse a stored phase string. Unknown or empty values are treated
    /// as `Idle` so older state files keep working.
    pub fn from_str_lenient(s: &str) -> Self {
        match s {
            "active" => Phase::Active,
            "active_committed" => Phase::ActiveCommitted,
            "ended" => Phase::Ended,
            _ => Phase::Idle,
        }
    }

    /// A session in `Active` or `ActiveCommitted` has a turn in flight.
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Active | Phase::ActiveCommitted)
    }
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Idle
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Phase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Phase::from_str_lenient(&s))
    }
}

/// Events delivered by hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    TurnStart,
    TurnEnd,
    GitCommit,
    SessionStart,
    SessionStop,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Event::TurnStart => "TurnStart",
            Event::TurnEnd => "TurnEnd",
            Event::GitCommit => "GitCommit",
            Event::SessionStart => "SessionStart",
            Event::SessionStop => "SessionStop",
        };
        f.write_str(s)
    }
}

/// Actions for the strategy layer to apply after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Condense,
    CondenseIfFilesTouched,
    DiscardIfNoFiles,
    MigrateShadowBranch,
    WarnStaleSession,
    ClearEndedAt,
    UpdateLastInteraction,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Condense => "Condense",
            Action::CondenseIfFilesTouched => "CondenseIfFilesTouched",
            Action::DiscardIfNoFiles => "DiscardIfNoFiles",
            Action::MigrateShadowBranch => "MigrateShadowBranch",
            Action::WarnStaleSession => "WarnStaleSession",
            Action::ClearEndedAt => "ClearEndedAt",
            Action::UpdateLastInteraction => "UpdateLastInteraction",
        };
        f.write_str(s)
    }
}

/// External facts the transition depends on.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionContext {
    pub is_rebase_in_progress: bool,
    pub has_files_touched: bool,
}

/// Result of one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionResult {
    pub new_phase: Phase,
    pub actions: Vec<Action>,
}

/// Compute the next phase and actions for an event. Pure; callers apply
/// the actions and persist the phase.
pub fn transition(phase: Phase, event: Event, ctx: TransitionContext) -> TransitionResult {
    use Action::*;
    use Event::*;
    use Phase::*;

    // Rebase override: a GitCommit during rebase is a strict no-op.
    if ctx.is_rebase_in_progress && event == GitCommit {
        return TransitionResult {
            new_phase: phase,
            actions: vec![],
        };
    }

    let (new_phase, actions): (Phase, Vec<Action>) = match (phase, event) {
        (Idle, TurnStart) => (Active, vec![UpdateLastInteraction]),
        (Idle, GitCommit) => (Idle, vec![Condense, UpdateLastInteraction]),
        (Idle, SessionStop) => (Ended, vec![UpdateLastInteraction]),
        (Idle, _) => (Idle, vec![]),

        (Active, TurnStart) => (Active, vec![UpdateLastInteraction]),
        (Active, TurnEnd) => (Idle, vec![UpdateLastInteraction]),
        (Active, GitCommit) => (ActiveCommitted, vec![MigrateShadowBranch, UpdateLastInteraction]),
        (Active, SessionStart) => (Active, vec![WarnStaleSession]),
        (Active, SessionStop) => (Ended, vec![UpdateLastInteraction]),

        (ActiveCommitted, TurnStart) => (Active, vec![UpdateLastInteraction]),
        (ActiveCommitted, TurnEnd) => (Idle, vec![Condense, UpdateLastInteraction]),
        (ActiveCommitted, GitCommit) => {
            (ActiveCommitted, vec![MigrateShadowBranch, UpdateLastInteraction])
        }
        (ActiveCommitted, SessionStart) => (ActiveCommitted, vec![WarnStaleSession]),
        (ActiveCommitted, SessionStop) => (Ended, vec![UpdateLastInteraction]),

        (Ended, TurnStart) => (Active, vec![ClearEndedAt, UpdateLastInteraction]),
        (Ended, GitCommit) if ctx.has_files_touched => {
            (Ended, vec![CondenseIfFilesTouched, UpdateLastInteraction])
        }
        (Ended, GitCommit) => (Ended, vec![DiscardIfNoFiles, UpdateLastInteraction]),
        (Ended, SessionStart) => (Idle, vec![ClearEndedAt]),
        (Ended, _) => (Ended, vec![]),
    };

    TransitionResult { new_phase, actions }
}
