//! Three-way line attribution between agent and human.
//!
//! Compares three snapshots of every relevant file: base `B` (the prior
//! user commit), shadow tip `S` (agent work plus any intermediate user
//! edits), and committed content `C`. The changed lines split into
//! agent and human credit.
//!
//! Two corrections keep the split honest:
//! - lines the user added *between* checkpoints are captured in
//!   `PromptAttribution` rows and subtracted from the raw `B→S` delta, so
//!   they never count as agent work;
//! - removals after the last checkpoint are matched against the user's
//!   own accumulated additions first (per-file, LIFO), so a user editing
//!   lines they themselves just wrote does not deduct agent credit. The
//!   heuristic is conservative: it can only lower the agent percentage,
//!   never raise it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

use entire_session::PromptAttribution;

/// Path → full file content for one of the three snapshots.
pub type TreeContent = BTreeMap<String, String>;

/// The attribution split for one commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
    pub agent_lines: usize,
    pub human_added: usize,
    pub human_modified: usize,
    pub human_removed: usize,
    pub total_committed: usize,
    pub agent_percentage: f64,
}

/// Line counts from an LCS diff: (unchanged, added, removed).
pub fn diff_lines(old: &str, new: &str) -> (usize, usize, usize) {
    let diff = TextDiff::from_lines(old, new);
    let mut unchanged = 0;
    let mut added = 0;
    let mut removed = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Equal => unchanged += 1,
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
        }
    }
    (unchanged, added, removed)
}

/// Number of lines in a string; a trailing newline does not start one.
pub fn count_lines(content: &str) -> usize {
    if content.is_empty() {
        0
    } else {
        content.lines().count()
    }
}

/// LIFO heuristic: removals in a file are absorbed by the user's own
/// accumulated additions to that file before they touch agent lines.
fn estimate_user_self_modifications(
    accumulated_user_added: &BTreeMap<String, usize>,
    post_checkpoint_removed: &BTreeMap<String, usize>,
) -> usize {
    post_checkpoint_removed
        .iter()
        .map(|(file, removed)| {
            accumulated_user_added
                .get(file)
                .map_or(0, |added| (*removed).min(*added))
        })
        .sum()
}

/// Compute the attribution split at commit time.
///
/// `files_touched` is the union of agent-touched files across the shadow
/// chain; files the user edited between checkpoints enter through the
/// `prompt_attributions` per-file maps. Returns `None` when there is
/// nothing to account for.
pub fn calculate_with_accumulated(
    base: &TreeContent,
    shadow: &TreeContent,
    head: &TreeContent,
    files_touched: &[String],
    prompt_attributions: &[PromptAttribution],
) -> Option<AttributionResult> {
    // Accumulated per-file user additions from between-checkpoint edits.
    let mut accumulated: BTreeMap<String, usize> = BTreeMap::new();
    for attribution in prompt_attributions {
        for (file, added) in &attribution.user_added_per_file {
            *accumulated.entry(file.clone()).or_default() += added;
        }
    }

    // Candidate set: agent-touched files plus every file the user edited
    // between checkpoints (those may never appear in the shadow tree).
    let mut candidates: Vec<&String> = files_touched.iter().collect();
    for file in accumulated.keys() {
        if !files_touched.contains(file) {
            candidates.push(file);
        }
    }
    if candidates.is_empty() {
        return None;
    }

    let empty = String::new();
    let mut agent_added_raw = 0usize;
    let mut accumulated_in_shadow = 0usize;
    let mut user_added_raw = 0usize;
    let mut user_removed_raw = 0usize;
    let mut post_checkpoint_removed: BTreeMap<String, usize> = BTreeMap::new();

    for file in candidates {
        let base_content = base.get(file).unwrap_or(&empty);
        let head_content = head.get(file).unwrap_or(&empty);

        match shadow.get(file) {
            Some(shadow_content) => {
                // Agent-touched: B→S is agent work (minus accumulated
                // user lines, which the snapshot includes), S→C is
                // post-checkpoint user work.
                let (_, added, _) = diff_lines(base_content, shadow_content);
                agent_added_raw += added;
                accumulated_in_shadow += accumulated.get(file).copied().unwrap_or(0);

                let (_, added, removed) = diff_lines(shadow_content, head_content);
                user_added_raw += added;
                user_removed_raw += removed;
                if removed > 0 {
                    *post_checkpoint_removed.entry(file.clone()).or_default() += removed;
                }
            }
            None => {
                // Never in the shadow tree: everything in B→C is the
                // user's, and the accumulated lines are already part of
                // that diff; counting them again would double-book.
                let (_, added, removed) = diff_lines(base_content, head_content);
                user_added_raw += added.saturating_sub(accumulated.get(file).copied().unwrap_or(0));
                user_removed_raw += removed;
                if removed > 0 {
                    *post_checkpoint_removed.entry(file.clone()).or_default() += removed;
                }
            }
        }
    }

    let accumulated_total: usize = accumulated.values().sum();
    let total_agent_added = agent_added_raw.saturating_sub(accumulated_in_shadow);
    let total_user_added = accumulated_total + user_added_raw;
    let total_user_removed = user_removed_raw;

    let total_human_modified = total_user_added.min(total_user_removed);
    let user_self_modified =
        estimate_user_self_modifications(&accumulated, &post_checkpoint_removed);
    let human_modified_agent = total_human_modified.saturating_sub(user_self_modified);

    let pure_user_added = total_user_added - total_human_modified;
    let pure_user_removed = total_user_removed - total_human_modified;

    let agent_lines = total_agent_added.saturating_sub(pure_user_removed + human_modified_agent);
    let total_committed =
        (total_agent_added + pure_user_added).saturating_sub(pure_user_removed);

    let agent_percentage = if total_committed > 0 {
        agent_lines as f64 / total_committed as f64 * 100.0
    } else {
        0.0
    };

    Some(AttributionResult {
        agent_lines,
        human_added: pure_user_added,
        human_modified: total_human_modified,
        human_removed: pure_user_removed,
        total_committed,
        agent_percentage,
    })
}

/// Per-turn user-edit tally: diff the worktree against the last
/// checkpoint snapshot (falling back to base for files the shadow chain
/// never captured).
pub fn calculate_prompt_attribution(
    base: &TreeContent,
    last_checkpoint: &TreeContent,
    worktree: &TreeContent,
    checkpoint_number: usize,
) -> PromptAttribution {
    let empty = String::new();
    let mut files: Vec<&String> = last_checkpoint.keys().chain(worktree.keys()).collect();
    files.sort();
    files.dedup();

    let mut result = PromptAttribution {
        checkpoint_number,
        ..Default::default()
    };
    for file in files {
        let old = last_checkpoint
            .get(file)
            .or_else(|| base.get(file))
            .unwrap_or(&empty);
        let new = worktree.get(file).unwrap_or(&empty);
        if old == new {
            continue;
        }
        let (_, added, removed) = diff_lines(old, new);
        result.user_lines_added += added;
        result.user_lines_removed += removed;
        if added > 0 {
            result.user_added_per_file.insert(file.clone(), added);
        }
    }
    result
}
