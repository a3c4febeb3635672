//! `entire status`: one-screen summary of engine state in this repo.

use anyhow::Result;

use entire_checkpoint::condense::{list_checkpoint_infos, metadata_tip};
use entire_core::paths::METADATA_BRANCH;

use crate::strategy::ManualCommit;

pub fn run() -> Result<()> {
    let engine = ManualCommit::open()?;
    let repo = engine.repo();

    let head = repo.head_commit()?;
    let branch = repo
        .current_branch()
        .unwrap_or_else(|| "(detached)".to_string());
    println!("HEAD       {} ({branch})", &head[..7]);

    let states = engine.state_store().list()?;
    let active = states.iter().filter(|s| s.phase.is_active()).count();
    println!("sessions   {} total, {active} active", states.len());

    match metadata_tip(repo)? {
        Some(tip) => {
            let entries = list_checkpoint_infos(repo)?.len();
            println!("metadata   {METADATA_BRANCH} @ {} ({entries} entries)", &tip[..7]);
        }
        None => println!("metadata   {METADATA_BRANCH} (not created yet)"),
    }

    if repo.is_rebase_in_progress() {
        println!("rebase     in progress (checkpointing paused)");
    }
    Ok(())
}
