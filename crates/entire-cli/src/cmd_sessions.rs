//! `entire sessions`: list known sessions.

use anyhow::Result;
use time::format_description::well_known::Rfc3339;

use crate::strategy::ManualCommit;

pub fn run(json: bool) -> Result<()> {
    let engine = ManualCommit::open()?;
    let mut states = engine.state_store().list()?;
    states.sort_by_key(|s| std::cmp::Reverse(s.last_interaction_at.unwrap_or(s.started_at)));

    if json {
        println!("{}", serde_json::to_string_pretty(&states)?);
        return Ok(());
    }

    if states.is_empty() {
        println!("no sessions");
        return Ok(());
    }

    for state in states {
        let last = state
            .last_interaction_at
            .unwrap_or(state.started_at)
            .format(&Rfc3339)
            .unwrap_or_default();
        let base = &state.base_commit[..7.min(state.base_commit.len())];
        println!(
            "{}  {:>16}  base {}  {} checkpoint(s)  {}  {}",
            state.session_id,
            state.phase.to_string(),
            base,
            state.step_count,
            state.agent_type.name(),
            last,
        );
    }
    Ok(())
}
