//! `entire cleanup`: remove session state and shadow refs.

use anyhow::{bail, Result};

use entire_checkpoint::shadow::shadow_ref_for;

use crate::strategy::ManualCommit;

pub fn run(session_id: Option<&str>, all: bool) -> Result<()> {
    let engine = ManualCommit::open()?;
    let store = engine.state_store();

    let targets = match (session_id, all) {
        (Some(id), false) => match store.load(id)? {
            Some(state) => vec![state],
            None => bail!("session {id:?} not found"),
        },
        (None, true) => store.list()?,
        (None, false) => bail!("give a session id or --all"),
        (Some(_), true) => bail!("--all and a session id are mutually exclusive"),
    };

    let mut removed = 0;
    for state in targets {
        let shadow_ref = shadow_ref_for(&state);
        if let Err(e) = engine.repo().delete_ref(&shadow_ref) {
            tracing::warn!(shadow_ref = %shadow_ref, error = %e, "failed to delete shadow ref");
        }
        store.delete(&state.session_id)?;
        println!("removed {}", state.session_id);
        removed += 1;
    }
    if removed == 0 {
        println!("nothing to clean up");
    }
    Ok(())
}
