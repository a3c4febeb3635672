//! `entire rewind`: list and restore checkpoints.

use anyhow::{bail, Result};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use entire_checkpoint::rewind::{
    preview_rewind, restore_logs_only, rewind, rewind_points, RewindPoint,
};

use crate::strategy::ManualCommit;

const DEFAULT_LIMIT: usize = 20;

pub fn list() -> Result<()> {
    let engine = ManualCommit::open()?;
    let points = rewind_points(engine.repo(), engine.state_store(), DEFAULT_LIMIT)?;
    if points.is_empty() {
        println!("no rewind points for the current HEAD");
        return Ok(());
    }
    for point in points {
        let when = OffsetDateTime::from_unix_timestamp(point.seconds)
            .ok()
            .and_then(|t| t.format(&Rfc3339).ok())
            .unwrap_or_default();
        let kind = if point.is_logs_only {
            " [logs-only]"
        } else if point.is_task_checkpoint {
            " [task]"
        } else {
            ""
        };
        println!("{}  {when}{kind}  {}", &point.id[..7], point.message);
    }
    Ok(())
}

pub fn to(target: &str, yes: bool) -> Result<()> {
    let engine = ManualCommit::open()?;
    let points = rewind_points(engine.repo(), engine.state_store(), 200)?;
    let point = find_point(&points, target)?;

    if point.is_logs_only {
        let dest = restore_logs_only(engine.repo(), point)?;
        println!("restored session transcript to {}", dest.display());
        return Ok(());
    }

    let preview = preview_rewind(engine.repo(), engine.state_store(), point)?;
    if !yes {
        println!(
            "rewinding to {} ({}) will restore {} file(s) and delete {} file(s):",
            &point.id[..7],
            point.message,
            preview.files_to_restore.len(),
            preview.files_to_delete.len(),
        );
        for file in &preview.files_to_restore {
            println!("  restore: {file}");
        }
        for file in &preview.files_to_delete {
            println!("  delete:  {file}");
        }
        println!("\nuncommitted changes will be overwritten; re-run with --yes to proceed");
        return Ok(());
    }

    let summary = rewind(engine.repo(), engine.state_store(), point)?;
    println!(
        "restored {} file(s), deleted {} file(s) from checkpoint {}",
        summary.restored.len(),
        summary.deleted.len(),
        &point.id[..7],
    );
    Ok(())
}

fn find_point<'a>(points: &'a [RewindPoint], target: &str) -> Result<&'a RewindPoint> {
    let mut matches = points.iter().filter(|p| p.id.starts_with(target));
    match (matches.next(), matches.next()) {
        (Some(one), None) => Ok(one),
        (None, _) => bail!("no rewind point matches {target:?}; run `entire rewind list`"),
        (Some(_), Some(_)) => {
            bail!("{target:?} is ambiguous; give more characters of the checkpoint id")
        }
    }
}
