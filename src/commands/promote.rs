use anyhow::{bail, Result};

use super::Workspace;

/// Reject the named tasks, then merge everything still accepted into the
/// original branch.
pub fn cmd_promote(ws: &Workspace, reject: &[String]) -> Result<()> {
    let mut session = ws.load_session()?;
    for task_id in reject {
        session.reject_task(task_id)?;
    }
    ws.save_session(&session)?;

    let accepted = session.accepted_task_ids();
    let ctx = &session.context;
    let result = ws.harness.selective_merge_to_main(
        &ctx.project_path,
        &ctx.staging_branch,
        &ctx.original_branch,
        &accepted,
        &session.tasks,
    );

    for id in &result.skipped {
        println!("  skipped {} (no merge commit recorded)", id);
    }
    if !result.success {
        bail!("{}", result.message);
    }
    println!("{}", result.message);
    if !result.picked.is_empty() {
        println!("  tasks: {}", result.picked.join(", "));
    }
    Ok(())
}
