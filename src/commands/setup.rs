use anyhow::{bail, Context, Result};
use tracing::warn;

use swarmflow::swarm::SwarmSession;

use super::Workspace;

/// Create the staging branch and worktrees, then persist the session.
pub fn cmd_setup(ws: &Workspace, task: &str, workers: usize) -> Result<()> {
    let state_path = ws.state_path();
    if state_path.exists() {
        bail!(
            "a swarm session already exists at {}; run cleanup first",
            state_path.display()
        );
    }

    let ctx = ws
        .harness
        .setup_swarm(&ws.project, task, workers)
        .context("swarm setup failed")?;

    let session = SwarmSession::new(task, ctx);
    if let Err(e) = ws.save_session(&session) {
        warn!(error = %e, "session could not be saved; removing swarm");
        let summary = ws.harness.cleanup_swarm(&session.context, true);
        for err in &summary.errors {
            warn!(error = %err, "cleanup after failed setup");
        }
        return Err(e);
    }

    let ctx = &session.context;
    println!("Swarm ready on {} (from {})", ctx.staging_branch, ctx.original_branch);
    for (index, (branch, path)) in ctx.worker_branches.iter().zip(&ctx.worker_paths).enumerate() {
        println!("  worker {}: {} at {}", index + 1, branch, path.display());
    }
    Ok(())
}
