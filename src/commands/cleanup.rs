use anyhow::{bail, Result};

use swarmflow::swarm::SwarmSession;

use super::Workspace;

/// Tear the swarm down. The session file is kept if anything failed so the
/// cleanup can be retried.
pub fn cmd_cleanup(ws: &Workspace, keep_branches: bool) -> Result<()> {
    let session = ws.load_session()?;
    println!("Cleaning up worktrees and branches...");
    let summary = ws.harness.cleanup_swarm(&session.context, !keep_branches);

    println!("  Removed {} worktree(s)", summary.removed_count());
    if !summary.deleted_branches.is_empty() {
        println!("  Deleted {} branch(es)", summary.deleted_branches.len());
    }
    if summary.has_errors() {
        for err in &summary.errors {
            eprintln!("  error: {}", err);
        }
        bail!("cleanup finished with {} error(s)", summary.errors.len());
    }

    SwarmSession::discard(&ws.state_path())?;
    Ok(())
}
