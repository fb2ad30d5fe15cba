use anyhow::Result;

use swarmflow::swarm::SwarmTaskStatus;

use super::Workspace;

/// Show the swarm session.
pub fn cmd_status(ws: &Workspace, json: bool) -> Result<()> {
    let session = ws.load_session()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    }

    let ctx = &session.context;
    println!("Swarm: {}", session.task_name);
    println!("  Staging:  {}", ctx.staging_branch);
    println!("  Original: {}", ctx.original_branch);
    println!("  Workers:  {}", ctx.worker_count());

    println!("\nTasks:");
    if session.tasks.is_empty() {
        println!("  (no tasks)");
        return Ok(());
    }
    for task in &session.tasks {
        let worker = task
            .assigned_worker
            .map(|w| format!("w{}", w))
            .unwrap_or_else(|| "--".to_string());
        let deps = if task.depends_on.is_empty() {
            String::new()
        } else {
            format!(" (after {})", task.depends_on.join(", "))
        };
        println!("  {:<4} {:<12} {:<3} {}{}", task.id, task.status.as_str(), worker, task.title, deps);
    }

    let merged = session
        .tasks
        .iter()
        .filter(|t| t.status == SwarmTaskStatus::Merged)
        .count();
    println!("\n  Merged: {}/{}", merged, session.tasks.len());
    Ok(())
}
