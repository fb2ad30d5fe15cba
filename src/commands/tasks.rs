use anyhow::{bail, Result};

use super::Workspace;

pub fn cmd_add_task(
    ws: &Workspace,
    title: &str,
    test: Option<&str>,
    depends_on: &[String],
    worker: Option<usize>,
) -> Result<()> {
    let mut session = ws.load_session()?;
    let id = session.add_task(title, test, depends_on, worker)?;
    ws.save_session(&session)?;

    match worker {
        Some(w) => println!("Added {} (worker {}): {}", id, w, title.trim()),
        None => println!("Added {}: {}", id, title.trim()),
    }
    Ok(())
}

/// Run the task's test command. A failing run is saved before reporting.
pub fn cmd_verify(ws: &Workspace, task_id: &str) -> Result<()> {
    let mut session = ws.load_session()?;
    let report = ws.harness.verify_task(&mut session, task_id)?;
    ws.save_session(&session)?;

    if !report.stdout.trim().is_empty() {
        println!("{}", report.stdout.trim_end());
    }
    if !report.stderr.trim().is_empty() {
        eprintln!("{}", report.stderr.trim_end());
    }
    if report.interrupted {
        bail!("{} interrupted", task_id);
    }
    if report.timed_out {
        bail!(
            "{} timed out after {}s",
            task_id,
            ws.config.command_timeout_secs
        );
    }
    if !report.passed {
        bail!(
            "{} failed verification (exit code {})",
            task_id,
            report
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
    }
    println!("{} passed", task_id);
    Ok(())
}

pub fn cmd_merge(ws: &Workspace, task_id: &str, message: Option<&str>) -> Result<()> {
    let mut session = ws.load_session()?;
    let result = ws.harness.merge_task(&mut session, task_id, message)?;
    ws.save_session(&session)?;

    if !result.success {
        bail!("{}", result.message);
    }
    match result.commit_sha.as_deref() {
        Some(sha) => println!("{} ({})", result.message, short_sha(sha)),
        None => println!("{}", result.message),
    }
    Ok(())
}

fn short_sha(sha: &str) -> &str {
    sha.get(..10).unwrap_or(sha)
}
