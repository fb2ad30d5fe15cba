use super::types::Config;

/// Apply `SWARMFLOW_*` variables. Unparseable numbers are ignored.
pub(super) fn apply_env(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(n) = var("SWARMFLOW_UNDO_HISTORY_LIMIT").and_then(|v| v.parse().ok()) {
        config.undo_history_limit = n;
    }
    if let Some(n) = var("SWARMFLOW_APPROVAL_TIMEOUT").and_then(|v| v.parse().ok()) {
        config.approval_timeout_secs = n;
    }
    if let Some(val) = var("SWARMFLOW_BRANCH_PREFIX") {
        config.branch_prefix = val;
    }
    if let Some(val) = var("SWARMFLOW_WORKTREES_DIR") {
        config.worktrees_dir = val;
    }
    if let Some(n) = var("SWARMFLOW_COMMAND_TIMEOUT").and_then(|v| v.parse().ok()) {
        config.command_timeout_secs = n;
    }
    if let Some(val) = var("SWARMFLOW_STATE_FILE") {
        config.state_file = val;
    }
    if let Some(val) = var("SWARMFLOW_LOG") {
        config.log_level = val;
    }
}

#[cfg(test)]
pub(super) fn apply_env_from(config: &mut Config, vars: &[(&str, &str)]) {
    apply_env(config, |key| {
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    });
}
