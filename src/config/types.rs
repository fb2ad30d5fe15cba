use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use super::cli::Overrides;
use super::{env, toml};
use crate::orchestrator::Orchestrator;
use crate::swarm::{
    HarnessSettings, DEFAULT_BRANCH_PREFIX, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_WORKTREES_DIR,
};
use crate::undo::{UndoLog, DEFAULT_HISTORY_LIMIT};

/// Default approval timeout in seconds (10 minutes).
pub const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 600;

/// Config file looked up in the project directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "swarmflow.toml";

/// Swarmflow configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Undo and redo stack bound.
    pub undo_history_limit: usize,
    /// Seconds a phase may wait for approval before timing out.
    pub approval_timeout_secs: u64,
    /// First path segment of every staging branch.
    pub branch_prefix: String,
    /// Worktrees directory, relative to the project.
    pub worktrees_dir: String,
    /// Limit for test commands run by `verify`.
    pub command_timeout_secs: u64,
    /// Session file, relative to the project.
    pub state_file: String,
    /// Default tracing filter.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            undo_history_limit: DEFAULT_HISTORY_LIMIT,
            approval_timeout_secs: DEFAULT_APPROVAL_TIMEOUT_SECS,
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            worktrees_dir: DEFAULT_WORKTREES_DIR.to_string(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            state_file: ".swarm/session.json".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources with proper precedence.
    ///
    /// Precedence: CLI args > env vars > config file > defaults. An explicit
    /// `--config` path must exist; the default `swarmflow.toml` in `project`
    /// is optional.
    pub fn load(project: &Path, overrides: &Overrides) -> Result<Self, ConfigError> {
        let mut config = match &overrides.config {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let default_path = project.join(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load_from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env();
        config.apply_cli(overrides);
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        toml::load_from_file(path)
    }

    /// Parse TOML content into configuration.
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        toml::parse_toml(content)
    }

    fn apply_env(&mut self) {
        env::apply_env(self, |key| std::env::var(key).ok());
    }

    /// Apply CLI arguments.
    pub(super) fn apply_cli(&mut self, args: &Overrides) {
        if let Some(n) = args.undo_history_limit {
            self.undo_history_limit = n;
        }
        if let Some(n) = args.approval_timeout {
            self.approval_timeout_secs = n;
        }
        if let Some(ref prefix) = args.branch_prefix {
            self.branch_prefix = prefix.clone();
        }
        if let Some(ref dir) = args.worktrees_dir {
            self.worktrees_dir = dir.clone();
        }
        if let Some(n) = args.command_timeout {
            self.command_timeout_secs = n;
        }
        if let Some(ref path) = args.state_file {
            self.state_file = path.clone();
        }
        if let Some(ref level) = args.log_level {
            self.log_level = level.clone();
        }
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn harness_settings(&self) -> HarnessSettings {
        HarnessSettings {
            branch_prefix: self.branch_prefix.clone(),
            worktrees_dir: PathBuf::from(&self.worktrees_dir),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }

    /// Session file location for a project.
    pub fn state_path(&self, project: &Path) -> PathBuf {
        project.join(&self.state_file)
    }

    pub fn undo_log(&self) -> UndoLog {
        UndoLog::new(self.undo_history_limit)
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.approval_timeout())
    }

    /// Generate default swarmflow.toml content.
    pub fn default_toml() -> String {
        let d = Self::default();
        format!(
            r#"# Swarmflow configuration

[undo]
history_limit = {}

[workflow]
approval_timeout_secs = {}  # seconds (10 minutes)

[swarm]
branch_prefix = "{}"
worktrees_dir = "{}"
command_timeout_secs = {}
state_file = "{}"

[log]
level = "{}"
"#,
            d.undo_history_limit,
            d.approval_timeout_secs,
            d.branch_prefix,
            d.worktrees_dir,
            d.command_timeout_secs,
            d.state_file,
            d.log_level
        )
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("config parse error: {0}")]
    Parse(String),
}
