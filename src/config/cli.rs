use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Swarmflow: parallel agent work in git worktrees with a staging branch.
#[derive(Parser, Debug, Clone)]
#[command(name = "swarmflow", version, about)]
pub struct Cli {
    /// Project repository (defaults to the current directory)
    #[arg(short = 'C', long, global = true)]
    pub project: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags that override the config file and environment.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Path to a config file (default: swarmflow.toml in the project)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Undo history limit
    #[arg(long, global = true)]
    pub undo_history_limit: Option<usize>,

    /// Approval timeout in seconds
    #[arg(long, global = true)]
    pub approval_timeout: Option<u64>,

    /// Staging branch prefix
    #[arg(long, global = true)]
    pub branch_prefix: Option<String>,

    /// Worktrees directory, relative to the project
    #[arg(long, global = true)]
    pub worktrees_dir: Option<String>,

    /// Test command timeout in seconds
    #[arg(long, global = true)]
    pub command_timeout: Option<u64>,

    /// Session file, relative to the project
    #[arg(long, global = true)]
    pub state_file: Option<String>,

    /// Log filter (e.g. "debug" or "swarmflow=trace")
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the staging branch and worker worktrees
    Setup {
        /// Task name used for the staging branch
        task: String,
        /// Number of workers
        #[arg(short, long, default_value_t = 2)]
        workers: usize,
    },
    /// Add a task to the swarm session
    AddTask {
        /// Task title
        title: String,
        /// Command that verifies the task in its worktree
        #[arg(short, long)]
        test: Option<String>,
        /// Task ids that must be merged first (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        depends_on: Vec<String>,
        /// Worker to assign (1-based)
        #[arg(short, long)]
        worker: Option<usize>,
    },
    /// Run a task's test command in its worktree
    Verify {
        /// Task id
        task_id: String,
    },
    /// Merge a task's worker branch into staging
    Merge {
        /// Task id
        task_id: String,
        /// Merge commit message
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Bring accepted work onto the original branch
    Promote {
        /// Task ids to leave out (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        reject: Vec<String>,
    },
    /// Remove worktrees and, unless kept, swarm branches
    Cleanup {
        /// Keep worker and staging branches
        #[arg(long)]
        keep_branches: bool,
    },
    /// Show the swarm session
    Status {
        /// Print the session as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a default swarmflow.toml
    InitConfig,
}
