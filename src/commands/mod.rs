mod cleanup;
mod promote;
mod setup;
mod status;
mod tasks;

use std::path::PathBuf;

use anyhow::{Context, Result};

use swarmflow::config::Config;
use swarmflow::swarm::{SwarmHarness, SwarmSession};

pub use cleanup::cmd_cleanup;
pub use promote::cmd_promote;
pub use setup::cmd_setup;
pub use status::cmd_status;
pub use tasks::{cmd_add_task, cmd_merge, cmd_verify};

/// A project plus the harness configured for it.
pub struct Workspace {
    pub project: PathBuf,
    pub config: Config,
    pub harness: SwarmHarness,
}

impl Workspace {
    pub fn open(project: PathBuf, config: Config) -> Self {
        let harness = SwarmHarness::git(config.harness_settings());
        Self {
            project,
            config,
            harness,
        }
    }

    fn state_path(&self) -> PathBuf {
        self.config.state_path(&self.project)
    }

    fn load_session(&self) -> Result<SwarmSession> {
        SwarmSession::load(&self.state_path()).context("failed to load swarm session")
    }

    fn save_session(&self, session: &SwarmSession) -> Result<()> {
        session
            .save(&self.state_path())
            .context("failed to save swarm session")
    }
}
