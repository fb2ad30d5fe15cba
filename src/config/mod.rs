//! Configuration loading for swarmflow.
//!
//! Supports swarmflow.toml, CLI flags, and environment variables.
//! Precedence (highest to lowest): CLI flags > env vars > config file > defaults.

mod cli;
mod env;
mod toml;
mod types;

pub use cli::{Cli, Command, Overrides};
pub use types::{Config, ConfigError, DEFAULT_APPROVAL_TIMEOUT_SECS, DEFAULT_CONFIG_FILE};

#[cfg(test)]
mod tests;
