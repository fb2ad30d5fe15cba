use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tempfile::TempDir;

use super::env::apply_env_from;
use super::*;

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.undo_history_limit, 50);
    assert_eq!(config.approval_timeout_secs, 600);
    assert_eq!(config.branch_prefix, "swarm");
    assert_eq!(config.worktrees_dir, ".swarm/worktrees");
    assert_eq!(config.command_timeout_secs, 600);
    assert_eq!(config.state_file, ".swarm/session.json");
    assert_eq!(config.log_level, "info");
}

#[test]
fn test_parse_toml_sections() {
    let content = r#"
# comment
[undo]
history_limit = 10

[workflow]
approval_timeout_secs = 30  # half a minute

[swarm]
branch_prefix = "agents"
worktrees_dir = "tmp/wt"
command_timeout_secs = 5
state_file = "tmp/state.json"

[log]
level = "debug"
"#;
    let config = Config::parse_toml(content).unwrap();
    assert_eq!(config.undo_history_limit, 10);
    assert_eq!(config.approval_timeout_secs, 30);
    assert_eq!(config.branch_prefix, "agents");
    assert_eq!(config.worktrees_dir, "tmp/wt");
    assert_eq!(config.command_timeout_secs, 5);
    assert_eq!(config.state_file, "tmp/state.json");
    assert_eq!(config.log_level, "debug");
}

#[test]
fn test_parse_toml_ignores_unknown_keys() {
    let config = Config::parse_toml("[swarm]\ncolor = \"blue\"\n").unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_parse_toml_rejects_bad_numbers() {
    let err = Config::parse_toml("[undo]\nhistory_limit = lots\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(ref msg) if msg.contains("undo.history_limit")));
}

#[test]
fn test_parse_toml_keeps_hash_inside_strings() {
    let config = Config::parse_toml("[swarm]\nbranch_prefix = \"team#1\"\n").unwrap();
    assert_eq!(config.branch_prefix, "team#1");
}

#[test]
fn test_default_toml_round_trips() {
    let parsed = Config::parse_toml(&Config::default_toml()).unwrap();
    assert_eq!(parsed, Config::default());
}

#[test]
fn test_env_overrides_file_values() {
    let mut config = Config::parse_toml("[swarm]\nbranch_prefix = \"file\"\n").unwrap();
    apply_env_from(
        &mut config,
        &[
            ("SWARMFLOW_BRANCH_PREFIX", "env"),
            ("SWARMFLOW_APPROVAL_TIMEOUT", "42"),
            ("SWARMFLOW_COMMAND_TIMEOUT", "not-a-number"),
            ("SWARMFLOW_LOG", "warn"),
        ],
    );
    assert_eq!(config.branch_prefix, "env");
    assert_eq!(config.approval_timeout_secs, 42);
    assert_eq!(config.command_timeout_secs, 600);
    assert_eq!(config.log_level, "warn");
}

#[test]
fn test_cli_overrides_everything() {
    let cli = Cli::parse_from([
        "swarmflow",
        "--branch-prefix",
        "cli",
        "--command-timeout",
        "9",
        "status",
    ]);
    let mut config = Config::default();
    apply_env_from(&mut config, &[("SWARMFLOW_BRANCH_PREFIX", "env")]);
    config.apply_cli(&cli.overrides);
    assert_eq!(config.branch_prefix, "cli");
    assert_eq!(config.command_timeout_secs, 9);
    assert_eq!(cli.command, Command::Status { json: false });
}

#[test]
fn test_load_reads_project_config_file() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join(DEFAULT_CONFIG_FILE),
        "[swarm]\nworktrees_dir = \"wt\"\n",
    )
    .unwrap();

    let config = Config::load(temp.path(), &Overrides::default()).unwrap();
    assert_eq!(config.worktrees_dir, "wt");
    assert_eq!(config.harness_settings().worktrees_dir, PathBuf::from("wt"));
}

#[test]
fn test_load_missing_explicit_config_fails() {
    let temp = TempDir::new().unwrap();
    let overrides = Overrides {
        config: Some(temp.path().join("nope.toml")),
        ..Overrides::default()
    };
    let err = Config::load(temp.path(), &overrides).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_derived_settings() {
    let config = Config {
        approval_timeout_secs: 15,
        command_timeout_secs: 3,
        ..Config::default()
    };
    assert_eq!(config.approval_timeout(), Duration::from_secs(15));
    assert_eq!(config.harness_settings().command_timeout, Duration::from_secs(3));
    assert_eq!(config.orchestrator().approval_timeout(), Duration::from_secs(15));
    assert!(!config.undo_log().can_undo());
}

#[test]
fn test_add_task_parses_dependency_list() {
    let cli = Cli::parse_from([
        "swarmflow",
        "add-task",
        "Add expiry",
        "--test",
        "cargo test",
        "--depends-on",
        "t1,t2",
        "-w",
        "2",
    ]);
    assert_eq!(
        cli.command,
        Command::AddTask {
            title: "Add expiry".to_string(),
            test: Some("cargo test".to_string()),
            depends_on: vec!["t1".to_string(), "t2".to_string()],
            worker: Some(2),
        }
    );
}
