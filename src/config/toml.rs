use std::fs;
use std::path::Path;
use std::str::FromStr;

use super::types::{Config, ConfigError};

pub(super) fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_toml(&content)
}

pub(super) fn parse_toml(content: &str) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    let mut current_section = String::new();

    for line in content.lines() {
        let line = strip_comment(line).trim();
        if line.is_empty() {
            continue;
        }

        // Handle section headers like [swarm]
        if line.starts_with('[') && line.ends_with(']') {
            current_section = line[1..line.len() - 1].trim().to_string();
            continue;
        }

        let Some((key, value)) = parse_toml_line(line) else {
            return Err(ConfigError::Parse(format!("expected key = value: {}", line)));
        };
        let full_key = if current_section.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", current_section, key)
        };

        match full_key.as_str() {
            "undo.history_limit" => config.undo_history_limit = number(&full_key, value)?,
            "workflow.approval_timeout_secs" => {
                config.approval_timeout_secs = number(&full_key, value)?
            }
            "swarm.branch_prefix" => config.branch_prefix = string(value),
            "swarm.worktrees_dir" => config.worktrees_dir = string(value),
            "swarm.command_timeout_secs" => config.command_timeout_secs = number(&full_key, value)?,
            "swarm.state_file" => config.state_file = string(value),
            "log.level" => config.log_level = string(value),
            _ => {} // Ignore unknown keys
        }
    }

    Ok(config)
}

/// Parse a TOML line into key-value pair.
fn parse_toml_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

/// Drop a trailing `# comment` that is not inside a quoted string.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

fn string(value: &str) -> String {
    value.trim_matches('"').to_string()
}

fn number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Parse(format!("invalid {}: {}", key, value)))
}
