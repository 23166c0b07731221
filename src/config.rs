use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::discovery::{short_branch, CloneMethod};

/// Configuration file name, looked up in the current directory by default
pub const DEFAULT_CONFIG_FILE: &str = ".github-orga-sync.toml";

/// Example configuration written by `init`
pub const EXAMPLE_CONFIG: &str = r#"[github]
# Name of your GitHub organization.
orga = "your-github-orga"

# A personal API access token.
# Needs at least "repo" and "admin:repo_hook -> read:repo_hook" permissions.
#
# https://docs.github.com/en/github/authenticating-to-github/creating-a-personal-access-token
token = "github-api-token"

# Clone new repositories via "ssh" (default) or "https".
# protocol = "ssh"

[branch]
# Branch to pull.
pull = "master"

# Branch to push.
push = "feedback"

[sync]
# Abort a single git invocation or API request after this many seconds.
# timeout = 300

# Refuse pulls that cannot be fast-forwarded.
# fast_forward_only = false
"#;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse configuration {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Configuration key \"{0}\" is missing")]
    MissingKey(&'static str),

    #[error("{} exists but is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("Cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration file contents; every key may still be missing
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// GitHub organization and credentials
    #[serde(default)]
    pub github: GitHubConfig,

    /// Branches to pull and push
    #[serde(default)]
    pub branch: BranchConfig,

    /// Subprocess behaviour
    #[serde(default)]
    pub sync: SyncConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct GitHubConfig {
    /// Organization login
    pub orga: Option<String>,

    /// Personal access token
    pub token: Option<String>,

    /// Clone URL flavour
    #[serde(default)]
    pub protocol: CloneMethod,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct BranchConfig {
    pub pull: Option<String>,
    pub push: Option<String>,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SyncConfig {
    /// Timeout for git operations and API requests in seconds
    pub timeout: Option<u64>,

    /// Fast-forward only pulls
    #[serde(default)]
    pub fast_forward_only: bool,
}

/// Validated configuration handed to the lister and the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub organization: String,
    pub token: String,
    pub pull_branch: String,
    pub push_branch: String,
    pub protocol: CloneMethod,
    pub timeout: Option<Duration>,
    pub fast_forward_only: bool,
}

impl Config {
    /// Load configuration from a specific file and apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override file values with `GITHUB_ORGA`, `GITHUB_TOKEN`, `BRANCH_PULL`
    /// and `BRANCH_PUSH` where `lookup` yields a value
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let slots = [
            ("GITHUB_ORGA", &mut self.github.orga),
            ("GITHUB_TOKEN", &mut self.github.token),
            ("BRANCH_PULL", &mut self.branch.pull),
            ("BRANCH_PUSH", &mut self.branch.push),
        ];

        for (variable, slot) in slots {
            if let Some(value) = lookup(variable).filter(|v| !v.is_empty()) {
                *slot = Some(value);
            }
        }
    }

    /// Check that every required key is present and non-empty
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        Ok(Settings {
            organization: required("github.orga", &self.github.orga)?,
            token: required("github.token", &self.github.token)?,
            pull_branch: branch("branch.pull", &self.branch.pull)?,
            push_branch: branch("branch.push", &self.branch.push)?,
            protocol: self.github.protocol,
            timeout: self.sync.timeout.filter(|s| *s > 0).map(Duration::from_secs),
            fast_forward_only: self.sync.fast_forward_only,
        })
    }
}

fn required(key: &'static str, value: &Option<String>) -> Result<String, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ConfigError::MissingKey(key)),
    }
}

fn branch(key: &'static str, value: &Option<String>) -> Result<String, ConfigError> {
    let value = required(key, value)?;
    match short_branch(&value) {
        "" => Err(ConfigError::MissingKey(key)),
        short => Ok(short.to_string()),
    }
}

/// Outcome of preparing a directory with [`init_directory`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    pub config_path: PathBuf,
    /// False if a configuration already existed and was left untouched
    pub created: bool,
}

/// Create `directory` if needed and place an example configuration in it
pub fn init_directory(directory: &Path) -> Result<InitOutcome, ConfigError> {
    match std::fs::metadata(directory) {
        Ok(metadata) if metadata.is_dir() => {
            tracing::debug!(directory = %directory.display(), "Directory does already exist");
        }
        Ok(_) => return Err(ConfigError::NotADirectory(directory.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(directory).map_err(|source| ConfigError::Write {
                path: directory.to_path_buf(),
                source,
            })?;
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: directory.to_path_buf(),
                source,
            })
        }
    }

    let config_path = directory.join(DEFAULT_CONFIG_FILE);
    if config_path.exists() {
        return Ok(InitOutcome {
            config_path,
            created: false,
        });
    }

    std::fs::write(&config_path, EXAMPLE_CONFIG).map_err(|source| ConfigError::Write {
        path: config_path.clone(),
        source,
    })?;

    Ok(InitOutcome {
        config_path,
        created: true,
    })
}

/// Expand `~` and environment variables in a user supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => path.to_path_buf(),
    }
}
