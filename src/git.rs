use async_trait::async_trait;
use regex::Regex;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Failures of a single working copy operation
#[derive(Error, Debug)]
pub enum GitError {
    #[error("{} is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    #[error("{} exists but is not a git repository", path.display())]
    NotARepository { path: PathBuf },

    #[error("`{command}` failed ({status}): {output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },

    #[error("git client `{program}` cannot be found")]
    ClientUnavailable { program: String },

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` did not finish within {}s", after.as_secs())]
    TimedOut { command: String, after: Duration },

    #[error("`{command}` printed no object id: {output:?}")]
    InvalidRevision { command: String, output: String },

    #[error("cannot inspect {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Local state of a repository's working directory, inferred on every call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Nothing exists under the repository name
    Missing,
    /// A directory carrying git metadata
    WorkingCopy,
    /// A directory without git metadata
    NotARepository,
    /// A file (or anything else that is not a directory)
    NotADirectory,
}

/// Operations the reconciliation engine needs from a working copy.
///
/// Every method addresses a working copy by repository name; implementations
/// decide where that name lives.
#[async_trait]
pub trait WorkingCopy: Send + Sync {
    /// Where `name` points to, locally
    async fn presence(&self, name: &str) -> Result<Presence, GitError>;

    /// Clone `url` into a new working copy called `name`
    async fn clone_into(&self, name: &str, url: &str) -> Result<(), GitError>;

    /// Switch the working tree of `name` to `branch`
    async fn checkout(&self, name: &str, branch: &str) -> Result<(), GitError>;

    /// Resolve `reference` (a branch or `HEAD`) to its object id
    async fn revision(&self, name: &str, reference: &str) -> Result<String, GitError>;

    /// Fetch `branch` from origin and integrate it into the working tree
    async fn integrate(&self, name: &str, branch: &str) -> Result<(), GitError>;

    /// Push `branch` to origin
    async fn publish(&self, name: &str, branch: &str) -> Result<(), GitError>;
}

/// Subprocess backed [`WorkingCopy`] rooted at one base directory
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
    program: OsString,
    timeout: Option<Duration>,
    fast_forward_only: bool,
}

impl GitCli {
    /// Working copies live directly below `root`, one directory per repository
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            program: OsString::from("git"),
            timeout: None,
            fast_forward_only: false,
        }
    }

    /// Use another git executable
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    /// Kill every subprocess that runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Refuse non fast-forward pulls
    pub fn fast_forward_only(mut self, enabled: bool) -> Self {
        self.fast_forward_only = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Probe the client once, e.g. before a batch run
    pub async fn version(&self) -> Result<String, GitError> {
        let output = self.run(&self.root, &["--version"]).await?;
        Ok(output.trim().to_string())
    }

    fn repo_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut command = self.program.to_string_lossy().into_owned();
        for arg in args {
            command.push(' ');
            command.push_str(arg);
        }
        command
    }

    /// Run the client in `dir` and return stdout followed by stderr
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        let command = self.describe(args);
        debug!(dir = %dir.display(), "Running {}", command);

        // A missing working directory also spawns with `NotFound`
        match tokio::fs::metadata(dir).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => {
                return Err(GitError::NotADirectory {
                    path: dir.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(GitError::Io {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        }

        let mut child = AsyncCommand::new(&self.program);
        child
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);

        let spawned = match self.timeout {
            Some(after) => match tokio::time::timeout(after, child.output()).await {
                Ok(result) => result,
                Err(_) => return Err(GitError::TimedOut { command, after }),
            },
            None => child.output().await,
        };

        let output = match spawned {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(GitError::ClientUnavailable {
                    program: self.program.to_string_lossy().into_owned(),
                })
            }
            Err(source) => return Err(GitError::Spawn { command, source }),
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command,
                status: output.status.to_string(),
                output: combined.trim().to_string(),
            });
        }

        Ok(combined)
    }
}

#[async_trait]
impl WorkingCopy for GitCli {
    async fn presence(&self, name: &str) -> Result<Presence, GitError> {
        let path = self.repo_path(name);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Presence::Missing),
            Err(source) => return Err(GitError::Io { path, source }),
        };

        if !metadata.is_dir() {
            return Ok(Presence::NotADirectory);
        }

        // `.git` is a directory for plain clones and a file for worktrees
        match tokio::fs::try_exists(path.join(".git")).await {
            Ok(true) => Ok(Presence::WorkingCopy),
            Ok(false) => Ok(Presence::NotARepository),
            Err(source) => Err(GitError::Io { path, source }),
        }
    }

    async fn clone_into(&self, name: &str, url: &str) -> Result<(), GitError> {
        self.run(&self.root, &["clone", url, name]).await?;
        Ok(())
    }

    async fn checkout(&self, name: &str, branch: &str) -> Result<(), GitError> {
        self.run(&self.repo_path(name), &["checkout", branch]).await?;
        Ok(())
    }

    async fn revision(&self, name: &str, reference: &str) -> Result<String, GitError> {
        let args = ["rev-parse", reference];
        let output = self.run(&self.repo_path(name), &args).await?;
        parse_object_id(&output).ok_or_else(|| GitError::InvalidRevision {
            command: self.describe(&args),
            output: output.trim().to_string(),
        })
    }

    async fn integrate(&self, name: &str, branch: &str) -> Result<(), GitError> {
        let mut args = vec!["pull"];
        if self.fast_forward_only {
            args.push("--ff-only");
        }
        args.extend(["origin", branch]);

        self.run(&self.repo_path(name), &args).await?;
        Ok(())
    }

    async fn publish(&self, name: &str, branch: &str) -> Result<(), GitError> {
        self.run(&self.repo_path(name), &["push", "origin", branch]).await?;
        Ok(())
    }
}

/// Extract a SHA-1 or SHA-256 object id from the first line of `rev-parse` output
fn parse_object_id(output: &str) -> Option<String> {
    static OBJECT_ID: OnceLock<Option<Regex>> = OnceLock::new();

    let candidate = output.lines().next().unwrap_or_default().trim();
    let is_object_id = OBJECT_ID
        .get_or_init(|| Regex::new(r"^(?:[0-9a-f]{40}|[0-9a-f]{64})$").ok())
        .as_ref()
        .map(|re| re.is_match(candidate))
        .unwrap_or(false);

    is_object_id.then(|| candidate.to_string())
}
