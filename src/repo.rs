//! Repository reconciliation
//!
//! Decides per repository whether to clone, pull, push or do nothing, based
//! on the remote revision captured during discovery and the local working
//! copy state, which is inspected afresh on every call.

use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::discovery::{short_branch, RepoDescriptor};
use crate::git::{GitError, Presence, WorkingCopy};

/// Result of a successful [`Reconciler::pull`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PullOutcome {
    /// The working copy was cloned during this call
    pub created: bool,
    /// The working copy changed during this call
    pub updated: bool,
}

/// Result of a successful [`Reconciler::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The branch was published
    Pushed,
    /// The remote already had the local revision
    UpToDate,
    /// There is no local working copy to push from
    NoWorkingCopy,
}

/// Comparison of a local revision against the remote snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RevisionCheck {
    /// Remote revision unknown, the remote has to be asked
    Unknown,
    /// Local and remote agree, nothing to transfer
    Match,
    /// Local and remote differ
    Differs,
}

fn compare(known: Option<&str>, local: &str) -> RevisionCheck {
    match known {
        None => RevisionCheck::Unknown,
        Some(remote) if remote.eq_ignore_ascii_case(local) => RevisionCheck::Match,
        Some(_) => RevisionCheck::Differs,
    }
}

/// Pull and push engine on top of a [`WorkingCopy`] implementation
#[derive(Debug, Clone)]
pub struct Reconciler<W> {
    copy: W,
}

impl<W: WorkingCopy> Reconciler<W> {
    pub fn new(copy: W) -> Self {
        Self { copy }
    }

    pub fn working_copy(&self) -> &W {
        &self.copy
    }

    /// Clone `repo` if it is absent, otherwise bring `branch` up to the remote.
    ///
    /// No fetch is issued when the checked out head already equals the known
    /// remote revision.
    pub async fn pull(&self, repo: &RepoDescriptor, branch: &str) -> Result<PullOutcome, GitError> {
        let name = repo.name.as_str();
        let branch = short_branch(branch);

        match self.copy.presence(name).await? {
            Presence::Missing => {
                info!(repository = name, url = %repo.clone_url, "Cloning repository");
                self.copy.clone_into(name, &repo.clone_url).await?;
                return Ok(PullOutcome {
                    created: true,
                    updated: true,
                });
            }
            Presence::WorkingCopy => {}
            Presence::NotARepository => {
                return Err(GitError::NotARepository {
                    path: PathBuf::from(name),
                })
            }
            Presence::NotADirectory => {
                return Err(GitError::NotADirectory {
                    path: PathBuf::from(name),
                })
            }
        }

        self.copy.checkout(name, branch).await?;
        let local = self.copy.revision(name, "HEAD").await?;

        match compare(repo.revision(branch), &local) {
            RevisionCheck::Match => {
                debug!(repository = name, branch, revision = %local, "Already at remote revision");
                return Ok(PullOutcome::default());
            }
            RevisionCheck::Unknown => {
                warn!(repository = name, branch, "Remote revision is unknown, pulling anyway");
            }
            RevisionCheck::Differs => {
                debug!(
                    repository = name,
                    branch,
                    local = %local,
                    remote = repo.revision(branch).unwrap_or_default(),
                    "Local revision differs from remote"
                );
            }
        }

        self.copy.integrate(name, branch).await?;
        Ok(PullOutcome {
            created: false,
            updated: true,
        })
    }

    /// Publish the local `branch` of `repo` unless the remote already has it.
    ///
    /// A repository that was never cloned has nothing to push and is skipped.
    pub async fn push(&self, repo: &RepoDescriptor, branch: &str) -> Result<PushOutcome, GitError> {
        let name = repo.name.as_str();
        let branch = short_branch(branch);

        match self.copy.presence(name).await? {
            Presence::Missing => {
                warn!(repository = name, branch, "No local working copy, nothing to push");
                return Ok(PushOutcome::NoWorkingCopy);
            }
            Presence::WorkingCopy => {}
            Presence::NotARepository => {
                return Err(GitError::NotARepository {
                    path: PathBuf::from(name),
                })
            }
            Presence::NotADirectory => {
                return Err(GitError::NotADirectory {
                    path: PathBuf::from(name),
                })
            }
        }

        let local = self.copy.revision(name, branch).await?;

        match compare(repo.revision(branch), &local) {
            RevisionCheck::Match => {
                debug!(repository = name, branch, revision = %local, "Remote already has local revision");
                return Ok(PushOutcome::UpToDate);
            }
            RevisionCheck::Unknown => {
                warn!(repository = name, branch, "Remote revision is unknown, pushing anyway");
            }
            RevisionCheck::Differs => {
                debug!(
                    repository = name,
                    branch,
                    local = %local,
                    remote = repo.revision(branch).unwrap_or_default(),
                    "Local revision differs from remote"
                );
            }
        }

        self.copy.publish(name, branch).await?;
        Ok(PushOutcome::Pushed)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;

    use crate::git::{GitError, Presence, WorkingCopy};

    /// One recorded call against [`FakeWorkingCopy`]
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Clone(String),
        Checkout(String, String),
        Revision(String, String),
        Integrate(String, String),
        Publish(String, String),
    }

    #[derive(Debug, Default)]
    struct Repo {
        head: String,
        branches: BTreeMap<String, String>,
    }

    #[derive(Debug, Default)]
    struct State {
        repos: BTreeMap<String, Repo>,
        files: HashSet<String>,
        plain_dirs: HashSet<String>,
        /// Object id each clone url serves per branch
        remotes: BTreeMap<String, BTreeMap<String, String>>,
        failing: HashSet<&'static str>,
        calls: Vec<Call>,
        presence_checks: usize,
    }

    /// In-memory working copies with a scripted remote
    #[derive(Debug, Default)]
    pub struct FakeWorkingCopy {
        state: Mutex<State>,
    }

    fn failure(command: &str) -> GitError {
        GitError::CommandFailed {
            command: command.to_string(),
            status: "exit status: 1".to_string(),
            output: format!("fatal: {} failed", command),
        }
    }

    impl FakeWorkingCopy {
        pub fn new() -> Self {
            Self::default()
        }

        /// Serve `branch` at `revision` from `url`
        pub fn remote(self, url: &str, branch: &str, revision: &str) -> Self {
            self.state
                .lock()
                .unwrap()
                .remotes
                .entry(url.to_string())
                .or_default()
                .insert(branch.to_string(), revision.to_string());
            self
        }

        /// An existing working copy with `branch` checked out at `revision`
        pub fn local(self, name: &str, branch: &str, revision: &str) -> Self {
            let mut state = self.state.lock().unwrap();
            let repo = state.repos.entry(name.to_string()).or_default();
            repo.branches.insert(branch.to_string(), revision.to_string());
            repo.head = revision.to_string();
            drop(state);
            self
        }

        pub fn file(self, name: &str) -> Self {
            self.state.lock().unwrap().files.insert(name.to_string());
            self
        }

        pub fn plain_dir(self, name: &str) -> Self {
            self.state.lock().unwrap().plain_dirs.insert(name.to_string());
            self
        }

        /// Make every call of `operation` ("clone", "checkout", ...) fail
        pub fn failing(self, operation: &'static str) -> Self {
            self.state.lock().unwrap().failing.insert(operation);
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.state.lock().unwrap().calls.clone()
        }

        /// How often local state was inspected
        pub fn presence_checks(&self) -> usize {
            self.state.lock().unwrap().presence_checks
        }

        pub fn head(&self, name: &str) -> Option<String> {
            self.state.lock().unwrap().repos.get(name).map(|r| r.head.clone())
        }

        fn check(state: &State, operation: &'static str) -> Result<(), GitError> {
            if state.failing.contains(operation) {
                Err(failure(operation))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl WorkingCopy for FakeWorkingCopy {
        async fn presence(&self, name: &str) -> Result<Presence, GitError> {
            let mut state = self.state.lock().unwrap();
            state.presence_checks += 1;
            Ok(if state.repos.contains_key(name) {
                Presence::WorkingCopy
            } else if state.files.contains(name) {
                Presence::NotADirectory
            } else if state.plain_dirs.contains(name) {
                Presence::NotARepository
            } else {
                Presence::Missing
            })
        }

        async fn clone_into(&self, name: &str, url: &str) -> Result<(), GitError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Clone(name.to_string()));
            Self::check(&state, "clone")?;

            let branches = state.remotes.get(url).cloned().unwrap_or_default();
            let head = branches.values().next().cloned().unwrap_or_default();
            state.repos.insert(name.to_string(), Repo { head, branches });
            Ok(())
        }

        async fn checkout(&self, name: &str, branch: &str) -> Result<(), GitError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Checkout(name.to_string(), branch.to_string()));
            Self::check(&state, "checkout")?;

            let repo = state.repos.get_mut(name).ok_or_else(|| failure("checkout"))?;
            let head = repo.branches.get(branch).cloned().ok_or_else(|| failure("checkout"))?;
            repo.head = head;
            Ok(())
        }

        async fn revision(&self, name: &str, reference: &str) -> Result<String, GitError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Revision(name.to_string(), reference.to_string()));
            Self::check(&state, "rev-parse")?;

            let repo = state.repos.get(name).ok_or_else(|| failure("rev-parse"))?;
            if reference == "HEAD" {
                Ok(repo.head.clone())
            } else {
                repo.branches.get(reference).cloned().ok_or_else(|| failure("rev-parse"))
            }
        }

        async fn integrate(&self, name: &str, branch: &str) -> Result<(), GitError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Integrate(name.to_string(), branch.to_string()));
            Self::check(&state, "pull")?;
            Ok(())
        }

        async fn publish(&self, name: &str, branch: &str) -> Result<(), GitError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Publish(name.to_string(), branch.to_string()));
            Self::check(&state, "push")?;
            Ok(())
        }
    }
}
