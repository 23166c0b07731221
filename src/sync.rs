//! Sync Engine - walks an organization's repositories one at a time
//!
//! This module drives the [`Reconciler`] over a discovered repository list,
//! turns every per-repository outcome into a [`SyncResult`] and tallies a
//! [`SyncSummary`]. A failing repository is recorded and the run moves on,
//! unless fail-fast mode is enabled.

use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::discovery::RepoDescriptor;
use crate::git::{GitError, WorkingCopy};
use crate::repo::{PullOutcome, PushOutcome, Reconciler};

/// Outcome of one repository in a sync run
#[derive(Debug)]
pub enum SyncResult {
    /// Repository was cloned
    Cloned { name: String },
    /// Remote changes were pulled
    Pulled { name: String },
    /// Local changes were pushed
    Pushed { name: String },
    /// Local and remote already agreed
    UpToDate { name: String },
    /// Nothing to do, e.g. pushing a repository that was never cloned
    Skipped { name: String, reason: String },
    /// Operation failed
    Failed { name: String, error: GitError },
}

impl SyncResult {
    pub fn name(&self) -> &str {
        match self {
            SyncResult::Cloned { name }
            | SyncResult::Pulled { name }
            | SyncResult::Pushed { name }
            | SyncResult::UpToDate { name }
            | SyncResult::Skipped { name, .. }
            | SyncResult::Failed { name, .. } => name,
        }
    }
}

/// Results from a complete sync operation
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub total_repositories: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The run stopped at the first failure and left repositories untouched
    pub aborted: bool,
    pub duration: Duration,
    pub results: Vec<SyncResult>,
}

impl SyncSummary {
    fn record(&mut self, result: SyncResult) {
        match &result {
            SyncResult::Cloned { .. } => {
                self.created += 1;
                self.updated += 1;
            }
            SyncResult::Pulled { .. } | SyncResult::Pushed { .. } => self.updated += 1,
            SyncResult::UpToDate { .. } => self.unchanged += 1,
            SyncResult::Skipped { .. } => self.skipped += 1,
            SyncResult::Failed { .. } => self.failed += 1,
        }
        self.results.push(result);
    }

    /// Failed repositories with their errors
    pub fn failures(&self) -> impl Iterator<Item = (&str, &GitError)> {
        self.results.iter().filter_map(|result| match result {
            SyncResult::Failed { name, error } => Some((name.as_str(), error)),
            _ => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Pull,
    Push,
}

/// Sequential driver over a repository list
#[derive(Debug, Clone)]
pub struct SyncEngine<W> {
    reconciler: Reconciler<W>,
    fail_fast: bool,
}

impl<W: WorkingCopy> SyncEngine<W> {
    pub fn new(copy: W) -> Self {
        Self {
            reconciler: Reconciler::new(copy),
            fail_fast: false,
        }
    }

    /// Stop at the first failing repository instead of continuing
    pub fn fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast = enabled;
        self
    }

    pub fn reconciler(&self) -> &Reconciler<W> {
        &self.reconciler
    }

    /// Clone or update every repository on `branch`
    pub async fn pull_all(&self, repositories: &[RepoDescriptor], branch: &str) -> SyncSummary {
        self.run(repositories, branch, Direction::Pull).await
    }

    /// Push `branch` of every local working copy
    pub async fn push_all(&self, repositories: &[RepoDescriptor], branch: &str) -> SyncSummary {
        self.run(repositories, branch, Direction::Push).await
    }

    async fn run(
        &self,
        repositories: &[RepoDescriptor],
        branch: &str,
        direction: Direction,
    ) -> SyncSummary {
        let start_time = Instant::now();
        let mut summary = SyncSummary {
            total_repositories: repositories.len(),
            ..Default::default()
        };

        info!("There are {} repositories in total", repositories.len());

        for repo in repositories {
            let result = self.sync_one(repo, branch, direction).await;

            let failed = matches!(result, SyncResult::Failed { .. });
            summary.record(result);

            if failed && self.fail_fast {
                summary.aborted = true;
                break;
            }
        }

        summary.duration = start_time.elapsed();

        info!(
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            failed = summary.failed,
            "Finished {:?} in {:.2}s",
            direction,
            summary.duration.as_secs_f64()
        );

        summary
    }

    async fn sync_one(&self, repo: &RepoDescriptor, branch: &str, direction: Direction) -> SyncResult {
        let name = repo.name.clone();

        let outcome = match direction {
            Direction::Pull => self.reconciler.pull(repo, branch).await.map(|outcome| match outcome {
                PullOutcome { created: true, .. } => SyncResult::Cloned { name: name.clone() },
                PullOutcome { updated: true, .. } => SyncResult::Pulled { name: name.clone() },
                PullOutcome { .. } => SyncResult::UpToDate { name: name.clone() },
            }),
            Direction::Push => self.reconciler.push(repo, branch).await.map(|outcome| match outcome {
                PushOutcome::Pushed => SyncResult::Pushed { name: name.clone() },
                PushOutcome::UpToDate => SyncResult::UpToDate { name: name.clone() },
                PushOutcome::NoWorkingCopy => SyncResult::Skipped {
                    name: name.clone(),
                    reason: "no local working copy".to_string(),
                },
            }),
        };

        match outcome {
            Ok(result) => {
                match &result {
                    SyncResult::Cloned { .. } => info!(repository = %name, "Cloned new repository"),
                    SyncResult::Pulled { .. } => info!(repository = %name, "Pulled updates from remote"),
                    SyncResult::Pushed { .. } => info!(repository = %name, "Pushed updates to remote"),
                    _ => debug!(repository = %name, "No update for this repository"),
                }
                result
            }
            Err(error) => {
                error!(repository = %name, branch, error = %error, "Synchronizing failed");
                SyncResult::Failed { name, error }
            }
        }
    }
}
