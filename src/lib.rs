//! github-orga-sync - bulk pull or push every repository of a GitHub organization
//!
//! Built for GitHub Classroom style organizations: new student repositories
//! are cloned, known ones are brought up to date, and a feedback branch can
//! be pushed back afterwards. Repositories whose remote revision already
//! matches the local one are skipped without any network traffic.
//!
//! ## Modules
//!
//! - [`config`]: Configuration file loading and validation
//! - [`discovery`]: Paginated repository enumeration
//! - [`github`]: GitHub GraphQL page source
//! - [`git`]: Working copy operations backed by the git client
//! - [`repo`]: Per-repository reconciliation (clone, pull, push or skip)
//! - [`sync`]: Sequential driver and run summary

pub mod config;
pub mod discovery;
pub mod git;
pub mod github;
pub mod repo;
pub mod sync;

pub use config::{Config, Settings};
pub use discovery::{list_repositories, CloneMethod, PageSource, RepoDescriptor};
pub use git::{GitCli, GitError, Presence, WorkingCopy};
pub use github::GitHubSource;
pub use repo::{PullOutcome, PushOutcome, Reconciler};
pub use sync::{SyncEngine, SyncResult, SyncSummary};
