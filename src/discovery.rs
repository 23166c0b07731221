//! Repository discovery
//!
//! A remote organization is enumerated page by page through a [`PageSource`].
//! Pages are chained by the continuation cursor of the previous page and
//! collected all-or-nothing: the first failing page discards everything
//! collected so far.

use async_trait::async_trait;
use futures::stream::{self, Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Number of repositories requested per page
pub const PAGE_SIZE: usize = 100;

/// Branch name without a leading `refs/heads/`
pub fn short_branch(branch: &str) -> &str {
    branch.strip_prefix("refs/heads/").unwrap_or(branch)
}

/// Clone method preference for a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneMethod {
    /// Use SSH (git@github.com:orga/repo.git)
    #[default]
    Ssh,
    /// Use HTTPS (https://github.com/orga/repo.git)
    Https,
}

/// Identity and point-in-time remote knowledge of one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoDescriptor {
    /// Repository name, also the name of the local working directory
    pub name: String,

    /// Address used to clone the repository if it is absent locally
    pub clone_url: String,

    /// Head object id per branch, only for branches that existed on the
    /// remote during enumeration
    pub known_revision: BTreeMap<String, String>,
}

impl RepoDescriptor {
    pub fn new(name: impl Into<String>, clone_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clone_url: clone_url.into(),
            known_revision: BTreeMap::new(),
        }
    }

    /// Record the remote head of `branch`
    pub fn with_revision(mut self, branch: impl Into<String>, revision: impl Into<String>) -> Self {
        self.known_revision.insert(branch.into(), revision.into());
        self
    }

    /// Remote head of `branch`, if the branch existed remotely
    pub fn revision(&self, branch: &str) -> Option<&str> {
        self.known_revision.get(short_branch(branch)).map(String::as_str)
    }
}

/// One page of an organization's repository list
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub repositories: Vec<RepoDescriptor>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

/// Failures while enumerating an organization
#[derive(Error, Debug)]
pub enum ListError {
    #[error("GitHub API request failed: {0}")]
    Api(#[from] octocrab::Error),

    #[error("GitHub API reported errors: {}", .0.join("; "))]
    GraphQl(Vec<String>),

    #[error("organization {0:?} not found or not visible with this token")]
    OrganizationNotFound(String),

    #[error("GitHub API response carried no data")]
    EmptyResponse,

    #[error("page after cursor {after:?} announced more pages without a cursor")]
    MissingCursor { after: Option<String> },

    #[error("page request did not finish within {}s", .0.as_secs())]
    TimedOut(Duration),
}

/// A remote that hands out repository pages on request
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch the page following `cursor`, or the first page for `None`
    async fn fetch_page(&self, cursor: Option<String>) -> Result<Page, ListError>;

    /// Provider name for display/logging
    fn provider_name(&self) -> &'static str;
}

/// Cursor state between two page requests: `None` once the last page was seen
type NextPage = Option<Option<String>>;

/// Fetch one page and work out what follows it
async fn next_page<S>(source: &S, next: NextPage) -> Result<Option<(Page, NextPage)>, ListError>
where
    S: PageSource + ?Sized,
{
    let Some(cursor) = next else {
        return Ok(None);
    };

    let page = source.fetch_page(cursor.clone()).await?;
    tracing::debug!(
        provider = source.provider_name(),
        repositories = page.repositories.len(),
        has_next_page = page.has_next_page,
        "Fetched repository page"
    );

    let following = match (page.has_next_page, &page.end_cursor) {
        (false, _) => None,
        (true, Some(end_cursor)) => Some(Some(end_cursor.clone())),
        (true, None) => return Err(ListError::MissingCursor { after: cursor }),
    };

    Ok(Some((page, following)))
}

/// Lazily walk every page of `source`, following continuation cursors.
///
/// The stream ends after the first page without a successor and stops at the
/// first error.
pub fn pages<S>(source: &S) -> impl Stream<Item = Result<Page, ListError>> + '_
where
    S: PageSource + ?Sized,
{
    stream::try_unfold(Some(None), move |next| next_page(source, next))
}

/// Collect every repository of `source`, all-or-nothing
pub async fn list_repositories<S>(source: &S) -> Result<Vec<RepoDescriptor>, ListError>
where
    S: PageSource + ?Sized,
{
    let repositories: Vec<RepoDescriptor> = pages(source)
        .map_ok(|page| page.repositories)
        .try_concat()
        .await?;

    tracing::info!(
        "Discovered {} repositories from {}",
        repositories.len(),
        source.provider_name()
    );
    Ok(repositories)
}
