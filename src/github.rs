use async_trait::async_trait;
use octocrab::Octocrab;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Settings;
use crate::discovery::{
    list_repositories, short_branch, CloneMethod, ListError, Page, PageSource, RepoDescriptor,
    PAGE_SIZE,
};

const REPOSITORIES_QUERY: &str = r#"
query($orgaName: String!, $repoCursor: String, $ref: String!, $pageSize: Int!) {
  organization(login: $orgaName) {
    repositories(first: $pageSize, after: $repoCursor) {
      nodes {
        name
        sshUrl
        url
        ref(qualifiedName: $ref) {
          name
          target {
            oid
          }
        }
      }
      pageInfo {
        endCursor
        hasNextPage
      }
    }
  }
}
"#;

/// Repositories of one GitHub organization, with the head of one branch each
pub struct GitHubSource {
    client: Octocrab,
    organization: String,
    reference: String,
    clone_method: CloneMethod,
    timeout: Option<Duration>,
}

impl GitHubSource {
    /// Create a source authenticated with a personal access token
    pub fn new(token: &str, organization: &str, branch: &str) -> Result<Self, ListError> {
        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .build()?;

        Ok(Self::with_client(client, organization, branch))
    }

    /// Create from an existing client (for tests and custom endpoints)
    pub fn with_client(client: Octocrab, organization: &str, branch: &str) -> Self {
        Self {
            client,
            organization: organization.to_string(),
            reference: qualified_branch(branch),
            clone_method: CloneMethod::default(),
            timeout: None,
        }
    }

    pub fn clone_method(mut self, method: CloneMethod) -> Self {
        self.clone_method = method;
        self
    }

    /// Give up on a page request after `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn query(&self, cursor: Option<&str>) -> Result<GraphQlResponse, ListError> {
        let payload = json!({
            "query": REPOSITORIES_QUERY,
            "variables": {
                "orgaName": self.organization,
                "repoCursor": cursor,
                "ref": self.reference,
                "pageSize": PAGE_SIZE,
            },
        });

        let request = self.client.graphql::<GraphQlResponse>(&payload);
        let response = match self.timeout {
            Some(after) => tokio::time::timeout(after, request)
                .await
                .map_err(|_| ListError::TimedOut(after))??,
            None => request.await?,
        };

        Ok(response)
    }

    fn to_descriptor(&self, node: RepositoryNode) -> RepoDescriptor {
        let clone_url = match self.clone_method {
            CloneMethod::Ssh => node.ssh_url,
            CloneMethod::Https => format!("{}.git", node.url.trim_end_matches('/')),
        };

        let mut repo = RepoDescriptor::new(node.name, clone_url);
        if let Some(RefNode {
            name,
            target: Some(target),
        }) = node.reference
        {
            repo.known_revision.insert(name, target.oid);
        }
        repo
    }
}

#[async_trait]
impl PageSource for GitHubSource {
    async fn fetch_page(&self, cursor: Option<String>) -> Result<Page, ListError> {
        debug!(
            organization = %self.organization,
            cursor = cursor.as_deref().unwrap_or("<start>"),
            "Requesting repository page"
        );

        let response = self.query(cursor.as_deref()).await?;

        if !response.errors.is_empty() {
            return Err(ListError::GraphQl(
                response.errors.into_iter().map(|e| e.message).collect(),
            ));
        }

        let organization = response
            .data
            .ok_or(ListError::EmptyResponse)?
            .organization
            .ok_or_else(|| ListError::OrganizationNotFound(self.organization.clone()))?;

        let connection = organization.repositories;
        Ok(Page {
            repositories: connection
                .nodes
                .into_iter()
                .map(|node| self.to_descriptor(node))
                .collect(),
            end_cursor: connection.page_info.end_cursor,
            has_next_page: connection.page_info.has_next_page,
        })
    }

    fn provider_name(&self) -> &'static str {
        "GitHub"
    }
}

/// Fully qualified reference of a branch, e.g. `refs/heads/master`
pub fn qualified_branch(branch: &str) -> String {
    format!("refs/heads/{}", short_branch(branch))
}

/// List every repository of the configured organization with the head of `branch`
pub async fn list_organization(
    settings: &Settings,
    branch: &str,
) -> Result<Vec<RepoDescriptor>, ListError> {
    info!(
        organization = %settings.organization,
        branch = %branch,
        "Fetching repositories from GitHub"
    );

    let source = GitHubSource::new(&settings.token, &settings.organization, branch)?
        .clone_method(settings.protocol)
        .with_timeout(settings.timeout);

    let repositories = list_repositories(&source).await?;

    let missing = repositories
        .iter()
        .filter(|repo| repo.known_revision.is_empty())
        .count();
    if missing > 0 {
        info!("Branch {} does not exist in {} repositories yet", branch, missing);
    }

    Ok(repositories)
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<QueryData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    organization: Option<Organization>,
}

#[derive(Debug, Deserialize)]
struct Organization {
    repositories: RepositoryConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryConnection {
    nodes: Vec<RepositoryNode>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    name: String,
    ssh_url: String,
    url: String,
    #[serde(rename = "ref")]
    reference: Option<RefNode>,
}

#[derive(Debug, Deserialize)]
struct RefNode {
    name: String,
    target: Option<Target>,
}

#[derive(Debug, Deserialize)]
struct Target {
    oid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    end_cursor: Option<String>,
    has_next_page: bool,
}
