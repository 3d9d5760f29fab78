use std::{env, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, ACCEPT, LINK, USER_AGENT},
    Method, RequestBuilder, Response, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use url::Url;

use super::{
    types::{
        ActionsTokenPermissions, Collaborator, DependencyGraphManifests, GraphQlRepository, Hook,
        Organization, OrganizationMembership, RepositoryLookup,
    },
    GitHubApi,
};
use crate::{
    pagination::{Page, GRAPHQL_PAGE_SIZE, REST_PAGE_SIZE},
    permissions::TokenScopes,
    scm_error::{ScmError, ScmErrorKind},
};

pub const TOKEN_ENV: &str = "SCMGUARD_GITHUB_TOKEN";
const CLIENT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

const REPOSITORY_FIELDS: &str = r#"
fragment RepositoryFields on Repository {
  name
  nameWithOwner
  url
  isPrivate
  isArchived
  isFork
  viewerPermission
  defaultBranchRef {
    name
    branchProtectionRule {
      pattern
      requiresApprovingReviews
      requiredApprovingReviewCount
      requiresStatusChecks
      requiresStrictStatusChecks
      dismissesStaleReviews
      requiresCodeOwnerReviews
      allowsForcePushes
      allowsDeletions
      isAdminEnforced
      requiresLinearHistory
      requiresCommitSignatures
    }
  }
}"#;

const ORG_REPOSITORIES_QUERY: &str = r#"
query($login: String!, $first: Int!, $cursor: String) {
  organization(login: $login) {
    repositories(first: $first, after: $cursor) {
      pageInfo { hasNextPage endCursor }
      nodes { ...RepositoryFields }
    }
  }
}"#;

const REPOSITORY_COUNT_QUERY: &str = r#"
query($login: String!) {
  organization(login: $login) {
    repositories(first: 1) { totalCount }
  }
}"#;

const SPECIFIC_REPOSITORY_QUERY: &str = r#"
query($login: String!, $name: String!) {
  repositoryOwner(login: $login) {
    login
    ... on Organization { viewerCanAdminister }
    repository(name: $name) { ...RepositoryFields }
  }
}"#;

const DEPENDENCY_GRAPH_QUERY: &str = r#"
query($login: String!, $name: String!) {
  repository(owner: $login, name: $name) {
    dependencyGraphManifests(first: 1) { totalCount }
  }
}"#;

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl From<GraphQlError> for ScmError {
    fn from(err: GraphQlError) -> Self {
        let kind = match err.kind.as_deref() {
            Some("NOT_FOUND") => ScmErrorKind::NotFound,
            Some("FORBIDDEN") | Some("INSUFFICIENT_SCOPES") => ScmErrorKind::PermissionDenied,
            Some("RATE_LIMITED") => ScmErrorKind::Transient,
            _ => ScmErrorKind::Other,
        };
        ScmError::new(kind, err.message)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryConnection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<GraphQlRepository>,
}

#[derive(Deserialize)]
struct OrgRepositories {
    repositories: RepositoryConnection,
}

#[derive(Deserialize)]
struct OrgRepositoriesData {
    organization: Option<OrgRepositories>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TotalCount {
    total_count: usize,
}

#[derive(Deserialize)]
struct OrgCount {
    repositories: TotalCount,
}

#[derive(Deserialize)]
struct OrgCountData {
    organization: Option<OrgCount>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryOwner {
    login: String,
    #[serde(default)]
    viewer_can_administer: Option<bool>,
    repository: Option<GraphQlRepository>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpecificRepositoryData {
    repository_owner: Option<RepositoryOwner>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DependencyGraphRepository {
    dependency_graph_manifests: Option<DependencyGraphManifests>,
}

#[derive(Deserialize)]
struct DependencyGraphData {
    repository: Option<DependencyGraphRepository>,
}

/// reqwest-backed GitHub client: GraphQL for repository listings, REST for
/// the privileged per-repository settings.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: Url,
    graphql_url: Url,
    token: Option<String>,
}

impl GitHubClient {
    /// Build a client for `api_url`, authenticating with the token from
    /// `SCMGUARD_GITHUB_TOKEN` when it is set.
    pub fn from_env(api_url: &Url, ignore_certs: bool) -> Result<Self> {
        let token = env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty());
        Self::new(api_url, token, ignore_certs)
    }

    pub fn new(api_url: &Url, token: Option<String>, ignore_certs: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(ignore_certs)
            .build()
            .context("Failed to build HTTP client")?;
        let api_url = with_trailing_slash(api_url);
        let graphql_url = graphql_endpoint(&api_url)?;
        Ok(Self { http, api_url, graphql_url, token })
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut req = self
            .http
            .request(method, url)
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    fn rest_url(&self, path: &str) -> Result<Url, ScmError> {
        self.api_url
            .join(path)
            .map_err(|e| ScmError::other(format!("invalid API path {path}: {e}")))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ScmError> {
        let resp = req.send().await?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        Err(error_from_response(resp).await)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ScmError> {
        let url = self.rest_url(path)?;
        let resp = self.send(self.request(Method::GET, url)).await?;
        Ok(resp.json().await?)
    }

    /// REST listings page by number; the page number is the cursor.
    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        cursor: Option<String>,
    ) -> Result<Page<T>, ScmError> {
        let page: u32 = cursor.as_deref().and_then(|c| c.parse().ok()).unwrap_or(1);
        let mut url = self.rest_url(path)?;
        url.query_pairs_mut()
            .append_pair("per_page", &REST_PAGE_SIZE.to_string())
            .append_pair("page", &page.to_string());
        let resp = self.send(self.request(Method::GET, url)).await?;
        let next = has_next_link(resp.headers());
        let items: Vec<T> = resp.json().await?;
        if next {
            Ok(Page::with_next(items, (page + 1).to_string()))
        } else {
            Ok(Page::last(items))
        }
    }

    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, ScmError> {
        let body = json!({ "query": query, "variables": variables });
        let req = self.request(Method::POST, self.graphql_url.clone()).json(&body);
        let resp: GraphQlResponse<T> = self.send(req).await?.json().await?;
        if let Some(err) = resp.errors.into_iter().next() {
            return Err(err.into());
        }
        resp.data.ok_or_else(|| ScmError::other("GraphQL response carried no data"))
    }
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn token_scopes(&self) -> Result<TokenScopes, ScmError> {
        let url = self.rest_url("user")?;
        let resp = self.send(self.request(Method::GET, url)).await?;
        let scopes = resp
            .headers()
            .get("x-oauth-scopes")
            .and_then(|v| v.to_str().ok())
            .map(TokenScopes::from_header)
            .unwrap_or_default();
        Ok(scopes)
    }

    async fn list_memberships(
        &self,
        cursor: Option<String>,
    ) -> Result<Page<OrganizationMembership>, ScmError> {
        self.get_page("user/memberships/orgs?state=active", cursor).await
    }

    async fn get_organization(&self, login: &str) -> Result<Organization, ScmError> {
        self.get_json(&format!("orgs/{login}")).await
    }

    async fn count_repositories(&self, org: &str) -> Result<usize, ScmError> {
        let data: OrgCountData =
            self.graphql(REPOSITORY_COUNT_QUERY, json!({ "login": org })).await?;
        data.organization
            .map(|o| o.repositories.total_count)
            .ok_or_else(|| ScmError::not_found(format!("organization {org} not found")))
    }

    async fn list_repositories(
        &self,
        org: &str,
        cursor: Option<String>,
    ) -> Result<Page<GraphQlRepository>, ScmError> {
        let query = format!("{ORG_REPOSITORIES_QUERY}\n{REPOSITORY_FIELDS}");
        let variables = json!({ "login": org, "first": GRAPHQL_PAGE_SIZE, "cursor": cursor });
        let data: OrgRepositoriesData = self.graphql(&query, variables).await?;
        let connection = data
            .organization
            .ok_or_else(|| ScmError::not_found(format!("organization {org} not found")))?
            .repositories;
        Ok(Page {
            items: connection.nodes,
            next_cursor: connection.page_info.end_cursor,
            has_next_page: connection.page_info.has_next_page,
        })
    }

    async fn get_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<RepositoryLookup, ScmError> {
        let query = format!("{SPECIFIC_REPOSITORY_QUERY}\n{REPOSITORY_FIELDS}");
        let data: SpecificRepositoryData =
            self.graphql(&query, json!({ "login": owner, "name": name })).await?;
        let owner_data = data
            .repository_owner
            .ok_or_else(|| ScmError::not_found(format!("owner {owner} not found")))?;
        let repository = owner_data
            .repository
            .ok_or_else(|| ScmError::not_found(format!("repository {owner}/{name} not found")))?;
        Ok(RepositoryLookup {
            owner: owner_data.login,
            viewer_can_administer: owner_data.viewer_can_administer,
            repository,
        })
    }

    /// 204 when enabled, 404 when disabled.
    async fn get_vulnerability_alerts(&self, owner: &str, repo: &str) -> Result<bool, ScmError> {
        let url = self.rest_url(&format!("repos/{owner}/{repo}/vulnerability-alerts"))?;
        let resp = self.request(Method::GET, url).send().await?;
        match resp.status() {
            StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(error_from_response(resp).await),
        }
    }

    async fn list_hooks(
        &self,
        owner: &str,
        repo: &str,
        cursor: Option<String>,
    ) -> Result<Page<Hook>, ScmError> {
        self.get_page(&format!("repos/{owner}/{repo}/hooks"), cursor).await
    }

    async fn list_collaborators(
        &self,
        owner: &str,
        repo: &str,
        cursor: Option<String>,
    ) -> Result<Page<Collaborator>, ScmError> {
        self.get_page(&format!("repos/{owner}/{repo}/collaborators"), cursor).await
    }

    async fn get_actions_token_permissions(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<ActionsTokenPermissions, ScmError> {
        self.get_json(&format!("repos/{owner}/{repo}/actions/permissions/workflow")).await
    }

    async fn get_dependency_graph_manifests(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<DependencyGraphManifests, ScmError> {
        let data: DependencyGraphData = self
            .graphql(DEPENDENCY_GRAPH_QUERY, json!({ "login": owner, "name": repo }))
            .await?;
        data.repository
            .and_then(|r| r.dependency_graph_manifests)
            .ok_or_else(|| ScmError::not_found(format!("no dependency graph for {owner}/{repo}")))
    }

    async fn get_branch_protection(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Value, ScmError> {
        let url = branch_protection_url(&self.api_url, owner, repo, branch)?;
        let resp = self.send(self.request(Method::GET, url)).await?;
        Ok(resp.json().await?)
    }
}

/// Branch names may carry `/`, `#`, `?` or `%`; each path segment is encoded.
fn branch_protection_url(api_url: &Url, owner: &str, repo: &str, branch: &str) -> Result<Url, ScmError> {
    let mut url = api_url.clone();
    url.path_segments_mut()
        .map_err(|()| ScmError::other(format!("API URL {api_url} cannot carry a path")))?
        .pop_if_empty()
        .extend(["repos", owner, repo, "branches", branch, "protection"]);
    Ok(url)
}

async fn error_from_response(resp: Response) -> ScmError {
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body).map(|b| b.message).unwrap_or_default();
    ScmError::from_response(status, &headers, &message)
}

fn has_next_link(headers: &HeaderMap) -> bool {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|part| part.contains("rel=\"next\"")))
}

fn with_trailing_slash(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// `https://api.github.com/` → `https://api.github.com/graphql`;
/// Enterprise `https://ghe.example.com/api/v3/` → `https://ghe.example.com/api/graphql`.
fn graphql_endpoint(api_url: &Url) -> Result<Url> {
    let url = if api_url.path().ends_with("/api/v3/") {
        api_url.join("../graphql")
    } else {
        api_url.join("graphql")
    };
    url.with_context(|| format!("Failed to derive GraphQL endpoint from {api_url}"))
}
