use std::{env, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, USER_AGENT},
    Method, RequestBuilder, Response,
};
use serde::{de::DeserializeOwned, Deserialize};
use url::{form_urlencoded, Url};

use super::{
    types::{Group, Member, Project, ProtectedBranch},
    GitLabApi,
};
use crate::{
    pagination::{Page, REST_PAGE_SIZE},
    permissions::TokenScopes,
    scm_error::ScmError,
};

pub const TOKEN_ENV: &str = "SCMGUARD_GITLAB_TOKEN";
const CLIENT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct PersonalAccessToken {
    #[serde(default)]
    scopes: Vec<String>,
}

/// reqwest-backed client for the GitLab v4 REST API.
#[derive(Clone)]
pub struct GitLabClient {
    http: reqwest::Client,
    api_url: Url,
    token: Option<String>,
}

impl GitLabClient {
    /// Build a client for `api_url` (for example `https://gitlab.com/api/v4/`)
    /// using the token from `SCMGUARD_GITLAB_TOKEN` when it is set.
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
        let mut api_url = api_url.clone();
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }
        Ok(Self { http, api_url, token })
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut req = self.http.request(method, url).header(USER_AGENT, CLIENT_USER_AGENT);
        if let Some(token) = &self.token {
            req = req.header("PRIVATE-TOKEN", token);
        }
        req
    }

    fn url(&self, path: &str) -> Result<Url, ScmError> {
        self.api_url
            .join(path)
            .map_err(|e| ScmError::other(format!("invalid API path {path}: {e}")))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ScmError> {
        let resp = req.send().await?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.text().await.unwrap_or_default();
        Err(ScmError::from_response(status, &headers, &error_message(&body)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ScmError> {
        let resp = self.send(self.request(Method::GET, self.url(path)?)).await?;
        Ok(resp.json().await?)
    }

    /// GitLab reports the following page number in `x-next-page`.
    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        cursor: Option<String>,
    ) -> Result<Page<T>, ScmError> {
        let mut url = self.url(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.extend_pairs(query);
            pairs.append_pair("per_page", &REST_PAGE_SIZE.to_string());
            pairs.append_pair("page", cursor.as_deref().unwrap_or("1"));
        }
        let resp = self.send(self.request(Method::GET, url)).await?;
        let next = next_page(resp.headers());
        let items: Vec<T> = resp.json().await?;
        Ok(match next {
            Some(page) => Page::with_next(items, page),
            None => Page::last(items),
        })
    }
}

#[async_trait]
impl GitLabApi for GitLabClient {
    async fn token_scopes(&self) -> Result<TokenScopes, ScmError> {
        let token: PersonalAccessToken = self.get_json("personal_access_tokens/self").await?;
        Ok(TokenScopes::new(token.scopes))
    }

    async fn list_groups(&self, cursor: Option<String>) -> Result<Page<Group>, ScmError> {
        self.get_page("groups", &[("min_access_level", "10"), ("top_level_only", "true")], cursor)
            .await
    }

    async fn get_group(&self, path: &str) -> Result<Group, ScmError> {
        self.get_json(&format!("groups/{}", encode_path(path))).await
    }

    /// Uses the `x-total` header of a single-item page.
    async fn count_group_projects(&self, group: &str) -> Result<usize, ScmError> {
        let mut url = self.url(&format!("groups/{}/projects", encode_path(group)))?;
        url.query_pairs_mut()
            .append_pair("include_subgroups", "true")
            .append_pair("per_page", "1");
        let resp = self.send(self.request(Method::GET, url)).await?;
        resp.headers()
            .get("x-total")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| ScmError::other(format!("no project total for group {group}")))
    }

    async fn list_group_projects(
        &self,
        group: &str,
        cursor: Option<String>,
    ) -> Result<Page<Project>, ScmError> {
        let path = format!("groups/{}/projects", encode_path(group));
        self.get_page(&path, &[("include_subgroups", "true"), ("archived", "false")], cursor)
            .await
    }

    async fn get_project(&self, path: &str) -> Result<Project, ScmError> {
        self.get_json(&format!("projects/{}", encode_path(path))).await
    }

    async fn list_members(
        &self,
        project: &str,
        cursor: Option<String>,
    ) -> Result<Page<Member>, ScmError> {
        let path = format!("projects/{}/members/all", encode_path(project));
        self.get_page(&path, &[], cursor).await
    }

    async fn list_protected_branches(
        &self,
        project: &str,
        cursor: Option<String>,
    ) -> Result<Page<ProtectedBranch>, ScmError> {
        let path = format!("projects/{}/protected_branches", encode_path(project));
        self.get_page(&path, &[], cursor).await
    }
}

fn encode_path(path: &str) -> String {
    form_urlencoded::byte_serialize(path.as_bytes()).collect()
}

fn next_page(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-next-page")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { message: Some(serde_json::Value::String(s)), .. }) => s,
        Ok(ErrorBody { message: Some(other), .. }) => other.to_string(),
        Ok(ErrorBody { error: Some(e), .. }) => e,
        _ => String::new(),
    }
}
