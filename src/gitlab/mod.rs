pub mod client;
pub mod repository_collector;
pub mod types;

use async_trait::async_trait;

pub use client::GitLabClient;
pub use repository_collector::RepositoryCollector;

use crate::{pagination::Page, permissions::TokenScopes, scm_error::ScmError};
use types::{Group, Member, Project, ProtectedBranch};

/// The slice of the GitLab REST API the repository collector relies on.
/// Groups and projects are addressed by full path.
#[async_trait]
pub trait GitLabApi: Send + Sync + 'static {
    async fn token_scopes(&self) -> Result<TokenScopes, ScmError>;

    async fn list_groups(&self, cursor: Option<String>) -> Result<Page<Group>, ScmError>;

    async fn get_group(&self, path: &str) -> Result<Group, ScmError>;

    async fn count_group_projects(&self, group: &str) -> Result<usize, ScmError>;

    async fn list_group_projects(
        &self,
        group: &str,
        cursor: Option<String>,
    ) -> Result<Page<Project>, ScmError>;

    async fn get_project(&self, path: &str) -> Result<Project, ScmError>;

    async fn list_members(
        &self,
        project: &str,
        cursor: Option<String>,
    ) -> Result<Page<Member>, ScmError>;

    async fn list_protected_branches(
        &self,
        project: &str,
        cursor: Option<String>,
    ) -> Result<Page<ProtectedBranch>, ScmError>;
}
