pub mod client;
pub mod context;
pub mod organization_collector;
pub mod repository_collector;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

pub use client::GitHubClient;
pub use organization_collector::OrganizationCollector;
pub use repository_collector::RepositoryCollector;

use crate::{
    accumulate::AppendOnly,
    pagination::{collect_pages, Page},
    permissions::TokenScopes,
    run_context::CollectionTarget,
    scm_error::ScmError,
    task_group::TaskGroup,
};
use types::{
    ActionsTokenPermissions, Collaborator, DependencyGraphManifests, ExtendedOrg,
    GraphQlRepository, Hook, Organization, OrganizationMembership, RepositoryLookup,
};

/// The slice of the GitHub API the collectors rely on.
#[async_trait]
pub trait GitHubApi: Send + Sync + 'static {
    async fn token_scopes(&self) -> Result<TokenScopes, ScmError>;

    async fn list_memberships(
        &self,
        cursor: Option<String>,
    ) -> Result<Page<OrganizationMembership>, ScmError>;

    async fn get_organization(&self, login: &str) -> Result<Organization, ScmError>;

    async fn count_repositories(&self, org: &str) -> Result<usize, ScmError>;

    async fn list_repositories(
        &self,
        org: &str,
        cursor: Option<String>,
    ) -> Result<Page<GraphQlRepository>, ScmError>;

    async fn get_repository(&self, owner: &str, name: &str)
        -> Result<RepositoryLookup, ScmError>;

    async fn get_vulnerability_alerts(&self, owner: &str, repo: &str) -> Result<bool, ScmError>;

    async fn list_hooks(
        &self,
        owner: &str,
        repo: &str,
        cursor: Option<String>,
    ) -> Result<Page<Hook>, ScmError>;

    async fn list_collaborators(
        &self,
        owner: &str,
        repo: &str,
        cursor: Option<String>,
    ) -> Result<Page<Collaborator>, ScmError>;

    async fn get_actions_token_permissions(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<ActionsTokenPermissions, ScmError>;

    async fn get_dependency_graph_manifests(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<DependencyGraphManifests, ScmError>;

    /// Fetch protection of `branch`. "Branch not protected" surfaces as
    /// [`crate::scm_error::ScmErrorKind::BranchNotProtected`].
    async fn get_branch_protection(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<serde_json::Value, ScmError>;
}

/// Organizations a run covers. `unreachable` holds `(login, error)` for those
/// whose details could not be read.
#[derive(Debug, Default)]
pub struct OrganizationListing {
    pub organizations: Vec<Arc<ExtendedOrg>>,
    pub unreachable: Vec<(String, String)>,
}

/// Resolve the organizations a run covers, with admin flag and plan.
///
/// Fails only when the membership listing itself fails.
pub async fn collect_organizations<C: GitHubApi>(
    client: &Arc<C>,
    target: &CollectionTarget,
) -> Result<OrganizationListing, ScmError> {
    let memberships = collect_pages(|cursor| client.list_memberships(cursor)).await?;
    let names: Vec<String> = match target.organizations() {
        Some(requested) => requested.to_vec(),
        None => memberships.iter().map(|m| m.organization.login.clone()).collect(),
    };

    let found = Arc::new(AppendOnly::new());
    let unreachable = Arc::new(AppendOnly::new());
    let mut group = TaskGroup::new();
    for name in names {
        let viewer_is_admin = memberships
            .iter()
            .any(|m| m.organization.login.eq_ignore_ascii_case(&name) && m.is_admin());
        let client = Arc::clone(client);
        let found = Arc::clone(&found);
        let unreachable = Arc::clone(&unreachable);
        group.spawn(async move {
            match client.get_organization(&name).await {
                Ok(organization) => found.push(Arc::new(ExtendedOrg { organization, viewer_is_admin })),
                Err(e) => {
                    warn!("Failed to collect organization {name}: {e}");
                    unreachable.push((name, e.to_string()));
                }
            }
        });
    }
    group.wait_all().await;

    let mut organizations = found.take();
    organizations.sort_by(|a, b| a.name().cmp(b.name()));
    let mut unreachable = unreachable.take();
    unreachable.sort();
    info!("Found {} GitHub organizations", organizations.len());
    Ok(OrganizationListing { organizations, unreachable })
}
