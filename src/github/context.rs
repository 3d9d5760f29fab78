//! Builds the [`EntityContext`] a repository is collected under. There is
//! one constructor per way a repository can be reached.

use crate::{
    collected::{EntityContext, Plan},
    permissions::Role,
    scm_error::ScmError,
};

use super::{
    types::{ExtendedOrg, GraphQlRepository, RepositoryLookup},
    GitHubApi,
};

fn roles_for(repo: &GraphQlRepository, viewer_is_org_admin: bool) -> Vec<Role> {
    let mut roles = Vec::with_capacity(2);
    if viewer_is_org_admin {
        roles.push(Role::OrgAdmin);
    }
    roles.extend(repo.viewer_role());
    roles
}

/// Free organizations cannot protect branches of private repositories.
fn organization_supports_branch_protection(repo: &GraphQlRepository, plan: Plan) -> bool {
    !repo.is_private || plan != Plan::Free
}

fn organization_context(repo: &GraphQlRepository, plan: Plan, viewer_is_org_admin: bool) -> EntityContext {
    EntityContext {
        roles: roles_for(repo, viewer_is_org_admin),
        plan,
        viewer_is_org_admin,
        branch_protection_supported: organization_supports_branch_protection(repo, plan),
    }
}

/// Repository found while paginating an organization whose details are
/// already known.
pub fn for_enumerated_repository(org: &ExtendedOrg, repo: &GraphQlRepository) -> EntityContext {
    let plan = Plan::from_name(org.organization.plan.as_ref().map(|p| p.name.as_str()));
    organization_context(repo, plan, org.viewer_is_admin)
}

/// Organization-owned repository reached through a targeted lookup. The plan
/// is not part of the lookup, so the organization is fetched.
pub async fn for_targeted_organization_repository<C: GitHubApi + ?Sized>(
    client: &C,
    lookup: &RepositoryLookup,
) -> Result<EntityContext, ScmError> {
    let organization = client.get_organization(&lookup.owner).await?;
    let plan = Plan::from_name(organization.plan.as_ref().map(|p| p.name.as_str()));
    let viewer_is_org_admin = lookup.viewer_can_administer.unwrap_or(false);
    Ok(organization_context(&lookup.repository, plan, viewer_is_org_admin))
}

/// Personal repository. The owner's plan is not visible, so branch
/// protection is always attempted.
pub fn for_user_repository(repo: &GraphQlRepository) -> EntityContext {
    EntityContext {
        roles: roles_for(repo, false),
        plan: Plan::Unknown,
        viewer_is_org_admin: false,
        branch_protection_supported: true,
    }
}
