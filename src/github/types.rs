use serde::{Deserialize, Serialize};

use crate::{permissions::Role, scorecard::ScorecardResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchProtectionRule {
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub requires_approving_reviews: bool,
    #[serde(default)]
    pub required_approving_review_count: Option<u32>,
    #[serde(default)]
    pub requires_status_checks: bool,
    #[serde(default)]
    pub requires_strict_status_checks: bool,
    #[serde(default)]
    pub dismisses_stale_reviews: bool,
    #[serde(default)]
    pub requires_code_owner_reviews: bool,
    #[serde(default)]
    pub allows_force_pushes: bool,
    #[serde(default)]
    pub allows_deletions: bool,
    #[serde(default)]
    pub is_admin_enforced: bool,
    #[serde(default)]
    pub requires_linear_history: bool,
    #[serde(default)]
    pub requires_commit_signatures: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultBranchRef {
    pub name: String,
    /// `None` either because the branch is unprotected or because the viewer
    /// may not read the rule; the collector disambiguates.
    #[serde(default)]
    pub branch_protection_rule: Option<BranchProtectionRule>,
}

/// Base repository object returned by the GraphQL enumeration and targeted
/// queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlRepository {
    pub name: String,
    #[serde(default)]
    pub name_with_owner: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_fork: bool,
    /// `ADMIN`, `MAINTAIN`, `WRITE`, `TRIAGE` or `READ`.
    #[serde(default)]
    pub viewer_permission: Option<String>,
    #[serde(default)]
    pub default_branch_ref: Option<DefaultBranchRef>,
}

impl GraphQlRepository {
    pub fn viewer_role(&self) -> Option<Role> {
        match self.viewer_permission.as_deref()? {
            "ADMIN" => Some(Role::RepoAdmin),
            "MAINTAIN" => Some(Role::Maintainer),
            "WRITE" => Some(Role::Writer),
            "TRIAGE" => Some(Role::Triager),
            "READ" => Some(Role::Reader),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct HookConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    /// GitHub sends this as either `"0"`/`"1"` or a number.
    #[serde(default)]
    pub insecure_ssl: Option<serde_json::Value>,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Hook {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub config: HookConfig,
}

impl Hook {
    pub fn allows_insecure_ssl(&self) -> bool {
        match &self.config.insecure_ssl {
            Some(serde_json::Value::String(s)) => s == "1",
            Some(serde_json::Value::Number(n)) => n.as_u64() == Some(1),
            _ => false,
        }
    }

    pub fn has_secret(&self) -> bool {
        self.config.secret.as_deref().is_some_and(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CollaboratorPermissions {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub maintain: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub triage: bool,
    #[serde(default)]
    pub pull: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Collaborator {
    pub login: String,
    #[serde(default)]
    pub permissions: CollaboratorPermissions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActionsTokenPermissions {
    /// `read` or `write`.
    pub default_workflow_permissions: String,
    #[serde(default)]
    pub can_approve_pull_request_reviews: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DependencyGraphManifests {
    pub total_count: u64,
}

/// A GitHub repository with every attachment the collector gathers. Each
/// `Option` stays `None` when the corresponding fetch did not succeed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Repository {
    pub repository: GraphQlRepository,
    pub owner: String,
    pub vulnerability_alerts_enabled: Option<bool>,
    pub hooks: Option<Vec<Hook>>,
    pub collaborators: Option<Vec<Collaborator>>,
    pub actions_token_permissions: Option<ActionsTokenPermissions>,
    pub dependency_graph_manifests: Option<DependencyGraphManifests>,
    pub no_branch_protection_permission: bool,
    pub scorecard: Option<ScorecardResult>,
}

impl Repository {
    pub fn new(owner: impl Into<String>, repository: GraphQlRepository) -> Self {
        Self { repository, owner: owner.into(), ..Self::default() }
    }

    pub fn name(&self) -> &str {
        &self.repository.name
    }

    pub fn full_name(&self) -> String {
        full_repo_name(&self.owner, &self.repository.name)
    }

    pub fn default_branch(&self) -> Option<&DefaultBranchRef> {
        self.repository.default_branch_ref.as_ref()
    }
}

pub fn full_repo_name(owner: &str, name: &str) -> String {
    format!("{owner}/{name}")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Plan {
    pub name: String,
}

/// `GET /orgs/{org}`. Plan and security settings are only visible to owners.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Organization {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub two_factor_requirement_enabled: Option<bool>,
    #[serde(default)]
    pub default_repository_permission: Option<String>,
    #[serde(default)]
    pub members_can_create_public_repositories: Option<bool>,
    #[serde(default)]
    pub web_commit_signoff_required: Option<bool>,
}

/// Entry of `GET /user/memberships/orgs`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrganizationMembership {
    pub role: String,
    pub organization: MembershipOrganization,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MembershipOrganization {
    pub login: String,
}

impl OrganizationMembership {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// An organization together with what the credential may do in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedOrg {
    pub organization: Organization,
    pub viewer_is_admin: bool,
}

impl ExtendedOrg {
    pub fn name(&self) -> &str {
        &self.organization.login
    }
}

/// Result of a targeted `repositoryOwner { repository }` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryLookup {
    pub owner: String,
    /// `Some` when the owner is an organization, `None` for personal accounts.
    pub viewer_can_administer: Option<bool>,
    pub repository: GraphQlRepository,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_graphql_repository() {
        let repo: GraphQlRepository = serde_json::from_value(serde_json::json!({
            "name": "api",
            "nameWithOwner": "acme/api",
            "url": "https://github.com/acme/api",
            "isPrivate": true,
            "viewerPermission": "MAINTAIN",
            "defaultBranchRef": { "name": "main", "branchProtectionRule": null }
        }))
        .unwrap();
        assert!(repo.is_private);
        assert_eq!(repo.viewer_role(), Some(Role::Maintainer));
        assert_eq!(repo.default_branch_ref.unwrap().branch_protection_rule, None);
    }

    #[test]
    fn insecure_ssl_accepts_strings_and_numbers() {
        let mut hook = Hook::default();
        hook.config.insecure_ssl = Some(serde_json::json!("1"));
        assert!(hook.allows_insecure_ssl());
        hook.config.insecure_ssl = Some(serde_json::json!(0));
        assert!(!hook.allows_insecure_ssl());
        hook.config.insecure_ssl = Some(serde_json::json!(1));
        assert!(hook.allows_insecure_ssl());
    }
}
