use clap::ValueEnum;
use serde::Serialize;
use strum::{Display, EnumString};

use crate::{github, gitlab, missing_permissions::PermissionGap, permissions::Role};

/// Entity category a collector walks.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, Serialize, ValueEnum,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Organization,
    Repository,
}

/// Billing tier of the entity's owner, as far as the credential can tell.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Paid,
    #[default]
    Unknown,
}

impl Plan {
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some(n) if n.eq_ignore_ascii_case("free") => Plan::Free,
            Some(_) => Plan::Paid,
            None => Plan::Unknown,
        }
    }
}

/// Capability snapshot computed once per entity, before its privileged
/// sub-fetches. Never mutated afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EntityContext {
    pub roles: Vec<Role>,
    pub plan: Plan,
    pub viewer_is_org_admin: bool,
    pub branch_protection_supported: bool,
}

impl EntityContext {
    pub fn premium(&self) -> bool {
        self.plan == Plan::Paid
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollectedEntity {
    GitHubOrganization(github::types::Organization),
    GitHubRepository(Box<github::types::Repository>),
    GitLabRepository(Box<gitlab::types::Repository>),
}

impl CollectedEntity {
    pub fn namespace(&self) -> Namespace {
        match self {
            CollectedEntity::GitHubOrganization(_) => Namespace::Organization,
            CollectedEntity::GitHubRepository(_) | CollectedEntity::GitLabRepository(_) => {
                Namespace::Repository
            }
        }
    }

    /// Name used in reports and permission gaps (`owner/repo` for repositories).
    pub fn name(&self) -> String {
        match self {
            CollectedEntity::GitHubOrganization(org) => org.login.clone(),
            CollectedEntity::GitHubRepository(repo) => repo.full_name(),
            CollectedEntity::GitLabRepository(repo) => repo.full_name().to_string(),
        }
    }

    pub fn canonical_link(&self) -> &str {
        match self {
            CollectedEntity::GitHubOrganization(org) => &org.html_url,
            CollectedEntity::GitHubRepository(repo) => &repo.repository.url,
            CollectedEntity::GitLabRepository(repo) => &repo.project.web_url,
        }
    }
}

/// An entity paired with the context it was collected under.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CollectedData {
    pub entity: CollectedEntity,
    pub context: EntityContext,
}

/// What a collector emits: the entity and the gaps discovered while
/// assembling it.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectedItem {
    pub data: CollectedData,
    pub missing_permissions: Vec<PermissionGap>,
}
