use serde::{Deserialize, Serialize};

use crate::permissions::Role;

pub const OWNER_ACCESS: u32 = 50;
pub const MAINTAINER_ACCESS: u32 = 40;
pub const DEVELOPER_ACCESS: u32 = 30;

/// Map a GitLab access level to the role it grants.
pub fn role_for_access_level(level: u32) -> Option<Role> {
    match level {
        l if l >= OWNER_ACCESS => Some(Role::OrgAdmin),
        l if l >= MAINTAINER_ACCESS => Some(Role::RepoAdmin),
        l if l >= DEVELOPER_ACCESS => Some(Role::Writer),
        l if l >= 10 => Some(Role::Reader),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Group {
    pub id: u64,
    pub full_path: String,
    #[serde(default)]
    pub web_url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AccessLevel {
    pub access_level: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProjectPermissions {
    #[serde(default)]
    pub project_access: Option<AccessLevel>,
    #[serde(default)]
    pub group_access: Option<AccessLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub path_with_namespace: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub visibility: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub permissions: Option<ProjectPermissions>,
}

impl Project {
    /// Highest of the project and inherited group access levels.
    pub fn access_level(&self) -> Option<u32> {
        let permissions = self.permissions.as_ref()?;
        [permissions.project_access, permissions.group_access]
            .into_iter()
            .flatten()
            .map(|a| a.access_level)
            .max()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Member {
    pub id: u64,
    pub username: String,
    pub access_level: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BranchAccessLevel {
    #[serde(default)]
    pub access_level: Option<u32>,
    #[serde(default)]
    pub access_level_description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProtectedBranch {
    pub name: String,
    #[serde(default)]
    pub allow_force_push: bool,
    #[serde(default)]
    pub push_access_levels: Vec<BranchAccessLevel>,
    #[serde(default)]
    pub merge_access_levels: Vec<BranchAccessLevel>,
}

/// A GitLab project with its optional attachments; `None` means the fetch did
/// not succeed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Repository {
    pub project: Project,
    pub members: Option<Vec<Member>>,
    pub protected_branches: Option<Vec<ProtectedBranch>>,
}

impl Repository {
    pub fn new(project: Project) -> Self {
        Self { project, ..Self::default() }
    }

    pub fn full_name(&self) -> &str {
        &self.project.path_with_namespace
    }

    pub fn default_branch_protection(&self) -> Option<&ProtectedBranch> {
        let branch = self.project.default_branch.as_deref()?;
        self.protected_branches.as_ref()?.iter().find(|b| b.name == branch)
    }
}
