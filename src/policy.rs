//! Policy evaluation seam and the built-in policy set.

use std::collections::BTreeMap;

use serde::Serialize;
use strum::{Display, EnumString};

use crate::collected::{CollectedData, CollectedEntity, Namespace};

/// Annotation naming predicates that must hold for a violation to count.
pub const PREREQUISITES: &str = "prerequisites";
/// Annotation naming scopes the credential needs for a violation to count.
pub const REQUIRED_SCOPES: &str = "requiredScopes";

#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// A policy result before the skip engine has judged it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ViolationCandidate {
    pub policy: String,
    pub description: String,
    pub severity: Severity,
    pub remediation: String,
    #[serde(skip)]
    pub annotations: BTreeMap<String, Vec<String>>,
    pub entity_name: String,
    pub namespace: Namespace,
    pub link: String,
}

impl ViolationCandidate {
    /// Resolved values of annotation `key`.
    pub fn annotation(&self, key: &str) -> Vec<String> {
        resolve_annotation(&self.annotations, key)
    }
}

/// Values of annotation `key`. Each raw value may itself be a comma separated
/// list; entries are trimmed and empty ones dropped.
pub fn resolve_annotation(annotations: &BTreeMap<String, Vec<String>>, key: &str) -> Vec<String> {
    annotations
        .get(key)
        .into_iter()
        .flatten()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

pub trait PolicyEngine: Send + Sync {
    fn evaluate(&self, data: &CollectedData) -> Vec<ViolationCandidate>;
}

struct Policy {
    name: &'static str,
    namespace: Namespace,
    description: &'static str,
    severity: Severity,
    remediation: &'static str,
    annotations: &'static [(&'static str, &'static str)],
    violated: fn(&CollectedEntity) -> bool,
}

impl Policy {
    fn candidate(&self, data: &CollectedData) -> ViolationCandidate {
        let mut annotations: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in self.annotations {
            annotations.entry((*key).to_string()).or_default().push((*value).to_string());
        }
        ViolationCandidate {
            policy: self.name.to_string(),
            description: self.description.to_string(),
            severity: self.severity,
            remediation: self.remediation.to_string(),
            annotations,
            entity_name: data.entity.name(),
            namespace: self.namespace,
            link: data.entity.canonical_link().to_string(),
        }
    }
}

const TOO_MANY_ADMINS: usize = 3;
const MIN_SCORECARD_SCORE: f64 = 7.0;

static POLICIES: &[Policy] = &[
    Policy {
        name: "github_repository_default_branch_not_protected",
        namespace: Namespace::Repository,
        description: "Default branch protection is not enabled",
        severity: Severity::High,
        remediation: "Add a branch protection rule for the default branch",
        annotations: &[(REQUIRED_SCOPES, "repo:admin"), (PREREQUISITES, "premium")],
        violated: |entity| match entity {
            CollectedEntity::GitHubRepository(repo) => repo
                .default_branch()
                .is_some_and(|branch| branch.branch_protection_rule.is_none()),
            _ => false,
        },
    },
    Policy {
        name: "github_repository_force_push_allowed",
        namespace: Namespace::Repository,
        description: "Default branch protection allows force pushes",
        severity: Severity::Medium,
        remediation: "Disable force pushes in the default branch protection rule",
        annotations: &[(REQUIRED_SCOPES, "repo:admin")],
        violated: |entity| match entity {
            CollectedEntity::GitHubRepository(repo) => repo
                .default_branch()
                .and_then(|branch| branch.branch_protection_rule.as_ref())
                .is_some_and(|rule| rule.allows_force_pushes),
            _ => false,
        },
    },
    Policy {
        name: "github_repository_vulnerability_alerts_disabled",
        namespace: Namespace::Repository,
        description: "Vulnerability alerts are disabled",
        severity: Severity::Medium,
        remediation: "Enable Dependabot alerts in the repository security settings",
        annotations: &[(REQUIRED_SCOPES, "repo:admin")],
        violated: |entity| match entity {
            CollectedEntity::GitHubRepository(repo) => repo.vulnerability_alerts_enabled == Some(false),
            _ => false,
        },
    },
    Policy {
        name: "github_repository_webhook_insecure_ssl",
        namespace: Namespace::Repository,
        description: "A webhook is configured without SSL verification",
        severity: Severity::High,
        remediation: "Enable SSL verification on every repository webhook",
        annotations: &[(REQUIRED_SCOPES, "read:repo_hook")],
        violated: |entity| match entity {
            CollectedEntity::GitHubRepository(repo) => {
                repo.hooks.iter().flatten().any(|hook| hook.allows_insecure_ssl())
            }
            _ => false,
        },
    },
    Policy {
        name: "github_repository_webhook_no_secret",
        namespace: Namespace::Repository,
        description: "An active webhook is configured without a secret",
        severity: Severity::Medium,
        remediation: "Configure a secret for every active repository webhook",
        annotations: &[(REQUIRED_SCOPES, "read:repo_hook")],
        violated: |entity| match entity {
            CollectedEntity::GitHubRepository(repo) => {
                repo.hooks.iter().flatten().any(|hook| hook.active && !hook.has_secret())
            }
            _ => false,
        },
    },
    Policy {
        name: "github_repository_actions_default_write",
        namespace: Namespace::Repository,
        description: "Workflows get a write token by default",
        severity: Severity::Medium,
        remediation: "Set the default workflow permissions to read-only",
        annotations: &[(REQUIRED_SCOPES, "repo:admin")],
        violated: |entity| match entity {
            CollectedEntity::GitHubRepository(repo) => repo
                .actions_token_permissions
                .as_ref()
                .is_some_and(|p| p.default_workflow_permissions == "write"),
            _ => false,
        },
    },
    Policy {
        name: "github_repository_too_many_admins",
        namespace: Namespace::Repository,
        description: "Repository has more than 3 admin collaborators",
        severity: Severity::Low,
        remediation: "Reduce the number of repository administrators",
        annotations: &[(REQUIRED_SCOPES, "repo:admin")],
        violated: |entity| match entity {
            CollectedEntity::GitHubRepository(repo) => {
                repo.collaborators.iter().flatten().filter(|c| c.permissions.admin).count()
                    > TOO_MANY_ADMINS
            }
            _ => false,
        },
    },
    Policy {
        name: "github_repository_low_scorecard",
        namespace: Namespace::Repository,
        description: "OpenSSF scorecard score is below 7",
        severity: Severity::Low,
        remediation: "Review the failing scorecard checks",
        annotations: &[(PREREQUISITES, "scorecard_enabled")],
        violated: |entity| match entity {
            CollectedEntity::GitHubRepository(repo) => {
                repo.scorecard.as_ref().is_some_and(|s| s.score < MIN_SCORECARD_SCORE)
            }
            _ => false,
        },
    },
    Policy {
        name: "github_organization_two_factor_not_required",
        namespace: Namespace::Organization,
        description: "Two-factor authentication is not required for members",
        severity: Severity::High,
        remediation: "Require two-factor authentication in the organization settings",
        annotations: &[(REQUIRED_SCOPES, "admin:org")],
        violated: |entity| match entity {
            CollectedEntity::GitHubOrganization(org) => org.two_factor_requirement_enabled != Some(true),
            _ => false,
        },
    },
    Policy {
        name: "github_organization_default_permission_too_broad",
        namespace: Namespace::Organization,
        description: "Members get write access to every repository by default",
        severity: Severity::Medium,
        remediation: "Set the base repository permission to read or none",
        annotations: &[(REQUIRED_SCOPES, "admin:org")],
        violated: |entity| match entity {
            CollectedEntity::GitHubOrganization(org) => {
                matches!(org.default_repository_permission.as_deref(), Some("write" | "admin"))
            }
            _ => false,
        },
    },
    Policy {
        name: "gitlab_repository_default_branch_not_protected",
        namespace: Namespace::Repository,
        description: "Default branch protection is not enabled",
        severity: Severity::High,
        remediation: "Protect the default branch in the project repository settings",
        annotations: &[(REQUIRED_SCOPES, "repo:admin")],
        violated: |entity| match entity {
            CollectedEntity::GitLabRepository(repo) => {
                repo.project.default_branch.is_some()
                    && repo.protected_branches.is_some()
                    && repo.default_branch_protection().is_none()
            }
            _ => false,
        },
    },
    Policy {
        name: "gitlab_repository_force_push_allowed",
        namespace: Namespace::Repository,
        description: "Default branch protection allows force pushes",
        severity: Severity::Medium,
        remediation: "Disable force pushes on the protected default branch",
        annotations: &[(REQUIRED_SCOPES, "repo:admin")],
        violated: |entity| match entity {
            CollectedEntity::GitLabRepository(repo) => {
                repo.default_branch_protection().is_some_and(|b| b.allow_force_push)
            }
            _ => false,
        },
    },
];

/// The policies shipped with the binary.
#[derive(Default)]
pub struct BuiltinPolicies;

impl PolicyEngine for BuiltinPolicies {
    fn evaluate(&self, data: &CollectedData) -> Vec<ViolationCandidate> {
        let namespace = data.entity.namespace();
        POLICIES
            .iter()
            .filter(|p| p.namespace == namespace && (p.violated)(&data.entity))
            .map(|p| p.candidate(data))
            .collect()
    }
}
