//! Access scopes, roles, and the tables that relate them.
//!
//! A required scope is satisfied when the credential holds it directly, holds a
//! raw scope that implies it, or holds a role on the subject entity that
//! implies it. Both implications are plain data below.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Well-known scopes used by collectors when recording permission gaps and by
/// policies in their `requiredScopes` annotation.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
pub enum Scope {
    #[strum(serialize = "admin:org")]
    #[serde(rename = "admin:org")]
    OrgAdmin,
    #[strum(serialize = "read:org")]
    #[serde(rename = "read:org")]
    OrgRead,
    #[strum(serialize = "repo:admin")]
    #[serde(rename = "repo:admin")]
    RepoAdmin,
    #[strum(serialize = "admin:repo_hook")]
    #[serde(rename = "admin:repo_hook")]
    RepoHookAdmin,
    #[strum(serialize = "read:repo_hook")]
    #[serde(rename = "read:repo_hook")]
    RepoHookRead,
    #[strum(serialize = "repo")]
    #[serde(rename = "repo")]
    Repo,
}

/// Role held by the running credential on a specific entity.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    OrgAdmin,
    OrgMember,
    RepoAdmin,
    Maintainer,
    Writer,
    Triager,
    Reader,
}

static ROLE_SCOPES: &[(Role, &[Scope])] = &[
    (
        Role::OrgAdmin,
        &[
            Scope::OrgAdmin,
            Scope::OrgRead,
            Scope::RepoAdmin,
            Scope::RepoHookAdmin,
            Scope::RepoHookRead,
        ],
    ),
    (Role::OrgMember, &[Scope::OrgRead]),
    (Role::RepoAdmin, &[Scope::RepoAdmin, Scope::RepoHookAdmin, Scope::RepoHookRead]),
];

static SCOPE_IMPLIES: &[(&str, &[Scope])] = &[
    ("admin:org", &[Scope::OrgRead]),
    ("write:org", &[Scope::OrgRead]),
    ("admin:repo_hook", &[Scope::RepoHookRead]),
    ("write:repo_hook", &[Scope::RepoHookRead]),
];

/// Raw scope identifiers granted to the running credential.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TokenScopes(BTreeSet<String>);

impl TokenScopes {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(scopes.into_iter().map(Into::into).collect())
    }

    /// Parse a comma separated header value such as GitHub's `X-OAuth-Scopes`.
    pub fn from_header(value: &str) -> Self {
        Self::new(value.split(',').map(str::trim).filter(|s| !s.is_empty()))
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    fn implies(&self, scope: Scope) -> bool {
        SCOPE_IMPLIES
            .iter()
            .any(|(raw, implied)| self.contains(raw) && implied.contains(&scope))
    }
}

pub fn role_implies(role: Role, scope: Scope) -> bool {
    ROLE_SCOPES
        .iter()
        .find(|(r, _)| *r == role)
        .is_some_and(|(_, scopes)| scopes.contains(&scope))
}

/// Whether `required` is satisfied by the credential's raw scopes or by a role
/// it holds on the subject entity.
pub fn has_scope(required: &str, available: &TokenScopes, roles: &[Role]) -> bool {
    if available.contains(required) {
        return true;
    }
    let Ok(scope) = required.parse::<Scope>() else {
        return false;
    };
    available.implies(scope) || roles.iter().any(|role| role_implies(*role, scope))
}
