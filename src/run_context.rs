use std::{fmt, str::FromStr, sync::Arc};

use anyhow::{bail, Result};
use clap::ValueEnum;
use serde::Serialize;
use strum::{Display, EnumString};

use crate::{collected::Namespace, permissions::TokenScopes};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Display, EnumString, Serialize, ValueEnum)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScmType {
    #[default]
    #[value(name = "github")]
    GitHub,
    #[value(name = "gitlab")]
    GitLab,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RepositoryWithOwner {
    pub owner: String,
    pub name: String,
}

impl RepositoryWithOwner {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self { owner: owner.into(), name: name.into() }
    }
}

impl fmt::Display for RepositoryWithOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepositoryWithOwner {
    type Err = anyhow::Error;

    /// Accepts `owner/name`. GitLab paths may carry subgroups, in which case
    /// everything before the last `/` is the owner.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
        let Some((owner, name)) = trimmed.rsplit_once('/') else {
            bail!("invalid repository '{s}': expected <owner>/<name>");
        };
        if owner.is_empty() || name.is_empty() || owner.split('/').any(str::is_empty) {
            bail!("invalid repository '{s}': expected <owner>/<name>");
        }
        Ok(Self::new(owner, name))
    }
}

/// Which entities a run looks at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CollectionTarget {
    #[default]
    AllOrganizations,
    Organizations(Vec<String>),
    Repositories(Vec<RepositoryWithOwner>),
}

impl CollectionTarget {
    /// Build a target from the raw `--org` / `--repo` values.
    pub fn from_args(organizations: &[String], repositories: &[String]) -> Result<Self> {
        match (organizations.is_empty(), repositories.is_empty()) {
            (true, true) => Ok(CollectionTarget::AllOrganizations),
            (false, true) => Ok(CollectionTarget::Organizations(organizations.to_vec())),
            (true, false) => Ok(CollectionTarget::Repositories(
                repositories.iter().map(|r| r.parse()).collect::<Result<_>>()?,
            )),
            (false, false) => bail!("organizations and repositories cannot be combined"),
        }
    }

    pub fn repositories(&self) -> Option<&[RepositoryWithOwner]> {
        match self {
            CollectionTarget::Repositories(repos) => Some(repos),
            _ => None,
        }
    }

    /// `None` means every reachable organization.
    pub fn organizations(&self) -> Option<&[String]> {
        match self {
            CollectionTarget::Organizations(orgs) => Some(orgs),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ScorecardMode {
    pub enabled: bool,
    pub verbose: bool,
}

/// Everything a run needs to know, fixed before any collector starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunContext {
    pub scm: ScmType,
    pub target: CollectionTarget,
    pub namespaces: Vec<Namespace>,
    pub scorecard: ScorecardMode,
    pub token_scopes: TokenScopes,
}

impl RunContext {
    pub fn builder(scm: ScmType, target: CollectionTarget) -> RunContextBuilder {
        RunContextBuilder {
            scm,
            target,
            namespaces: Vec::new(),
            scorecard: ScorecardMode::default(),
            token_scopes: TokenScopes::default(),
        }
    }

    pub fn scorecard_enabled(&self) -> bool {
        self.scorecard.enabled
    }
}

pub struct RunContextBuilder {
    scm: ScmType,
    target: CollectionTarget,
    namespaces: Vec<Namespace>,
    scorecard: ScorecardMode,
    token_scopes: TokenScopes,
}

impl RunContextBuilder {
    pub fn namespaces(mut self, namespaces: &[Namespace]) -> Self {
        self.namespaces = namespaces.to_vec();
        self
    }

    pub fn scorecard(mut self, scorecard: ScorecardMode) -> Self {
        self.scorecard = scorecard;
        self
    }

    pub fn token_scopes(mut self, token_scopes: TokenScopes) -> Self {
        self.token_scopes = token_scopes;
        self
    }

    /// Repository targets only make sense for the repository namespace; GitLab
    /// has no organization collector.
    pub fn build(self) -> Result<Arc<RunContext>> {
        let mut namespaces = if self.namespaces.is_empty() {
            vec![Namespace::Organization, Namespace::Repository]
        } else {
            self.namespaces
        };
        if matches!(self.target, CollectionTarget::Repositories(_)) || self.scm == ScmType::GitLab
        {
            namespaces.retain(|ns| *ns == Namespace::Repository);
        }
        namespaces.sort();
        namespaces.dedup();
        if namespaces.is_empty() {
            bail!("no collectable namespace selected for {} with this target", self.scm);
        }
        Ok(Arc::new(RunContext {
            scm: self.scm,
            target: self.target,
            namespaces,
            scorecard: self.scorecard,
            token_scopes: self.token_scopes,
        }))
    }
}
