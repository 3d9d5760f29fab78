//! GitHub repository collection: enumerate, enrich, emit.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{
    collect_organizations, context,
    types::{ExtendedOrg, GraphQlRepository, Repository},
    GitHubApi, OrganizationListing,
};
use crate::{
    accumulate::{AppendOnly, Counter},
    collected::{CollectedData, CollectedEntity, EntityContext, Namespace},
    collector::{
        spawn_collection, Collection, CollectionOutcome, Collector, Emitter, Metadata,
        OrganizationOutcome,
    },
    missing_permissions::{PermissionGap, PermissionGapRegistry},
    pagination::{collect_pages, paginate},
    permissions::Scope,
    retry::{retry, Attempt, ORGANIZATION_ATTEMPTS},
    run_context::{RepositoryWithOwner, RunContext},
    scm_error::{ScmError, ScmErrorKind},
    scorecard::ScorecardRunner,
    task_group::TaskGroup,
};

pub const VULNERABILITY_ALERTS_EFFECT: &str = "Cannot read repository vulnerability alerts setting";
pub const HOOKS_EFFECT: &str = "Cannot read repository webhooks";
pub const COLLABORATORS_EFFECT: &str = "Cannot read repository collaborators";
pub const ACTIONS_EFFECT: &str = "Cannot read repository actions settings";
pub const DEPENDENCY_GRAPH_EFFECT: &str = "Cannot read repository dependency graph";
pub const BRANCH_PROTECTION_EFFECT: &str = "Cannot read repository branch protection information";
pub const FREE_PLAN_EFFECT: &str =
    "Branch protection cannot be collected because the organization is in free plan";

/// A repository being enriched. Each step takes the draft by value and hands
/// it back with one more attachment filled in, or with a gap recorded.
pub struct RepositoryDraft {
    repo: Repository,
    context: EntityContext,
    gaps: Vec<PermissionGap>,
}

impl RepositoryDraft {
    pub fn new(owner: impl Into<String>, repository: GraphQlRepository, context: EntityContext) -> Self {
        Self { repo: Repository::new(owner, repository), context, gaps: Vec::new() }
    }

    fn gap(&mut self, permission: Scope, effect: &str) {
        self.gaps.push(PermissionGap::new(
            permission,
            self.repo.full_name(),
            effect,
            Namespace::Repository,
        ));
    }

    /// Authorization failures become gaps; anything else only leaves the
    /// attachment unset.
    fn failed(&mut self, step: &str, err: &ScmError, permission: Scope, effect: &str) {
        if err.kind.is_authorization() {
            debug!("Cannot read {step} of {}: {err}", self.repo.full_name());
            self.gap(permission, effect);
        } else {
            warn!("Failed to collect {step} of {}: {err}", self.repo.full_name());
        }
    }

    pub async fn vulnerability_alerts<C: GitHubApi + ?Sized>(mut self, client: &C) -> Self {
        match client.get_vulnerability_alerts(&self.repo.owner, self.repo.name()).await {
            Ok(enabled) => self.repo.vulnerability_alerts_enabled = Some(enabled),
            Err(e) => self.failed("vulnerability alerts", &e, Scope::RepoAdmin, VULNERABILITY_ALERTS_EFFECT),
        }
        self
    }

    pub async fn hooks<C: GitHubApi + ?Sized>(mut self, client: &C) -> Self {
        let (owner, name) = (self.repo.owner.clone(), self.repo.name().to_string());
        match collect_pages(|cursor| client.list_hooks(&owner, &name, cursor)).await {
            Ok(hooks) => self.repo.hooks = Some(hooks),
            Err(e) => self.failed("webhooks", &e, Scope::RepoHookRead, HOOKS_EFFECT),
        }
        self
    }

    pub async fn collaborators<C: GitHubApi + ?Sized>(mut self, client: &C) -> Self {
        let (owner, name) = (self.repo.owner.clone(), self.repo.name().to_string());
        match collect_pages(|cursor| client.list_collaborators(&owner, &name, cursor)).await {
            Ok(collaborators) => self.repo.collaborators = Some(collaborators),
            Err(e) => self.failed("collaborators", &e, Scope::RepoAdmin, COLLABORATORS_EFFECT),
        }
        self
    }

    pub async fn actions_token_permissions<C: GitHubApi + ?Sized>(mut self, client: &C) -> Self {
        match client.get_actions_token_permissions(&self.repo.owner, self.repo.name()).await {
            Ok(permissions) => self.repo.actions_token_permissions = Some(permissions),
            Err(e) => self.failed("actions settings", &e, Scope::RepoAdmin, ACTIONS_EFFECT),
        }
        self
    }

    pub async fn dependency_graph<C: GitHubApi + ?Sized>(mut self, client: &C) -> Self {
        match client.get_dependency_graph_manifests(&self.repo.owner, self.repo.name()).await {
            Ok(manifests) => self.repo.dependency_graph_manifests = Some(manifests),
            Err(e) => self.failed("dependency graph", &e, Scope::RepoAdmin, DEPENDENCY_GRAPH_EFFECT),
        }
        self
    }

    /// The base query leaves the rule empty both for unprotected branches and
    /// for viewers who may not read it; the REST endpoint tells them apart.
    pub async fn branch_protection<C: GitHubApi + ?Sized>(mut self, client: &C) -> Self {
        if !self.context.branch_protection_supported {
            self.gap(Scope::RepoAdmin, FREE_PLAN_EFFECT);
            return self;
        }
        let Some(branch) = self.repo.default_branch() else {
            debug!("{} has no default branch", self.repo.full_name());
            return self;
        };
        if branch.branch_protection_rule.is_some() {
            return self;
        }
        let branch = branch.name.clone();

        match client.get_branch_protection(&self.repo.owner, self.repo.name(), &branch).await {
            Ok(_) => warn!(
                "Branch {branch} of {} is protected but the repository query reported no rule",
                self.repo.full_name()
            ),
            Err(e) => match e.kind {
                ScmErrorKind::BranchNotProtected => {
                    debug!("Branch {branch} of {} is not protected", self.repo.full_name())
                }
                ScmErrorKind::FeatureUnsupported => self.gap(Scope::RepoAdmin, FREE_PLAN_EFFECT),
                kind if kind.is_authorization() => {
                    self.repo.no_branch_protection_permission = true;
                    self.gap(Scope::RepoAdmin, BRANCH_PROTECTION_EFFECT);
                }
                _ => warn!(
                    "Failed to collect branch protection of {}: {e}",
                    self.repo.full_name()
                ),
            },
        }
        self
    }

    pub async fn scorecard(mut self, runner: &dyn ScorecardRunner) -> Self {
        let url = self.repo.repository.url.clone();
        match runner.calculate(&url, self.repo.repository.is_private).await {
            Ok(result) => self.repo.scorecard = Some(result),
            Err(e) => warn!("Failed to calculate scorecard of {}: {e:#}", self.repo.full_name()),
        }
        self
    }

    pub fn finish(self) -> (CollectedData, Vec<PermissionGap>) {
        let data = CollectedData {
            entity: CollectedEntity::GitHubRepository(Box::new(self.repo)),
            context: self.context,
        };
        (data, self.gaps)
    }
}

pub struct RepositoryCollector<C: GitHubApi> {
    client: Arc<C>,
    ctx: Arc<RunContext>,
    registry: Arc<PermissionGapRegistry>,
    counter: Arc<Counter>,
    scorecard: Option<Arc<dyn ScorecardRunner>>,
    organizations: OnceCell<OrganizationListing>,
}

impl<C: GitHubApi> RepositoryCollector<C> {
    pub fn new(client: Arc<C>, ctx: Arc<RunContext>, registry: Arc<PermissionGapRegistry>) -> Self {
        Self {
            client,
            ctx,
            registry,
            counter: Arc::new(Counter::new()),
            scorecard: None,
            organizations: OnceCell::new(),
        }
    }

    pub fn with_scorecard(mut self, runner: Arc<dyn ScorecardRunner>) -> Self {
        self.scorecard = Some(runner);
        self
    }

    async fn organizations(&self) -> Result<&OrganizationListing, ScmError> {
        self.organizations
            .get_or_try_init(|| collect_organizations(&self.client, &self.ctx.target))
            .await
    }

    async fn process_repository(
        &self,
        owner: String,
        repository: GraphQlRepository,
        context: EntityContext,
        emitter: &Emitter,
    ) {
        let client = self.client.as_ref();
        let mut draft = RepositoryDraft::new(owner, repository, context)
            .vulnerability_alerts(client)
            .await
            .hooks(client)
            .await
            .collaborators(client)
            .await
            .actions_token_permissions(client)
            .await
            .dependency_graph(client)
            .await
            .branch_protection(client)
            .await;
        if let Some(runner) = &self.scorecard {
            draft = draft.scorecard(runner.as_ref()).await;
        }
        let (data, gaps) = draft.finish();
        emitter.emit(data, gaps);
    }

    async fn collect_specific(
        self: Arc<Self>,
        repositories: Vec<RepositoryWithOwner>,
        emitter: Emitter,
    ) -> CollectionOutcome {
        let outcomes = Arc::new(AppendOnly::new());
        let mut group = TaskGroup::new();
        for target in repositories {
            let this = Arc::clone(&self);
            let emitter = emitter.clone();
            let outcomes = Arc::clone(&outcomes);
            group.spawn(async move {
                let outcome = match this.collect_one(&target, &emitter).await {
                    Ok(()) => OrganizationOutcome::Collected(1),
                    Err(e) => {
                        warn!("Failed to collect repository {target}: {e}");
                        OrganizationOutcome::Failed(e.to_string())
                    }
                };
                outcomes.push((target.to_string(), outcome));
            });
        }
        group.wait_all().await;
        CollectionOutcome {
            organizations: outcomes.take().into_iter().collect(),
            emitted: emitter.emitted(),
        }
    }

    async fn collect_one(&self, target: &RepositoryWithOwner, emitter: &Emitter) -> Result<(), ScmError> {
        let lookup = self.client.get_repository(&target.owner, &target.name).await?;
        let context = if lookup.viewer_can_administer.is_some() {
            context::for_targeted_organization_repository(self.client.as_ref(), &lookup).await?
        } else {
            context::for_user_repository(&lookup.repository)
        };
        self.process_repository(lookup.owner, lookup.repository, context, emitter).await;
        Ok(())
    }

    async fn collect_all(self: Arc<Self>, emitter: Emitter) -> Result<CollectionOutcome> {
        let listing = self
            .organizations()
            .await
            .context("Failed to enumerate GitHub organizations")?;
        let orgs = listing.organizations.clone();

        let outcomes = Arc::new(AppendOnly::new());
        outcomes.extend(
            listing
                .unreachable
                .iter()
                .map(|(name, e)| (name.clone(), OrganizationOutcome::Failed(e.clone()))),
        );
        let mut group = TaskGroup::new();
        for org in orgs {
            let this = Arc::clone(&self);
            let emitter = emitter.clone();
            let outcomes = Arc::clone(&outcomes);
            group.spawn(async move {
                let outcome = this.collect_organization_with_retry(&org, &emitter).await;
                outcomes.push((org.name().to_string(), outcome));
            });
        }
        group.wait_all().await;

        Ok(CollectionOutcome {
            organizations: outcomes.take().into_iter().collect(),
            emitted: emitter.emitted(),
        })
    }

    async fn collect_organization_with_retry(
        self: &Arc<Self>,
        org: &Arc<ExtendedOrg>,
        emitter: &Emitter,
    ) -> OrganizationOutcome {
        // Repositories finished by a failed attempt are not emitted again.
        let seen = Mutex::new(HashSet::new());
        let label = format!("collect repositories of {}", org.name());
        let (this, seen_ref) = (self, &seen);
        let result = retry(
            move || async move {
                match this.collect_organization(org, emitter, seen_ref).await {
                    Ok(n) => Attempt::Done(Ok(n)),
                    Err(e) if e.kind.is_transient() => Attempt::Again(e.into()),
                    Err(e) => Attempt::Done(Err(e.into())),
                }
            },
            ORGANIZATION_ATTEMPTS,
            &label,
        )
        .await;

        match result {
            Ok(0) => {
                info!("No repositories found in {}", org.name());
                OrganizationOutcome::Empty
            }
            Ok(n) => {
                info!("Collected {n} repositories from {}", org.name());
                OrganizationOutcome::Collected(n)
            }
            Err(e) => {
                warn!("Failed to collect repositories of {}: {e:#}", org.name());
                OrganizationOutcome::Failed(format!("{e:#}"))
            }
        }
    }

    async fn collect_organization(
        self: &Arc<Self>,
        org: &Arc<ExtendedOrg>,
        emitter: &Emitter,
        seen: &Mutex<HashSet<String>>,
    ) -> Result<usize, ScmError> {
        let login = org.name();
        paginate(
            |cursor| self.client.list_repositories(login, cursor),
            |repositories| {
                let mut group = TaskGroup::new();
                for repository in repositories {
                    if !first_visit(seen, &repository.name) {
                        continue;
                    }
                    let this = Arc::clone(self);
                    let org = Arc::clone(org);
                    let emitter = emitter.clone();
                    group.spawn(async move {
                        let context = context::for_enumerated_repository(&org, &repository);
                        this.process_repository(org.name().to_string(), repository, context, &emitter)
                            .await;
                    });
                }
                debug!("Collecting {} repositories of {login}", group.len());
                async move { group.wait_all().await }
            },
        )
        .await
    }
}

fn first_visit(seen: &Mutex<HashSet<String>>, name: &str) -> bool {
    seen.lock().unwrap_or_else(PoisonError::into_inner).insert(name.to_string())
}

#[async_trait]
impl<C: GitHubApi> Collector for RepositoryCollector<C> {
    fn namespace(&self) -> Namespace {
        Namespace::Repository
    }

    async fn collect_metadata(&self) -> Metadata {
        if let Some(repositories) = self.ctx.target.repositories() {
            return Metadata { total_entities: repositories.len() };
        }
        let orgs = match self.organizations().await {
            Ok(listing) => listing.organizations.clone(),
            Err(e) => {
                debug!("Cannot estimate repository count: {e}");
                return Metadata::default();
            }
        };

        let total = Arc::new(Counter::new());
        let mut group = TaskGroup::new();
        for org in orgs {
            let client = Arc::clone(&self.client);
            let total = Arc::clone(&total);
            group.spawn(async move {
                match client.count_repositories(org.name()).await {
                    Ok(n) => {
                        total.add(n);
                    }
                    Err(e) => debug!("Cannot count repositories of {}: {e}", org.name()),
                }
            });
        }
        group.wait_all().await;
        Metadata { total_entities: total.get() }
    }

    fn collect(self: Arc<Self>) -> Collection {
        let registry = Arc::clone(&self.registry);
        let counter = Arc::clone(&self.counter);
        spawn_collection(Namespace::Repository, registry, counter, move |emitter| async move {
            match self.ctx.target.repositories() {
                Some(repositories) => {
                    let repositories = repositories.to_vec();
                    Ok(Arc::clone(&self).collect_specific(repositories, emitter).await)
                }
                None => Arc::clone(&self).collect_all(emitter).await,
            }
        })
    }
}
