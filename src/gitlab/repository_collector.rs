//! GitLab project collection. Groups play the part GitHub organizations play.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{
    types::{role_for_access_level, Group, Project, Repository, OWNER_ACCESS},
    GitLabApi,
};
use crate::{
    accumulate::{AppendOnly, Counter},
    collected::{CollectedData, CollectedEntity, EntityContext, Namespace, Plan},
    collector::{
        spawn_collection, Collection, CollectionOutcome, Collector, Emitter, Metadata,
        OrganizationOutcome,
    },
    missing_permissions::{PermissionGap, PermissionGapRegistry},
    pagination::{collect_pages, paginate},
    permissions::Scope,
    retry::{retry, Attempt, ORGANIZATION_ATTEMPTS},
    run_context::{CollectionTarget, RunContext},
    scm_error::ScmError,
    task_group::TaskGroup,
};

pub const MEMBERS_EFFECT: &str = "Cannot read project members";
pub const PROTECTED_BRANCHES_EFFECT: &str = "Cannot read project protected branches";

/// GitLab exposes no plan to regular members, so branch protection is always
/// attempted.
pub fn project_context(project: &Project) -> EntityContext {
    let level = project.access_level().unwrap_or_default();
    EntityContext {
        roles: role_for_access_level(level).into_iter().collect(),
        plan: Plan::Unknown,
        viewer_is_org_admin: level >= OWNER_ACCESS,
        branch_protection_supported: true,
    }
}

struct ProjectDraft {
    repo: Repository,
    gaps: Vec<PermissionGap>,
}

impl ProjectDraft {
    fn failed(&mut self, step: &str, err: &ScmError, effect: &str) {
        if err.kind.is_authorization() {
            debug!("Cannot read {step} of {}: {err}", self.repo.full_name());
            self.gaps.push(PermissionGap::new(
                Scope::RepoAdmin,
                self.repo.full_name(),
                effect,
                Namespace::Repository,
            ));
        } else {
            warn!("Failed to collect {step} of {}: {err}", self.repo.full_name());
        }
    }

    async fn members<C: GitLabApi + ?Sized>(mut self, client: &C) -> Self {
        let path = self.repo.full_name().to_string();
        match collect_pages(|cursor| client.list_members(&path, cursor)).await {
            Ok(members) => self.repo.members = Some(members),
            Err(e) => self.failed("members", &e, MEMBERS_EFFECT),
        }
        self
    }

    async fn protected_branches<C: GitLabApi + ?Sized>(mut self, client: &C) -> Self {
        let path = self.repo.full_name().to_string();
        match collect_pages(|cursor| client.list_protected_branches(&path, cursor)).await {
            Ok(branches) => self.repo.protected_branches = Some(branches),
            Err(e) => self.failed("protected branches", &e, PROTECTED_BRANCHES_EFFECT),
        }
        self
    }
}

/// Group paths a run covers. `unreachable` holds `(path, error)` for requested
/// groups that could not be read.
#[derive(Debug, Default)]
struct GroupListing {
    groups: Vec<String>,
    unreachable: Vec<(String, String)>,
}

/// Requested groups that resolve, or every group the token can see.
async fn resolve_groups<C: GitLabApi>(
    client: &Arc<C>,
    target: &CollectionTarget,
) -> Result<GroupListing, ScmError> {
    let Some(requested) = target.organizations() else {
        let groups: Vec<Group> = collect_pages(|cursor| client.list_groups(cursor)).await?;
        info!("Found {} GitLab groups", groups.len());
        return Ok(GroupListing {
            groups: groups.into_iter().map(|g| g.full_path).collect(),
            unreachable: Vec::new(),
        });
    };

    let found = Arc::new(AppendOnly::new());
    let unreachable = Arc::new(AppendOnly::new());
    let mut tasks = TaskGroup::new();
    for path in requested.iter().cloned() {
        let client = Arc::clone(client);
        let found = Arc::clone(&found);
        let unreachable = Arc::clone(&unreachable);
        tasks.spawn(async move {
            match client.get_group(&path).await {
                Ok(_) => found.push(path),
                Err(e) => {
                    warn!("Failed to collect group {path}: {e}");
                    unreachable.push((path, e.to_string()));
                }
            }
        });
    }
    tasks.wait_all().await;

    let mut groups = found.take();
    groups.sort();
    let mut unreachable = unreachable.take();
    unreachable.sort();
    Ok(GroupListing { groups, unreachable })
}

pub struct RepositoryCollector<C: GitLabApi> {
    client: Arc<C>,
    ctx: Arc<RunContext>,
    registry: Arc<PermissionGapRegistry>,
    counter: Arc<Counter>,
    groups: OnceCell<GroupListing>,
}

impl<C: GitLabApi> RepositoryCollector<C> {
    pub fn new(client: Arc<C>, ctx: Arc<RunContext>, registry: Arc<PermissionGapRegistry>) -> Self {
        Self {
            client,
            ctx,
            registry,
            counter: Arc::new(Counter::new()),
            groups: OnceCell::new(),
        }
    }

    async fn groups(&self) -> Result<&GroupListing, ScmError> {
        self.groups
            .get_or_try_init(|| resolve_groups(&self.client, &self.ctx.target))
            .await
    }

    async fn process_project(&self, project: Project, emitter: &Emitter) {
        let context = project_context(&project);
        let client = self.client.as_ref();
        let draft = ProjectDraft { repo: Repository::new(project), gaps: Vec::new() }
            .members(client)
            .await
            .protected_branches(client)
            .await;
        let data = CollectedData {
            entity: CollectedEntity::GitLabRepository(Box::new(draft.repo)),
            context,
        };
        emitter.emit(data, draft.gaps);
    }

    async fn collect_specific(self: Arc<Self>, emitter: Emitter) -> CollectionOutcome {
        let targets = self.ctx.target.repositories().map(<[_]>::to_vec).unwrap_or_default();
        let outcomes = Arc::new(AppendOnly::new());
        let mut group = TaskGroup::new();
        for target in targets {
            let this = Arc::clone(&self);
            let emitter = emitter.clone();
            let outcomes = Arc::clone(&outcomes);
            group.spawn(async move {
                let path = target.to_string();
                let outcome = match this.client.get_project(&path).await {
                    Ok(project) => {
                        this.process_project(project, &emitter).await;
                        OrganizationOutcome::Collected(1)
                    }
                    Err(e) => {
                        warn!("Failed to collect project {path}: {e}");
                        OrganizationOutcome::Failed(e.to_string())
                    }
                };
                outcomes.push((path, outcome));
            });
        }
        group.wait_all().await;
        CollectionOutcome {
            organizations: outcomes.take().into_iter().collect(),
            emitted: emitter.emitted(),
        }
    }

    async fn collect_all(self: Arc<Self>, emitter: Emitter) -> Result<CollectionOutcome> {
        let listing = self.groups().await.context("Failed to enumerate GitLab groups")?;
        let outcomes = Arc::new(AppendOnly::new());
        outcomes.extend(
            listing
                .unreachable
                .iter()
                .map(|(path, e)| (path.clone(), OrganizationOutcome::Failed(e.clone()))),
        );
        let mut tasks = TaskGroup::new();
        for group in listing.groups.iter().cloned() {
            let this = Arc::clone(&self);
            let emitter = emitter.clone();
            let outcomes = Arc::clone(&outcomes);
            tasks.spawn(async move {
                let outcome = this.collect_group_with_retry(&group, &emitter).await;
                outcomes.push((group, outcome));
            });
        }
        tasks.wait_all().await;
        Ok(CollectionOutcome {
            organizations: outcomes.take().into_iter().collect(),
            emitted: emitter.emitted(),
        })
    }

    async fn collect_group_with_retry(self: &Arc<Self>, group: &str, emitter: &Emitter) -> OrganizationOutcome {
        let seen = Mutex::new(HashSet::new());
        let label = format!("collect projects of {group}");
        let seen_ref = &seen;
        let result = retry(
            move || async move {
                match self.collect_group(group, emitter, seen_ref).await {
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
            Ok(0) => OrganizationOutcome::Empty,
            Ok(n) => {
                info!("Collected {n} projects from {group}");
                OrganizationOutcome::Collected(n)
            }
            Err(e) => {
                warn!("Failed to collect projects of {group}: {e:#}");
                OrganizationOutcome::Failed(format!("{e:#}"))
            }
        }
    }

    async fn collect_group(
        self: &Arc<Self>,
        group: &str,
        emitter: &Emitter,
        seen: &Mutex<HashSet<u64>>,
    ) -> Result<usize, ScmError> {
        paginate(
            |cursor| self.client.list_group_projects(group, cursor),
            |projects| {
                let mut tasks = TaskGroup::new();
                for project in projects {
                    if !seen.lock().unwrap_or_else(PoisonError::into_inner).insert(project.id) {
                        continue;
                    }
                    let this = Arc::clone(self);
                    let emitter = emitter.clone();
                    tasks.spawn(async move { this.process_project(project, &emitter).await });
                }
                async move { tasks.wait_all().await }
            },
        )
        .await
    }
}

#[async_trait]
impl<C: GitLabApi> Collector for RepositoryCollector<C> {
    fn namespace(&self) -> Namespace {
        Namespace::Repository
    }

    async fn collect_metadata(&self) -> Metadata {
        if let Some(repositories) = self.ctx.target.repositories() {
            return Metadata { total_entities: repositories.len() };
        }
        let groups = match self.groups().await {
            Ok(listing) => listing.groups.clone(),
            Err(e) => {
                debug!("Cannot estimate project count: {e}");
                return Metadata::default();
            }
        };
        let total = Arc::new(Counter::new());
        let mut tasks = TaskGroup::new();
        for group in groups {
            let client = Arc::clone(&self.client);
            let total = Arc::clone(&total);
            tasks.spawn(async move {
                match client.count_group_projects(&group).await {
                    Ok(n) => {
                        total.add(n);
                    }
                    Err(e) => debug!("Cannot count projects of {group}: {e}"),
                }
            });
        }
        tasks.wait_all().await;
        Metadata { total_entities: total.get() }
    }

    fn collect(self: Arc<Self>) -> Collection {
        let registry = Arc::clone(&self.registry);
        let counter = Arc::clone(&self.counter);
        spawn_collection(Namespace::Repository, registry, counter, move |emitter| async move {
            if self.ctx.target.repositories().is_some() {
                Ok(self.collect_specific(emitter).await)
            } else {
                self.collect_all(emitter).await
            }
        })
    }
}
