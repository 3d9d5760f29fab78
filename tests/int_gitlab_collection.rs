use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use scmguard::{
    collected::{CollectedEntity, CollectedItem, Namespace},
    collector::{Collection, CollectionOutcome, Collector, OrganizationOutcome},
    gitlab::{
        repository_collector::{MEMBERS_EFFECT, PROTECTED_BRANCHES_EFFECT},
        types::{AccessLevel, Group, Member, Project, ProjectPermissions, ProtectedBranch, Repository},
        GitLabApi, RepositoryCollector,
    },
    missing_permissions::{PermissionGap, PermissionGapRegistry},
    pagination::Page,
    permissions::{Role, Scope, TokenScopes},
    run_context::{CollectionTarget, RepositoryWithOwner, RunContext, ScmType},
    scm_error::{ScmError, ScmErrorKind},
};

/// In-memory GitLab with injectable failures.
#[derive(Default)]
struct FakeGitLab {
    /// Group path → projects, served one per page.
    groups: BTreeMap<String, Vec<Project>>,
    /// (project path, step) → error kind.
    failures: HashMap<(String, &'static str), ScmErrorKind>,
    /// Remaining transient failures of the second project page, per group.
    flaky_groups: Mutex<HashMap<String, usize>>,
    uncountable_groups: HashSet<String>,
    member_calls: Mutex<Vec<String>>,
}

impl FakeGitLab {
    fn with_group(mut self, path: &str, projects: Vec<Project>) -> Self {
        self.groups.insert(path.to_string(), projects);
        self
    }

    fn failing(mut self, project: &str, step: &'static str, kind: ScmErrorKind) -> Self {
        self.failures.insert((project.to_string(), step), kind);
        self
    }

    fn check(&self, project: &str, step: &'static str) -> Result<(), ScmError> {
        match self.failures.get(&(project.to_string(), step)) {
            Some(kind) => Err(ScmError::new(*kind, format!("{step} failed"))),
            None => Ok(()),
        }
    }

    fn project(&self, path: &str) -> Option<Project> {
        self.groups.values().flatten().find(|p| p.path_with_namespace == path).cloned()
    }
}

fn project(id: u64, path: &str, access_level: u32) -> Project {
    Project {
        id,
        name: path.rsplit('/').next().unwrap().to_string(),
        path_with_namespace: path.to_string(),
        web_url: format!("https://gitlab.com/{path}"),
        visibility: "private".to_string(),
        default_branch: Some("main".to_string()),
        permissions: Some(ProjectPermissions {
            project_access: Some(AccessLevel { access_level }),
            group_access: None,
        }),
        ..Project::default()
    }
}

#[async_trait]
impl GitLabApi for FakeGitLab {
    async fn token_scopes(&self) -> Result<TokenScopes, ScmError> {
        Ok(TokenScopes::new(["read_api"]))
    }

    async fn list_groups(&self, _cursor: Option<String>) -> Result<Page<Group>, ScmError> {
        let groups = self
            .groups
            .keys()
            .enumerate()
            .map(|(id, path)| Group { id: id as u64, full_path: path.clone(), ..Group::default() })
            .collect();
        Ok(Page::last(groups))
    }

    async fn get_group(&self, path: &str) -> Result<Group, ScmError> {
        if self.groups.contains_key(path) {
            Ok(Group { id: 1, full_path: path.to_string(), ..Group::default() })
        } else {
            Err(ScmError::not_found(format!("404 Group Not Found: {path}")).with_status(404))
        }
    }

    async fn count_group_projects(&self, group: &str) -> Result<usize, ScmError> {
        if self.uncountable_groups.contains(group) {
            return Err(ScmError::transient("count unavailable"));
        }
        Ok(self.groups.get(group).map_or(0, Vec::len))
    }

    async fn list_group_projects(
        &self,
        group: &str,
        cursor: Option<String>,
    ) -> Result<Page<Project>, ScmError> {
        let index: usize = cursor.as_deref().map_or(0, |c| c.parse().unwrap());
        if index == 1 {
            let mut flaky = self.flaky_groups.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(group) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ScmError::transient("503 service unavailable").with_status(503));
                }
            }
        }
        let projects = self.groups.get(group).ok_or_else(|| ScmError::not_found(group))?;
        let items: Vec<_> = projects.get(index).cloned().into_iter().collect();
        if index + 1 < projects.len() {
            Ok(Page::with_next(items, (index + 1).to_string()))
        } else {
            Ok(Page::last(items))
        }
    }

    async fn get_project(&self, path: &str) -> Result<Project, ScmError> {
        self.project(path)
            .ok_or_else(|| ScmError::not_found(format!("404 Project Not Found: {path}")).with_status(404))
    }

    async fn list_members(
        &self,
        project: &str,
        _cursor: Option<String>,
    ) -> Result<Page<Member>, ScmError> {
        self.member_calls.lock().unwrap().push(project.to_string());
        self.check(project, "members")?;
        Ok(Page::last(vec![Member { id: 1, username: "alice".to_string(), access_level: 50 }]))
    }

    async fn list_protected_branches(
        &self,
        project: &str,
        _cursor: Option<String>,
    ) -> Result<Page<ProtectedBranch>, ScmError> {
        self.check(project, "protected_branches")?;
        Ok(Page::last(vec![ProtectedBranch { name: "main".to_string(), ..ProtectedBranch::default() }]))
    }
}

fn context(target: CollectionTarget) -> Arc<RunContext> {
    RunContext::builder(ScmType::GitLab, target).build().unwrap()
}

async fn drain(collection: Collection) -> (Vec<CollectedItem>, CollectionOutcome) {
    let Collection { mut items, outcome } = collection;
    let mut collected = Vec::new();
    while let Some(item) = items.recv().await {
        collected.push(item);
    }
    (collected, outcome.await.unwrap().unwrap())
}

fn gitlab_repo(item: &CollectedItem) -> &Repository {
    match &item.data.entity {
        CollectedEntity::GitLabRepository(repo) => repo.as_ref(),
        other => panic!("unexpected entity {other:?}"),
    }
}

fn item<'a>(items: &'a [CollectedItem], path: &str) -> &'a CollectedItem {
    items
        .iter()
        .find(|i| gitlab_repo(i).full_name() == path)
        .unwrap_or_else(|| panic!("{path} was not collected"))
}

#[tokio::test]
async fn denied_members_and_protected_branches_become_gaps() {
    let fake = FakeGitLab::default()
        .with_group(
            "acme",
            vec![project(1, "acme/api", 40), project(2, "acme/web", 30), project(3, "acme/docs", 40)],
        )
        .failing("acme/api", "members", ScmErrorKind::PermissionDenied)
        .failing("acme/web", "protected_branches", ScmErrorKind::NotFound);
    let registry = PermissionGapRegistry::new();
    let collector = Arc::new(RepositoryCollector::new(
        Arc::new(fake),
        context(CollectionTarget::AllOrganizations),
        Arc::clone(&registry),
    ));

    let (items, outcome) = drain(collector.collect()).await;

    assert_eq!(items.len(), 3);
    assert_eq!(outcome.organizations["acme"], OrganizationOutcome::Collected(3));
    assert_eq!(registry.len(), 2);

    let api = item(&items, "acme/api");
    assert_eq!(gitlab_repo(api).members, None);
    assert!(gitlab_repo(api).protected_branches.is_some());
    assert_eq!(
        api.missing_permissions,
        vec![PermissionGap::new(Scope::RepoAdmin, "acme/api", MEMBERS_EFFECT, Namespace::Repository)]
    );
    assert_eq!(api.data.context.roles, vec![Role::RepoAdmin]);

    let web = item(&items, "acme/web");
    assert_eq!(gitlab_repo(web).protected_branches, None);
    assert_eq!(gitlab_repo(web).default_branch_protection(), None);
    assert_eq!(
        web.missing_permissions,
        vec![PermissionGap::new(Scope::RepoAdmin, "acme/web", PROTECTED_BRANCHES_EFFECT, Namespace::Repository)]
    );

    let docs = item(&items, "acme/docs");
    assert!(docs.missing_permissions.is_empty());
    assert!(gitlab_repo(docs).default_branch_protection().is_some());
}

#[tokio::test]
async fn operational_failures_leave_attachments_unset_without_gaps() {
    let fake = FakeGitLab::default()
        .with_group("acme", vec![project(1, "acme/api", 40)])
        .failing("acme/api", "members", ScmErrorKind::Transient)
        .failing("acme/api", "protected_branches", ScmErrorKind::Other);
    let registry = PermissionGapRegistry::new();
    let collector = Arc::new(RepositoryCollector::new(
        Arc::new(fake),
        context(CollectionTarget::AllOrganizations),
        Arc::clone(&registry),
    ));

    let (items, _) = drain(collector.collect()).await;

    assert_eq!(items.len(), 1);
    assert_eq!(gitlab_repo(&items[0]).members, None);
    assert_eq!(gitlab_repo(&items[0]).protected_branches, None);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn group_outcomes_distinguish_failure_from_empty() {
    let fake = FakeGitLab::default()
        .with_group("acme", vec![project(1, "acme/a", 40), project(2, "acme/b", 40)])
        .with_group("globex", vec![project(3, "globex/x", 40), project(4, "globex/y", 40)])
        .with_group("initech", Vec::new());
    fake.flaky_groups.lock().unwrap().insert("acme".to_string(), 2);
    fake.flaky_groups.lock().unwrap().insert("globex".to_string(), 10);
    let fake = Arc::new(fake);
    let collector = Arc::new(RepositoryCollector::new(
        Arc::clone(&fake),
        context(CollectionTarget::AllOrganizations),
        PermissionGapRegistry::new(),
    ));

    let (items, outcome) = drain(collector.collect()).await;

    // acme succeeds on its third attempt; acme/a is enriched and emitted once.
    assert_eq!(outcome.organizations["acme"], OrganizationOutcome::Collected(2));
    assert_eq!(outcome.organizations["initech"], OrganizationOutcome::Empty);
    assert!(matches!(outcome.organizations["globex"], OrganizationOutcome::Failed(_)));
    let mut acme: Vec<_> =
        items.iter().map(|i| gitlab_repo(i).full_name()).filter(|n| n.starts_with("acme/")).collect();
    acme.sort();
    assert_eq!(acme, vec!["acme/a", "acme/b"]);
    let calls = fake.member_calls.lock().unwrap();
    assert_eq!(calls.iter().filter(|p| *p == "acme/a").count(), 1);
    assert_eq!(fake.flaky_groups.lock().unwrap()["globex"], 5);
    assert_eq!(outcome.emitted, items.len());
}

#[tokio::test]
async fn requested_groups_are_resolved_before_collection() {
    let fake = FakeGitLab::default()
        .with_group("acme", vec![project(1, "acme/api", 40)])
        .with_group("globex", vec![project(2, "globex/x", 40)]);
    let collector = Arc::new(RepositoryCollector::new(
        Arc::new(fake),
        context(CollectionTarget::Organizations(vec!["globex".to_string(), "ghost".to_string()])),
        PermissionGapRegistry::new(),
    ));

    assert_eq!(collector.collect_metadata().await.total_entities, 1);
    let (items, outcome) = drain(Arc::clone(&collector).collect()).await;

    assert_eq!(items.len(), 1);
    assert_eq!(gitlab_repo(&items[0]).full_name(), "globex/x");
    assert_eq!(outcome.organizations["globex"], OrganizationOutcome::Collected(1));
    assert!(matches!(outcome.organizations["ghost"], OrganizationOutcome::Failed(_)));
    assert_eq!(outcome.organizations.len(), 2);
}

#[tokio::test]
async fn targeted_projects_are_fetched_by_path() {
    let fake = FakeGitLab::default().with_group("acme", vec![project(1, "acme/api", 50)]);
    let target = CollectionTarget::Repositories(vec![
        RepositoryWithOwner::new("acme", "api"),
        RepositoryWithOwner::new("acme", "gone"),
    ]);
    let collector = Arc::new(RepositoryCollector::new(
        Arc::new(fake),
        context(target),
        PermissionGapRegistry::new(),
    ));

    assert_eq!(collector.collect_metadata().await.total_entities, 2);
    let (items, outcome) = drain(Arc::clone(&collector).collect()).await;

    assert_eq!(items.len(), 1);
    assert!(items[0].data.context.viewer_is_org_admin);
    assert_eq!(outcome.organizations["acme/api"], OrganizationOutcome::Collected(1));
    assert!(matches!(outcome.organizations["acme/gone"], OrganizationOutcome::Failed(_)));
}

#[tokio::test]
async fn metadata_is_best_effort() {
    let mut fake = FakeGitLab::default()
        .with_group("acme", vec![project(1, "acme/a", 40), project(2, "acme/b", 40)])
        .with_group("globex", vec![project(3, "globex/x", 40)]);
    fake.uncountable_groups.insert("globex".to_string());
    let collector = RepositoryCollector::new(
        Arc::new(fake),
        context(CollectionTarget::AllOrganizations),
        PermissionGapRegistry::new(),
    );

    assert_eq!(collector.collect_metadata().await.total_entities, 2);
}
