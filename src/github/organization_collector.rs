use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{collect_organizations, types::ExtendedOrg, GitHubApi, OrganizationListing};
use crate::{
    accumulate::Counter,
    collected::{CollectedData, CollectedEntity, EntityContext, Namespace, Plan},
    collector::{
        spawn_collection, Collection, CollectionOutcome, Collector, Emitter, Metadata,
        OrganizationOutcome,
    },
    missing_permissions::{PermissionGap, PermissionGapRegistry},
    permissions::{Role, Scope},
    run_context::RunContext,
    scm_error::ScmError,
    task_group::TaskGroup,
};

pub const ORGANIZATION_SETTINGS_EFFECT: &str = "Cannot read organization settings";

pub struct OrganizationCollector<C: GitHubApi> {
    client: Arc<C>,
    ctx: Arc<RunContext>,
    registry: Arc<PermissionGapRegistry>,
    counter: Arc<Counter>,
    organizations: OnceCell<OrganizationListing>,
}

impl<C: GitHubApi> OrganizationCollector<C> {
    pub fn new(client: Arc<C>, ctx: Arc<RunContext>, registry: Arc<PermissionGapRegistry>) -> Self {
        Self {
            client,
            ctx,
            registry,
            counter: Arc::new(Counter::new()),
            organizations: OnceCell::new(),
        }
    }

    async fn organizations(&self) -> Result<&OrganizationListing, ScmError> {
        self.organizations
            .get_or_try_init(|| collect_organizations(&self.client, &self.ctx.target))
            .await
    }

    async fn collect_all(self: Arc<Self>, emitter: Emitter) -> Result<CollectionOutcome> {
        let listing = self
            .organizations()
            .await
            .context("Failed to enumerate GitHub organizations")?;

        let mut outcome = CollectionOutcome::default();
        for (name, e) in &listing.unreachable {
            outcome.organizations.insert(name.clone(), OrganizationOutcome::Failed(e.clone()));
        }
        let mut group = TaskGroup::new();
        for org in listing.organizations.iter().cloned() {
            outcome.organizations.insert(org.name().to_string(), OrganizationOutcome::Collected(1));
            let emitter = emitter.clone();
            group.spawn(async move { emit_organization(org, &emitter) });
        }
        group.wait_all().await;
        outcome.emitted = emitter.emitted();
        Ok(outcome)
    }
}

fn organization_context(org: &ExtendedOrg) -> EntityContext {
    let role = if org.viewer_is_admin { Role::OrgAdmin } else { Role::OrgMember };
    EntityContext {
        roles: vec![role],
        plan: Plan::from_name(org.organization.plan.as_ref().map(|p| p.name.as_str())),
        viewer_is_org_admin: org.viewer_is_admin,
        branch_protection_supported: false,
    }
}

fn emit_organization(org: Arc<ExtendedOrg>, emitter: &Emitter) {
    let mut gaps = Vec::new();
    if !org.viewer_is_admin {
        debug!("Not an owner of {}, organization settings are partial", org.name());
        gaps.push(PermissionGap::new(
            Scope::OrgAdmin,
            org.name(),
            ORGANIZATION_SETTINGS_EFFECT,
            Namespace::Organization,
        ));
    }
    let context = organization_context(&org);
    let data = CollectedData {
        entity: CollectedEntity::GitHubOrganization(org.organization.clone()),
        context,
    };
    emitter.emit(data, gaps);
}

#[async_trait]
impl<C: GitHubApi> Collector for OrganizationCollector<C> {
    fn namespace(&self) -> Namespace {
        Namespace::Organization
    }

    async fn collect_metadata(&self) -> Metadata {
        match self.organizations().await {
            Ok(listing) => Metadata { total_entities: listing.organizations.len() },
            Err(e) => {
                debug!("Cannot estimate organization count: {e}");
                Metadata::default()
            }
        }
    }

    fn collect(self: Arc<Self>) -> Collection {
        let registry = Arc::clone(&self.registry);
        let counter = Arc::clone(&self.counter);
        spawn_collection(Namespace::Organization, registry, counter, move |emitter| {
            self.collect_all(emitter)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::types::{Organization, Plan as OrgPlan};

    #[test]
    fn member_context_is_not_admin() {
        let org = ExtendedOrg {
            organization: Organization {
                login: "acme".into(),
                plan: Some(OrgPlan { name: "free".into() }),
                ..Organization::default()
            },
            viewer_is_admin: false,
        };
        let ctx = organization_context(&org);
        assert_eq!(ctx.roles, vec![Role::OrgMember]);
        assert_eq!(ctx.plan, Plan::Free);
        assert!(!ctx.viewer_is_org_admin);
    }
}
