//! Plumbing shared by every namespace collector.

use std::{collections::BTreeMap, fmt, future::Future, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    accumulate::Counter,
    collected::{CollectedData, CollectedItem, Namespace},
    missing_permissions::{PermissionGap, PermissionGapRegistry},
};

/// Cheap pre-count used for progress reporting. It may disagree with what is
/// actually collected.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    pub total_entities: usize,
}

/// How one organization (or group, or targeted repository) fared during a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationOutcome {
    Collected(usize),
    Empty,
    Failed(String),
}

impl fmt::Display for OrganizationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrganizationOutcome::Collected(n) => write!(f, "collected {n}"),
            OrganizationOutcome::Empty => f.write_str("no entities"),
            OrganizationOutcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CollectionOutcome {
    pub organizations: BTreeMap<String, OrganizationOutcome>,
    pub emitted: usize,
}

impl CollectionOutcome {
    pub fn failed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.organizations.iter().filter_map(|(name, outcome)| match outcome {
            OrganizationOutcome::Failed(e) => Some((name.as_str(), e.as_str())),
            _ => None,
        })
    }
}

/// Handle to a running collection. Drain `items` until it yields `None`, then
/// await `outcome`.
pub struct Collection {
    pub items: UnboundedReceiver<CollectedItem>,
    pub outcome: JoinHandle<Result<CollectionOutcome>>,
}

#[async_trait]
pub trait Collector: Send + Sync {
    fn namespace(&self) -> Namespace;

    /// Best-effort estimate of how many entities `collect` will emit. Never
    /// fails; remote errors yield a smaller (possibly zero) estimate.
    async fn collect_metadata(&self) -> Metadata;

    fn collect(self: Arc<Self>) -> Collection;
}

/// Cloneable sink handed to every collection task. The item channel closes
/// once the last emitter is dropped.
#[derive(Clone)]
pub struct Emitter {
    namespace: Namespace,
    sender: UnboundedSender<CollectedItem>,
    registry: Arc<PermissionGapRegistry>,
    counter: Arc<Counter>,
}

impl Emitter {
    /// Hand off a fully assembled entity. Its gaps go to the run registry and
    /// travel with the item; the run counter moves by exactly one.
    pub fn emit(&self, data: CollectedData, missing_permissions: Vec<PermissionGap>) {
        for gap in &missing_permissions {
            debug!("Missing permission: {gap}");
        }
        self.registry.record(missing_permissions.iter().cloned());
        let name = data.entity.name();
        if self.sender.send(CollectedItem { data, missing_permissions }).is_err() {
            warn!("Dropping {} {name}: receiver closed", self.namespace);
        }
        self.counter.inc();
    }

    pub fn emitted(&self) -> usize {
        self.counter.get()
    }
}

/// Run `work` in the background with a fresh emitter and return the handle
/// the caller drains.
pub fn spawn_collection<F, Fut>(
    namespace: Namespace,
    registry: Arc<PermissionGapRegistry>,
    counter: Arc<Counter>,
    work: F,
) -> Collection
where
    F: FnOnce(Emitter) -> Fut + Send + 'static,
    Fut: Future<Output = Result<CollectionOutcome>> + Send + 'static,
{
    let (sender, items) = mpsc::unbounded_channel();
    let emitter = Emitter { namespace, sender, registry, counter };
    let outcome = tokio::spawn(async move { work(emitter).await });
    Collection { items, outcome }
}
