//! One analysis run: collect each namespace, evaluate policies, drop the
//! violations the credential could not back up.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    collected::Namespace,
    collector::{CollectionOutcome, Collector},
    missing_permissions::{PermissionGap, PermissionGapRegistry},
    policy::{PolicyEngine, ViolationCandidate},
    run_context::RunContext,
    skipper::Skipper,
};

/// Estimate against reality for one namespace.
#[derive(Clone, Debug, Serialize)]
pub struct NamespaceSummary {
    pub namespace: Namespace,
    pub estimated: usize,
    #[serde(flatten)]
    pub outcome: CollectionOutcome,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Report {
    pub violations: Vec<ViolationCandidate>,
    pub skipped: usize,
    pub missing_permissions: Vec<PermissionGap>,
    pub namespaces: Vec<NamespaceSummary>,
}

pub struct Analyzer {
    ctx: Arc<RunContext>,
    policies: Arc<dyn PolicyEngine>,
    registry: Arc<PermissionGapRegistry>,
    collectors: Vec<Arc<dyn Collector>>,
    show_progress: bool,
}

impl Analyzer {
    pub fn new(
        ctx: Arc<RunContext>,
        policies: Arc<dyn PolicyEngine>,
        registry: Arc<PermissionGapRegistry>,
    ) -> Self {
        Self { ctx, policies, registry, collectors: Vec::new(), show_progress: false }
    }

    /// Collectors for namespaces outside the run context are ignored.
    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        if self.ctx.namespaces.contains(&collector.namespace()) {
            self.collectors.push(collector);
        }
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub async fn run(&self) -> Result<Report> {
        let skipper = Skipper::new(Arc::clone(&self.ctx));
        let mut report = Report::default();
        for collector in &self.collectors {
            let summary = self.run_namespace(collector, &skipper, &mut report).await?;
            report.namespaces.push(summary);
        }
        report.missing_permissions = self.registry.take();
        Ok(report)
    }

    async fn run_namespace(
        &self,
        collector: &Arc<dyn Collector>,
        skipper: &Skipper,
        report: &mut Report,
    ) -> Result<NamespaceSummary> {
        let namespace = collector.namespace();
        let metadata = collector.collect_metadata().await;
        info!("Collecting {namespace} entities (estimated {})", metadata.total_entities);

        let progress = self.progress_bar(namespace, metadata.total_entities as u64);
        let mut collection = Arc::clone(collector).collect();
        while let Some(item) = collection.items.recv().await {
            progress.inc(1);
            for violation in self.policies.evaluate(&item.data) {
                if skipper.should_skip(&item.data, &violation) {
                    report.skipped += 1;
                } else {
                    report.violations.push(violation);
                }
            }
        }
        progress.finish_and_clear();

        let outcome = collection
            .outcome
            .await
            .map_err(|e| anyhow!("{namespace} collection task failed: {e}"))?
            .with_context(|| format!("Failed to collect {namespace} entities"))?;
        for (name, error) in outcome.failed() {
            warn!("{namespace} collection incomplete for {name}: {error}");
        }
        if outcome.emitted != metadata.total_entities {
            info!(
                "Collected {} {namespace} entities, {} were estimated",
                outcome.emitted, metadata.total_entities
            );
        }
        Ok(NamespaceSummary { namespace, estimated: metadata.total_entities, outcome })
    }

    fn progress_bar(&self, namespace: Namespace, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let style = ProgressStyle::with_template(
            "{spinner} {msg} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        let pb = ProgressBar::new(total)
            .with_style(style)
            .with_message(format!("Collecting {namespace} entities"));
        pb.enable_steady_tick(Duration::from_millis(500));
        pb
    }
}
