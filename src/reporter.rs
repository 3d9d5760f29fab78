use std::io::Write;

use anyhow::{Context, Result};
use clap::ValueEnum;
use console::Style;
use strum::Display;

use crate::{analyzer::Report, collector::OrganizationOutcome, policy::Severity};

#[derive(Copy, Clone, Debug, Default, Display, PartialEq, Eq, ValueEnum)]
#[strum(serialize_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Pretty,
    Json,
}

pub struct Styles {
    pub heading: Style,
    pub policy: Style,
    pub severity_high: Style,
    pub severity_low: Style,
    pub metadata: Style,
}

impl Styles {
    pub fn new(use_color: bool) -> Self {
        Self {
            heading: Style::new().bold().force_styling(use_color),
            policy: Style::new().bright().bold().blue().force_styling(use_color),
            severity_high: Style::new().bold().red().force_styling(use_color),
            severity_low: Style::new().yellow().force_styling(use_color),
            metadata: Style::new().bright().blue().force_styling(use_color),
        }
    }

    fn severity(&self, severity: Severity) -> &Style {
        if severity >= Severity::High {
            &self.severity_high
        } else {
            &self.severity_low
        }
    }
}

pub struct Reporter {
    styles: Styles,
}

impl Reporter {
    pub fn new(use_color: bool) -> Self {
        Self { styles: Styles::new(use_color) }
    }

    pub fn report<W: Write>(&self, report: &Report, format: ReportFormat, mut writer: W) -> Result<()> {
        match format {
            ReportFormat::Pretty => self.pretty_format(report, &mut writer)?,
            ReportFormat::Json => {
                serde_json::to_writer_pretty(&mut writer, report).context("Failed to write JSON report")?;
                writeln!(writer)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn pretty_format<W: Write>(&self, report: &Report, writer: &mut W) -> Result<()> {
        let s = &self.styles;
        for (index, v) in report.violations.iter().enumerate() {
            writeln!(
                writer,
                "{} {} [{}]",
                s.heading.apply_to(format!("{}/{}", index + 1, report.violations.len())),
                s.policy.apply_to(&v.policy),
                s.severity(v.severity).apply_to(v.severity),
            )?;
            writeln!(writer, " |Entity......: {} ({})", v.entity_name, v.namespace)?;
            writeln!(writer, " |Description.: {}", v.description)?;
            writeln!(writer, " |Remediation.: {}", v.remediation)?;
            if !v.link.is_empty() {
                writeln!(writer, " |Link........: {}", s.metadata.apply_to(&v.link))?;
            }
            writeln!(writer)?;
        }

        if !report.missing_permissions.is_empty() {
            writeln!(writer, "{}", s.heading.apply_to("Missing permissions"))?;
            for gap in &report.missing_permissions {
                writeln!(writer, " - {gap}")?;
            }
            writeln!(writer)?;
        }

        writeln!(writer, "{}", s.heading.apply_to("Summary"))?;
        for summary in &report.namespaces {
            writeln!(
                writer,
                " |{}: collected {} of {} estimated",
                summary.namespace, summary.outcome.emitted, summary.estimated
            )?;
            for (name, outcome) in &summary.outcome.organizations {
                if matches!(outcome, OrganizationOutcome::Failed(_) | OrganizationOutcome::Empty) {
                    writeln!(writer, " |  {name}: {outcome}")?;
                }
            }
        }
        writeln!(
            writer,
            " |Violations: {} ({} skipped for insufficient access)",
            report.violations.len(),
            report.skipped
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{
        analyzer::NamespaceSummary,
        collected::Namespace,
        collector::CollectionOutcome,
        missing_permissions::PermissionGap,
        permissions::Scope,
        policy::ViolationCandidate,
    };

    fn sample() -> Report {
        let mut organizations = BTreeMap::new();
        organizations.insert("acme".to_string(), OrganizationOutcome::Collected(2));
        organizations.insert("globex".to_string(), OrganizationOutcome::Failed("server error".into()));
        Report {
            violations: vec![ViolationCandidate {
                policy: "github_repository_actions_default_write".into(),
                description: "Workflows get a write token by default".into(),
                severity: Severity::Medium,
                remediation: "Set the default workflow permissions to read-only".into(),
                annotations: BTreeMap::new(),
                entity_name: "acme/repo1".into(),
                namespace: Namespace::Repository,
                link: "https://github.com/acme/repo1".into(),
            }],
            skipped: 1,
            missing_permissions: vec![PermissionGap::new(
                Scope::RepoAdmin,
                "acme/repo2",
                "Cannot read repository actions settings",
                Namespace::Repository,
            )],
            namespaces: vec![NamespaceSummary {
                namespace: Namespace::Repository,
                estimated: 3,
                outcome: CollectionOutcome { organizations, emitted: 2 },
            }],
        }
    }

    #[test]
    fn pretty_report_lists_everything() {
        let mut out = Vec::new();
        Reporter::new(false).report(&sample(), ReportFormat::Pretty, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("1/1 github_repository_actions_default_write [medium]"));
        assert!(text.contains(
            "[repository] acme/repo2: Cannot read repository actions settings (requires repo:admin)"
        ));
        assert!(text.contains("repository: collected 2 of 3 estimated"));
        assert!(text.contains("globex: failed: server error"));
        assert!(!text.contains("acme: collected"));
    }

    #[test]
    fn json_report_is_structured() {
        let mut out = Vec::new();
        Reporter::new(false).report(&sample(), ReportFormat::Json, &mut out).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["violations"][0]["entity_name"], "acme/repo1");
        assert_eq!(json["missing_permissions"][0]["permission"], "repo:admin");
        assert_eq!(json["namespaces"][0]["emitted"], 2);
        assert_eq!(json["namespaces"][0]["organizations"]["globex"]["failed"], "server error");
    }
}
