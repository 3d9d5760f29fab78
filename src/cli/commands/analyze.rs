use std::{fs::File, io::BufWriter, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum, ValueHint};
use strum_macros::Display;
use tracing::{info, warn};
use url::Url;

use crate::{
    analyzer::{Analyzer, Report},
    cli::global::GlobalArgs,
    collected::Namespace,
    github::{self, GitHubApi, GitHubClient},
    gitlab::{self, GitLabApi, GitLabClient},
    missing_permissions::PermissionGapRegistry,
    permissions::TokenScopes,
    policy::BuiltinPolicies,
    reporter::{ReportFormat, Reporter},
    run_context::{CollectionTarget, RunContext, ScmType, ScorecardMode},
    scorecard::ScorecardCli,
};

/// `scmguard analyze`
#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Organizations (GitLab: groups) to analyze; all reachable ones when omitted
    #[arg(long, conflicts_with = "repo")]
    pub org: Vec<String>,

    /// Specific repositories to analyze, as <owner>/<name>
    #[arg(long)]
    pub repo: Vec<String>,

    /// Source control platform
    #[arg(long, value_enum, default_value_t = ScmType::GitHub)]
    pub scm: ScmType,

    /// Restrict the analysis to these entity namespaces
    #[arg(long, value_enum)]
    pub namespace: Vec<Namespace>,

    /// Run OpenSSF scorecard on GitHub repositories
    #[arg(long, value_enum, default_value_t = ScorecardArg::No)]
    pub scorecard: ScorecardArg,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Pretty)]
    pub format: ReportFormat,

    /// Write the report to this file instead of stdout
    #[arg(long, short, value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Override GitHub API URL (e.g. Enterprise)
    #[arg(long, default_value = "https://api.github.com/", value_hint = ValueHint::Url)]
    pub github_api_url: Url,

    /// Override GitLab API URL (self-managed instances)
    #[arg(long, default_value = "https://gitlab.com/api/v4/", value_hint = ValueHint::Url)]
    pub gitlab_api_url: Url,
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, ValueEnum)]
#[strum(serialize_all = "kebab-case")]
pub enum ScorecardArg {
    No,
    Yes,
    /// Keep per-check details in the results
    Verbose,
}

impl From<ScorecardArg> for ScorecardMode {
    fn from(arg: ScorecardArg) -> Self {
        ScorecardMode {
            enabled: arg != ScorecardArg::No,
            verbose: arg == ScorecardArg::Verbose,
        }
    }
}

impl AnalyzeArgs {
    fn build_context(&self, token_scopes: TokenScopes) -> Result<Arc<RunContext>> {
        let target = CollectionTarget::from_args(&self.org, &self.repo)?;
        RunContext::builder(self.scm, target)
            .namespaces(&self.namespace)
            .scorecard(self.scorecard.into())
            .token_scopes(token_scopes)
            .build()
    }
}

pub async fn run(global_args: &GlobalArgs, args: &AnalyzeArgs) -> Result<()> {
    // Fail on a bad target before talking to any remote.
    CollectionTarget::from_args(&args.org, &args.repo)?;

    let registry = PermissionGapRegistry::new();
    let report = match args.scm {
        ScmType::GitHub => analyze_github(global_args, args, registry).await?,
        ScmType::GitLab => analyze_gitlab(global_args, args, registry).await?,
    };
    info!(
        "Found {} violations, skipped {}, {} missing permissions",
        report.violations.len(),
        report.skipped,
        report.missing_permissions.len()
    );

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            Reporter::new(false).report(&report, args.format, BufWriter::new(file))
        }
        None => {
            let use_color = global_args.use_color(std::io::stdout());
            Reporter::new(use_color).report(&report, args.format, std::io::stdout().lock())
        }
    }
}

/// Missing scope information only means more violations get skipped.
fn scopes_or_empty(result: Result<TokenScopes, crate::scm_error::ScmError>) -> TokenScopes {
    result.unwrap_or_else(|e| {
        warn!("Cannot determine token scopes: {e}");
        TokenScopes::default()
    })
}

async fn analyze_github(
    global_args: &GlobalArgs,
    args: &AnalyzeArgs,
    registry: Arc<PermissionGapRegistry>,
) -> Result<Report> {
    let client = Arc::new(GitHubClient::from_env(&args.github_api_url, global_args.ignore_certs)?);
    let ctx = args.build_context(scopes_or_empty(client.token_scopes().await))?;

    let mut repositories =
        github::RepositoryCollector::new(Arc::clone(&client), Arc::clone(&ctx), Arc::clone(&registry));
    if ctx.scorecard_enabled() {
        let token = client.token().map(str::to_string);
        repositories =
            repositories.with_scorecard(Arc::new(ScorecardCli::new(token, ctx.scorecard.verbose)));
    }
    let organizations =
        github::OrganizationCollector::new(Arc::clone(&client), Arc::clone(&ctx), Arc::clone(&registry));

    Analyzer::new(Arc::clone(&ctx), Arc::new(BuiltinPolicies), registry)
        .with_collector(Arc::new(organizations))
        .with_collector(Arc::new(repositories))
        .show_progress(global_args.use_progress())
        .run()
        .await
}

async fn analyze_gitlab(
    global_args: &GlobalArgs,
    args: &AnalyzeArgs,
    registry: Arc<PermissionGapRegistry>,
) -> Result<Report> {
    if args.scorecard != ScorecardArg::No {
        warn!("Scorecard is only available for GitHub, ignoring --scorecard");
    }
    let client = Arc::new(GitLabClient::from_env(&args.gitlab_api_url, global_args.ignore_certs)?);
    let ctx = args.build_context(scopes_or_empty(client.token_scopes().await))?;
    let repositories =
        gitlab::RepositoryCollector::new(Arc::clone(&client), Arc::clone(&ctx), Arc::clone(&registry));

    Analyzer::new(Arc::clone(&ctx), Arc::new(BuiltinPolicies), registry)
        .with_collector(Arc::new(repositories))
        .show_progress(global_args.use_progress())
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::global::{Command, CommandLineArgs};

    fn parse(argv: &[&str]) -> AnalyzeArgs {
        let mut full = vec!["scmguard", "analyze"];
        full.extend_from_slice(argv);
        let Command::Analyze(args) = CommandLineArgs::try_parse_from(full).unwrap().command;
        args
    }

    #[test]
    fn repository_target_keeps_repository_namespace_only() {
        let args = parse(&["--repo", "acme/api"]);
        let ctx = args.build_context(TokenScopes::default()).unwrap();
        assert_eq!(ctx.namespaces, vec![Namespace::Repository]);
    }

    #[test]
    fn scorecard_modes() {
        let ctx = parse(&["--scorecard", "verbose"]).build_context(TokenScopes::default()).unwrap();
        assert!(ctx.scorecard.enabled && ctx.scorecard.verbose);
        let ctx = parse(&[]).build_context(TokenScopes::default()).unwrap();
        assert!(!ctx.scorecard_enabled());
    }

    #[test]
    fn org_and_repo_conflict() {
        let result =
            CommandLineArgs::try_parse_from(["scmguard", "analyze", "--org", "acme", "--repo", "acme/api"]);
        assert!(result.is_err());
    }

    #[test]
    fn gitlab_scm_value() {
        assert_eq!(parse(&["--scm", "gitlab"]).scm, ScmType::GitLab);
    }
}
