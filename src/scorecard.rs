//! OpenSSF scorecard, run through the `scorecard` CLI.

use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ScorecardCheck {
    pub name: String,
    pub score: f64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ScorecardResult {
    pub score: f64,
    /// Empty unless verbose results were requested.
    #[serde(default)]
    pub checks: Vec<ScorecardCheck>,
}

#[async_trait]
pub trait ScorecardRunner: Send + Sync {
    async fn calculate(&self, repo_url: &str, is_private: bool) -> Result<ScorecardResult>;
}

/// Invokes the `scorecard` binary found on `PATH`. The GitHub token is passed
/// through the environment the way the tool expects.
pub struct ScorecardCli {
    binary: String,
    token: Option<String>,
    verbose: bool,
}

impl ScorecardCli {
    pub fn new(token: Option<String>, verbose: bool) -> Self {
        Self { binary: "scorecard".to_string(), token, verbose }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

#[async_trait]
impl ScorecardRunner for ScorecardCli {
    async fn calculate(&self, repo_url: &str, is_private: bool) -> Result<ScorecardResult> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(format!("--repo={repo_url}"))
            .arg("--format=json")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if is_private {
            // Checks that need public-only APIs fail noisily on private repositories.
            cmd.arg("--checks=Binary-Artifacts,Branch-Protection,Code-Review,Dangerous-Workflow,Token-Permissions");
        }
        if let Some(token) = &self.token {
            cmd.env("GITHUB_AUTH_TOKEN", token);
        }
        debug!("Running scorecard for {repo_url}");
        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to execute {}", self.binary))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "scorecard exited with {}: {}",
                output.status,
                stderr.lines().last().unwrap_or_default()
            );
        }
        parse_scorecard_output(&output.stdout, self.verbose)
    }
}

pub fn parse_scorecard_output(stdout: &[u8], verbose: bool) -> Result<ScorecardResult> {
    let mut result: ScorecardResult =
        serde_json::from_slice(stdout).context("failed to parse scorecard JSON output")?;
    if !verbose {
        result.checks.clear();
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: &str = r#"{
        "date": "2024-05-01",
        "repo": { "name": "github.com/acme/api" },
        "score": 6.4,
        "checks": [
            { "name": "Code-Review", "score": 8, "reason": "found 8/10 approved changesets" },
            { "name": "Token-Permissions", "score": 0, "reason": "detected GitHub workflow tokens with excessive permissions" }
        ]
    }"#;

    #[test]
    fn verbose_keeps_checks() {
        let result = parse_scorecard_output(OUTPUT.as_bytes(), true).unwrap();
        assert_eq!(result.score, 6.4);
        assert_eq!(result.checks.len(), 2);
        assert_eq!(result.checks[1].name, "Token-Permissions");
    }

    #[test]
    fn summary_drops_checks() {
        let result = parse_scorecard_output(OUTPUT.as_bytes(), false).unwrap();
        assert!(result.checks.is_empty());
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let runner = ScorecardCli::new(None, false).with_binary("scmguard-no-such-scorecard");
        assert!(runner.calculate("https://github.com/acme/api", false).await.is_err());
    }
}
