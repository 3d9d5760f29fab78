use assert_cmd::Command;
use predicates::{prelude::PredicateBooleanExt, str::contains};

mod test {
    use super::*;

    #[test]
    fn cli_version_flag() {
        Command::cargo_bin("scmguard")
            .unwrap()
            .arg("--version")
            .assert()
            .success()
            .stdout(contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn cli_analyze_help_lists_targets() {
        Command::cargo_bin("scmguard")
            .unwrap()
            .args(["analyze", "--help"])
            .assert()
            .success()
            .stdout(contains("--org").and(contains("--repo")).and(contains("--scorecard")));
    }

    #[test]
    fn cli_rejects_org_with_repo() {
        Command::cargo_bin("scmguard")
            .unwrap()
            .args(["analyze", "--org", "acme", "--repo", "acme/api"])
            .assert()
            .failure()
            .stderr(contains("cannot be used with"));
    }

    #[test]
    fn cli_rejects_malformed_repository() {
        Command::cargo_bin("scmguard")
            .unwrap()
            .args(["analyze", "--repo", "not-a-repository", "--github-api-url", "http://127.0.0.1:9/"])
            .env_remove("SCMGUARD_GITHUB_TOKEN")
            .assert()
            .failure()
            .stderr(contains("expected <owner>/<name>"));
    }

    #[test]
    fn cli_rejects_unknown_scm() {
        Command::cargo_bin("scmguard")
            .unwrap()
            .args(["analyze", "--scm", "bitbucket"])
            .assert()
            .failure()
            .stderr(contains("invalid value"));
    }
}
