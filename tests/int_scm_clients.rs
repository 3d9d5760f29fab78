use pretty_assertions::assert_eq;
use scmguard::{
    github::{GitHubApi, GitHubClient},
    gitlab::{GitLabApi, GitLabClient},
    pagination::collect_pages,
    scm_error::ScmErrorKind,
};
use serde_json::json;
use url::Url;
use wiremock::{
    matchers::{body_string_contains, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

async fn github(server: &MockServer) -> GitHubClient {
    let api = Url::parse(&server.uri()).unwrap();
    GitHubClient::new(&api, Some("ghp_test".to_string()), false).unwrap()
}

async fn gitlab(server: &MockServer) -> GitLabClient {
    let api = Url::parse(&format!("{}/api/v4", server.uri())).unwrap();
    GitLabClient::new(&api, Some("glpat_test".to_string()), false).unwrap()
}

#[tokio::test]
async fn github_token_scopes_come_from_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .and(header("authorization", "Bearer ghp_test"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-oauth-scopes", "repo, read:org")
                .set_body_json(json!({ "login": "octocat" })),
        )
        .mount(&server)
        .await;

    let scopes = github(&server).await.token_scopes().await.unwrap();
    assert_eq!(scopes.iter().collect::<Vec<_>>(), vec!["read:org", "repo"]);
}

#[tokio::test]
async fn github_repository_page_from_graphql() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("organization(login: $login)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "organization": {
                    "repositories": {
                        "pageInfo": { "hasNextPage": true, "endCursor": "Y3Vyc29yOjUw" },
                        "nodes": [{
                            "name": "api",
                            "nameWithOwner": "acme/api",
                            "url": "https://github.com/acme/api",
                            "isPrivate": true,
                            "viewerPermission": "ADMIN",
                            "defaultBranchRef": { "name": "main", "branchProtectionRule": null }
                        }]
                    }
                }
            }
        })))
        .mount(&server)
        .await;

    let page = github(&server).await.list_repositories("acme", None).await.unwrap();
    assert!(page.has_next_page);
    assert_eq!(page.next_cursor.as_deref(), Some("Y3Vyc29yOjUw"));
    assert_eq!(page.items[0].name_with_owner, "acme/api");
}

#[tokio::test]
async fn github_graphql_errors_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{ "type": "FORBIDDEN", "message": "Resource not accessible by integration" }]
        })))
        .mount(&server)
        .await;

    let err = github(&server).await.get_dependency_graph_manifests("acme", "api").await.unwrap_err();
    assert_eq!(err.kind, ScmErrorKind::PermissionDenied);
}

#[tokio::test]
async fn github_branch_protection_answers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/branches/main/protection"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Branch not protected" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/secret/branches/main/protection"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "message": "Upgrade to GitHub Pro or make this repository public to enable this feature."
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/hidden/branches/main/protection"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/busy/branches/main/protection"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .set_body_json(json!({ "message": "API rate limit exceeded" })),
        )
        .mount(&server)
        .await;

    let client = github(&server).await;
    let kind = |repo: &'static str| {
        let client = client.clone();
        async move { client.get_branch_protection("acme", repo, "main").await.unwrap_err().kind }
    };
    assert_eq!(kind("api").await, ScmErrorKind::BranchNotProtected);
    assert_eq!(kind("secret").await, ScmErrorKind::FeatureUnsupported);
    assert_eq!(kind("hidden").await, ScmErrorKind::NotFound);
    assert_eq!(kind("busy").await, ScmErrorKind::Transient);
}

#[tokio::test]
async fn github_vulnerability_alerts_status_codes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/vulnerability-alerts"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/web/vulnerability-alerts"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/locked/vulnerability-alerts"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "message": "Must have admin rights" })))
        .mount(&server)
        .await;

    let client = github(&server).await;
    assert!(client.get_vulnerability_alerts("acme", "api").await.unwrap());
    assert!(!client.get_vulnerability_alerts("acme", "web").await.unwrap());
    let err = client.get_vulnerability_alerts("acme", "locked").await.unwrap_err();
    assert_eq!(err.kind, ScmErrorKind::PermissionDenied);
    assert_eq!(err.status, Some(403));
}

#[tokio::test]
async fn github_hooks_follow_link_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/hooks"))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", "<https://api.github.com/repositories/1/hooks?page=2>; rel=\"next\"")
                .set_body_json(json!([{ "id": 1, "name": "web", "active": true, "config": { "insecure_ssl": "1" } }])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/hooks"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 2, "name": "web" }])))
        .mount(&server)
        .await;

    let client = github(&server).await;
    let hooks = collect_pages(|cursor| client.list_hooks("acme", "api", cursor)).await.unwrap();
    assert_eq!(hooks.iter().map(|h| h.id).collect::<Vec<_>>(), vec![1, 2]);
    assert!(hooks[0].allows_insecure_ssl());
}

#[tokio::test]
async fn github_server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = github(&server).await.get_organization("acme").await.unwrap_err();
    assert!(err.kind.is_transient());
}

#[tokio::test]
async fn gitlab_project_and_members() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/acme%2Fapi"))
        .and(header("private-token", "glpat_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "name": "api",
            "path_with_namespace": "acme/api",
            "web_url": "https://gitlab.com/acme/api",
            "visibility": "private",
            "default_branch": "main"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/acme%2Fapi/members/all"))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-next-page", "2")
                .set_body_json(json!([{ "id": 1, "username": "alice", "access_level": 50 }])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/acme%2Fapi/members/all"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-next-page", "")
                .set_body_json(json!([{ "id": 2, "username": "bob", "access_level": 30 }])),
        )
        .mount(&server)
        .await;

    let client = gitlab(&server).await;
    let project = client.get_project("acme/api").await.unwrap();
    assert_eq!(project.default_branch.as_deref(), Some("main"));
    let members = collect_pages(|cursor| client.list_members("acme/api", cursor)).await.unwrap();
    assert_eq!(members.iter().map(|m| m.username.as_str()).collect::<Vec<_>>(), vec!["alice", "bob"]);
}

#[tokio::test]
async fn gitlab_forbidden_is_permission_denied() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/acme%2Fapi/protected_branches"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "message": "403 Forbidden" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/personal_access_tokens/self"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "scopes": ["read_api"] })))
        .mount(&server)
        .await;

    let client = gitlab(&server).await;
    let err = client.list_protected_branches("acme/api", None).await.unwrap_err();
    assert_eq!(err.kind, ScmErrorKind::PermissionDenied);
    assert!(client.token_scopes().await.unwrap().contains("read_api"));
}
