mod common;

use common::*;
use gitlab_release_core::context::ReleaseInfo;
use gitlab_release_core::success::success;
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_commit_merge_requests(server: &MockServer, sha: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!(
            "{PROJECT_API_PATH}/repository/commits/{sha}/merge_requests"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_closed_issues(server: &MockServer, mr_iid: u64, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!(
            "/api/v4/projects/100/merge_requests/{mr_iid}/closes_issues"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn expect_note(server: &MockServer, note_path: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path(note_path))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_success_skips_when_comment_disabled() {
    let server = MockServer::start().await;
    let ctx = with_commits(token_context(), &["abc"]);

    success(&config(&server, json!({"successComment": false})), &ctx)
        .await
        .unwrap();
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_success_skips_when_condition_disabled() {
    let server = MockServer::start().await;
    let ctx = with_commits(token_context(), &["abc"]);

    success(&config(&server, json!({"successCommentCondition": false})), &ctx)
        .await
        .unwrap();
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_success_comments_on_merged_requests_and_closed_issues() {
    let server = MockServer::start().await;
    mount_commit_merge_requests(
        &server,
        "abc",
        json!([
            {"iid": 1, "project_id": 100, "state": "merged"},
            {"iid": 2, "project_id": 100, "state": "opened"}
        ]),
    )
    .await;
    // Same merge request reached through a second commit.
    mount_commit_merge_requests(
        &server,
        "def",
        json!([{"iid": 1, "project_id": 100, "state": "merged"}]),
    )
    .await;
    mount_closed_issues(
        &server,
        1,
        json!([
            {"iid": 5, "project_id": 100, "state": "closed", "title": "Bug"},
            {"iid": 6, "project_id": 100, "state": "opened", "title": "Still open"}
        ]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/api/v4/projects/100/merge_requests/1/notes"))
        .and(body_string_contains("This MR is included in version 1.0.0"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v4/projects/100/issues/5/notes"))
        .and(body_string_contains("This issue has been resolved in version 1.0.0"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 2})))
        .expect(1)
        .mount(&server)
        .await;
    expect_note(&server, "/api/v4/projects/100/merge_requests/2/notes", 0).await;
    expect_note(&server, "/api/v4/projects/100/issues/6/notes", 0).await;

    let mut ctx = with_commits(token_context(), &["abc", "def"]);
    ctx.releases = vec![ReleaseInfo {
        name: Some("GitLab release".into()),
        url: Some("https://gitlab.com/test_user/test_repo/-/releases/v1.0.0".into()),
        plugin_name: None,
    }];
    success(&config(&server, json!({})), &ctx).await.unwrap();
}

#[tokio::test]
async fn test_success_uses_comment_template_and_condition() {
    let server = MockServer::start().await;
    mount_commit_merge_requests(
        &server,
        "abc",
        json!([{"iid": 1, "project_id": 100, "state": "merged", "title": "Add feature"}]),
    )
    .await;
    mount_closed_issues(
        &server,
        1,
        json!([{"iid": 5, "project_id": 100, "state": "closed", "title": "Bug"}]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/api/v4/projects/100/merge_requests/1/notes"))
        .and(body_partial_json(json!({"body": "Shipped Add feature in 1.0.0"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;
    expect_note(&server, "/api/v4/projects/100/issues/5/notes", 0).await;

    let options = json!({
        "successComment": "Shipped ${mergeRequest.title} in ${nextRelease.version}",
        "successCommentCondition": "${mergeRequest.iid}"
    });
    let ctx = with_commits(token_context(), &["abc"]);
    success(&config(&server, options), &ctx).await.unwrap();
}

#[tokio::test]
async fn test_success_rethrows_comment_errors() {
    let server = MockServer::start().await;
    mount_commit_merge_requests(
        &server,
        "abc",
        json!([{"iid": 1, "project_id": 100, "state": "merged"}]),
    )
    .await;
    mount_closed_issues(&server, 1, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/api/v4/projects/100/merge_requests/1/notes"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let ctx = with_commits(token_context(), &["abc"]);
    let err = success(&config(&server, json!({})), &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(403));
}
