//! Shared fixtures for the wiremock-backed step tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;

use gitlab_release_core::context::{Commit, NextRelease, ReleaseOptions};
use gitlab_release_core::{Context, PluginConfig};
use serde_json::{json, Value};
use wiremock::MockServer;

pub const REPOSITORY_URL: &str = "https://gitlab.com/test_user/test_repo.git";
pub const PROJECT_API_PATH: &str = "/api/v4/projects/test_user%2Ftest_repo";
pub const TOKEN: &str = "gitlab_token";

/// Options pointing the steps at the mock server, with retries off.
pub fn config(server: &MockServer, extra: Value) -> PluginConfig {
    let mut options = json!({
        "gitlabUrl": server.uri(),
        "retryLimit": 0,
    });
    if let (Some(base), Value::Object(extra)) = (options.as_object_mut(), extra) {
        base.extend(extra);
    }
    serde_json::from_value(options).expect("valid plugin config")
}

pub fn context(env: &[(&str, &str)]) -> Context {
    let env: HashMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Context {
        env,
        options: ReleaseOptions {
            repository_url: REPOSITORY_URL.to_string(),
            dry_run: false,
        },
        next_release: Some(NextRelease {
            git_tag: "v1.0.0".into(),
            git_head: "abc123".into(),
            version: "1.0.0".into(),
            notes: Some("Test release note body".into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn token_context() -> Context {
    context(&[("GL_TOKEN", TOKEN)])
}

pub fn with_cwd(mut ctx: Context, cwd: &Path) -> Context {
    ctx.cwd = cwd.to_path_buf();
    ctx
}

pub fn with_commits(mut ctx: Context, hashes: &[&str]) -> Context {
    ctx.commits = hashes
        .iter()
        .map(|hash| Commit {
            hash: hash.to_string(),
            message: None,
        })
        .collect();
    ctx
}

pub fn project_with_access(level: u32) -> Value {
    json!({
        "id": 100,
        "path_with_namespace": "test_user/test_repo",
        "permissions": {"project_access": {"access_level": level}, "group_access": null}
    })
}
