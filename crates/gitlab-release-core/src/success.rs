//! Success step: comment on the merge requests and issues a release ships.
//!
//! Merge requests are found from the release commits (merged ones only),
//! issues from what those merge requests close (closed ones only). Both lists
//! are deduplicated by `(project_id, iid)` before anything is posted.

use std::collections::HashSet;

use futures::future::try_join_all;
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::comments::{self, CommentTarget};
use crate::config::{resolve_config, PluginConfig, ResolvedConfig, Setting};
use crate::context::{Context, ReleaseInfo};
use crate::error::{PluginError, Result};
use crate::gitlab::{GitLabClient, Issue, MergeRequest, NoteBody};
use crate::identity::{resolve_identity, url_join, ProjectIdentity};
use crate::template::{self, scope_with};

/// Post release comments on related merge requests and issues.
pub async fn success(plugin_config: &PluginConfig, ctx: &Context) -> Result<()> {
    let config = resolve_config(plugin_config, ctx);

    if config.success_comment.is_disabled() || config.success_comment_condition.is_disabled() {
        info!("Skip commenting on issues and merge requests.");
        return Ok(());
    }

    let identity = resolve_identity(
        ctx,
        &config.gitlab_url,
        &config.gitlab_api_url,
        &ctx.options.repository_url,
    )?;
    let client = GitLabClient::new(&config)?;

    let commenter = Commenter {
        client: &client,
        config: &config,
        identity: &identity,
        ctx,
        base_scope: ctx.template_scope(),
        releases: ctx
            .releases
            .iter()
            .filter(|release| release.name.is_some())
            .cloned()
            .collect(),
    };

    commenter.run().await.map_err(|err| {
        error!("An error occurred while posting comments to related issues and merge requests:\n{err}");
        err
    })
}

struct Commenter<'a> {
    client: &'a GitLabClient,
    config: &'a ResolvedConfig,
    identity: &'a ProjectIdentity,
    ctx: &'a Context,
    base_scope: Map<String, Value>,
    releases: Vec<ReleaseInfo>,
}

impl Commenter<'_> {
    async fn run(&self) -> Result<()> {
        let merge_requests = dedupe(
            try_join_all(self.ctx.commits.iter().map(|c| self.merged_requests(&c.hash)))
                .await?
                .into_iter()
                .flatten(),
            |mr: &MergeRequest| (mr.project_id, mr.iid),
        );
        let issues = dedupe(
            try_join_all(merge_requests.iter().map(|mr| self.closed_issues(mr)))
                .await?
                .into_iter()
                .flatten(),
            |issue: &Issue| (issue.project_id, issue.iid),
        );
        debug!(
            merge_requests = merge_requests.len(),
            issues = issues.len(),
            "found items to comment on"
        );

        try_join_all(issues.iter().map(|issue| self.comment_issue(issue))).await?;
        try_join_all(merge_requests.iter().map(|mr| self.comment_merge_request(mr))).await?;
        Ok(())
    }

    async fn merged_requests(&self, sha: &str) -> Result<Vec<MergeRequest>> {
        let endpoint = url_join(&[
            &self.identity.project_api_url,
            "repository/commits",
            sha,
            "merge_requests",
        ]);
        debug!(%endpoint, "getting merge requests of commit");
        let merge_requests: Vec<MergeRequest> = self.client.get_json(&endpoint).await?;
        Ok(merge_requests.into_iter().filter(|mr| mr.state == "merged").collect())
    }

    async fn closed_issues(&self, mr: &MergeRequest) -> Result<Vec<Issue>> {
        let endpoint = url_join(&[
            &self.config.gitlab_api_url,
            "projects",
            &mr.project_id.to_string(),
            "merge_requests",
            &mr.iid.to_string(),
            "closes_issues",
        ]);
        debug!(%endpoint, "getting issues closed by merge request");
        let issues: Vec<Issue> = self.client.get_json(&endpoint).await?;
        Ok(issues.into_iter().filter(|issue| issue.state == "closed").collect())
    }

    async fn comment_issue(&self, issue: &Issue) -> Result<()> {
        let scope = scope_with(
            self.base_scope.clone(),
            [("issue", serde_json::to_value(issue)?), ("mergeRequest", Value::Bool(false))],
        );
        let endpoint = url_join(&[
            &self.config.gitlab_api_url,
            "projects",
            &issue.project_id.to_string(),
            "issues",
            &issue.iid.to_string(),
            "notes",
        ]);
        self.post_comment(&endpoint, &scope, CommentTarget::Issue).await
    }

    async fn comment_merge_request(&self, mr: &MergeRequest) -> Result<()> {
        let scope = scope_with(
            self.base_scope.clone(),
            [("issue", Value::Bool(false)), ("mergeRequest", serde_json::to_value(mr)?)],
        );
        let endpoint = url_join(&[
            &self.config.gitlab_api_url,
            "projects",
            &mr.project_id.to_string(),
            "merge_requests",
            &mr.iid.to_string(),
            "notes",
        ]);
        self.post_comment(&endpoint, &scope, CommentTarget::MergeRequest).await
    }

    async fn post_comment(&self, endpoint: &str, scope: &Value, target: CommentTarget) -> Result<()> {
        if let Setting::Enabled(condition) = &self.config.success_comment_condition {
            if !template::evaluate_condition(condition, scope)? {
                debug!(endpoint, "comment condition not met, skipping");
                return Ok(());
            }
        }

        let body = match &self.config.success_comment {
            Setting::Enabled(source) => template::render(source, scope)?,
            _ => {
                let version = self
                    .ctx
                    .next_release
                    .as_ref()
                    .map(|release| release.version.as_str())
                    .ok_or(PluginError::MissingContext("nextRelease"))?;
                comments::success_comment(target, version, &self.releases)
            }
        };

        debug!(endpoint, "posting note");
        self.client
            .post_json::<_, Value>(endpoint, &NoteBody { body })
            .await?;
        Ok(())
    }
}

/// Keep the first item per key, in order.
fn dedupe<T, K, I, F>(items: I, key: F) -> Vec<T>
where
    I: IntoIterator<Item = T>,
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(key(item))).collect()
}
