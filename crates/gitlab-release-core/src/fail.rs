//! Fail step: open or update the issue tracking a failed release.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::comments;
use crate::config::{resolve_config, PluginConfig, Setting};
use crate::context::Context;
use crate::error::Result;
use crate::gitlab::{GitLabClient, Issue, NewIssue, NoteBody};
use crate::identity::{encode_uri_component, resolve_identity, url_join};
use crate::template::{self, scope_with};

/// Report the errors of a failed release in a GitLab issue.
pub async fn fail(plugin_config: &PluginConfig, ctx: &Context) -> Result<()> {
    let config = resolve_config(plugin_config, ctx);

    if config.fail_comment.is_disabled() || config.fail_title.is_disabled() {
        info!("Skip issue creation.");
        warn!("Disabling failure reporting with `failComment: false` or `failTitle: false` is deprecated; set `failCommentCondition: false` instead.");
        return Ok(());
    }
    if config.fail_comment_condition.is_disabled() {
        info!("Skip issue creation.");
        return Ok(());
    }

    let identity = resolve_identity(
        ctx,
        &config.gitlab_url,
        &config.gitlab_api_url,
        &ctx.options.repository_url,
    )?;
    let client = GitLabClient::new(&config)?;
    let base_scope = ctx.template_scope();
    let scope = Value::Object(base_scope.clone());

    let title = match &config.fail_title {
        Setting::Enabled(source) => template::render(source, &scope)?,
        _ => crate::config::DEFAULT_FAIL_TITLE.to_string(),
    };
    let description = match &config.fail_comment {
        Setting::Enabled(source) => template::render(source, &scope)?,
        _ => comments::fail_comment(ctx.branch.as_ref(), &ctx.errors),
    };

    let issues_url = url_join(&[&identity.project_api_url, "issues"]);
    let search_url = format!(
        "{issues_url}?state=opened&search={}",
        encode_uri_component(&title)
    );
    let open_issues: Vec<Issue> = client.get_json(&search_url).await?;
    let existing = open_issues.into_iter().find(|issue| issue.title == title);
    debug!(found = existing.is_some(), "searched for an open failure issue");

    if let Setting::Enabled(condition) = &config.fail_comment_condition {
        let issue = match &existing {
            Some(issue) => serde_json::to_value(issue)?,
            None => Value::Null,
        };
        let condition_scope = scope_with(base_scope, [("issue", issue)]);
        if !template::evaluate_condition(condition, &condition_scope)? {
            info!("Skip issue creation.");
            return Ok(());
        }
    }

    match existing {
        Some(issue) => {
            let notes_url = url_join(&[
                &config.gitlab_api_url,
                "projects",
                &issue.project_id.to_string(),
                "issues",
                &issue.iid.to_string(),
                "notes",
            ]);
            debug!(iid = issue.iid, "commenting on existing failure issue");
            client
                .post_json::<_, Value>(&notes_url, &NoteBody { body: description })
                .await?;
            info!(
                "Commented on issue #{}: {}.",
                issue.iid,
                issue.web_url.as_deref().unwrap_or_default()
            );
        }
        None => {
            let new_issue = NewIssue {
                id: identity.encoded_project_path.clone(),
                title,
                description,
                labels: config.labels.enabled().cloned(),
                assignee_id: config.assignee.clone(),
            };
            debug!(?new_issue, "creating failure issue");
            let created: Issue = client.post_json(&issues_url, &new_issue).await?;
            info!(
                "Created issue #{}: {}.",
                created.iid,
                created.web_url.as_deref().unwrap_or_default()
            );
        }
    }

    Ok(())
}
