//! Verify step: options, project identity, token and permissions.
//!
//! Every problem found is collected; the step fails once with an
//! [`AggregateError`] listing them in discovery order (options, repository
//! URL, token, then authentication/permission). Unexpected HTTP statuses are
//! not aggregated: they abort the step as an [`ApiError`](crate::error::ApiError).

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::{resolve_config, PluginConfig, ResolvedConfig};
use crate::context::Context;
use crate::error::{AggregateError, ErrorKind, ReleaseError, Result};
use crate::gitlab::models::{PULL_ACCESS_LEVEL, PUSH_ACCESS_LEVEL};
use crate::gitlab::{GitLabClient, Project, UserPermissions};
use crate::identity::{resolve_identity, url_join, ProjectIdentity};
use crate::options::validate_options;

const PERMISSIONS_QUERY: &str =
    "query($fullPath: ID!) { project(fullPath: $fullPath) { userPermissions { pushCode downloadCode } } }";

#[derive(Debug, Deserialize)]
struct PermissionsData {
    project: Option<PermissionsProject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionsProject {
    user_permissions: UserPermissions,
}

/// What the token is allowed to do on the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Grant {
    pull: bool,
    push: bool,
}

impl Grant {
    fn from_level(level: u32) -> Self {
        Self {
            pull: level >= PULL_ACCESS_LEVEL,
            push: level >= PUSH_ACCESS_LEVEL,
        }
    }
}

/// Run every verification and fail with all problems found.
pub async fn verify(plugin_config: &PluginConfig, ctx: &Context) -> Result<()> {
    let config = resolve_config(plugin_config, ctx);
    let repository_url = &ctx.options.repository_url;

    let mut errors = validate_options(plugin_config);

    let identity = match resolve_identity(ctx, &config.gitlab_url, &config.gitlab_api_url, repository_url) {
        Ok(identity) => Some(identity),
        Err(err) => {
            errors.push(err);
            None
        }
    };

    if config.gitlab_token.is_none() {
        errors.push(ReleaseError::new(ErrorKind::NoGlToken {
            repository_url: repository_url.clone(),
        }));
    }

    if let (Some(identity), Some(_)) = (&identity, &config.gitlab_token) {
        info!("Verify GitLab authentication ({})", config.gitlab_api_url);
        let client = GitLabClient::new(&config)?;
        if let Some(err) = check_access(&client, &config, identity, ctx.options.dry_run).await? {
            errors.push(err);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(AggregateError::new(errors).into())
    }
}

/// `Ok(Some(..))` is a known, reportable failure; `Err` is anything else.
async fn check_access(
    client: &GitLabClient,
    config: &ResolvedConfig,
    identity: &ProjectIdentity,
    dry_run: bool,
) -> Result<Option<ReleaseError>> {
    let project_path = identity.project_path.clone();

    let lookup = if config.use_job_token {
        // Job tokens cannot introspect permissions; reaching the project proves access.
        let url = format!("{}?per_page=1", url_join(&[&identity.project_api_url, "releases"]));
        client.get_json::<Value>(&url).await.map(|_| None)
    } else {
        client
            .get_json::<Project>(&identity.project_api_url)
            .await
            .map(Some)
    };

    let project = match lookup {
        Ok(project) => project,
        Err(err) => {
            return match err.status() {
                Some(401) => Ok(Some(ErrorKind::InvalidGlToken { project_path }.into())),
                Some(404) => Ok(Some(ErrorKind::MissingRepo { project_path }.into())),
                _ => Err(err),
            }
        }
    };

    let Some(project) = project else {
        return Ok(None);
    };

    let level = project
        .permissions
        .as_ref()
        .and_then(|permissions| permissions.max_access_level());
    let grant = match level {
        Some(level) => Grant::from_level(level),
        None => graphql_grant(client, config, identity).await?,
    };
    debug!(?grant, dry_run, "resolved project permissions");

    let denied = if dry_run {
        (!grant.pull).then_some(ErrorKind::NoPullPermission { project_path })
    } else {
        (!grant.push).then_some(ErrorKind::NoPushPermission { project_path })
    };
    Ok(denied.map(ReleaseError::new))
}

/// Permissions inherited from a parent group or granted to admins are not
/// reported by the REST project endpoint; ask GraphQL instead.
async fn graphql_grant(
    client: &GitLabClient,
    config: &ResolvedConfig,
    identity: &ProjectIdentity,
) -> Result<Grant> {
    debug!("no direct access level, querying GraphQL permissions");
    let data: Option<PermissionsData> = client
        .graphql(
            &config.gitlab_graphql_api_url,
            PERMISSIONS_QUERY,
            json!({ "fullPath": identity.project_path }),
        )
        .await?;

    let permissions = data
        .and_then(|d| d.project)
        .map(|p| p.user_permissions)
        .unwrap_or_default();
    Ok(Grant {
        pull: permissions.download_code || permissions.push_code,
        push: permissions.push_code,
    })
}
