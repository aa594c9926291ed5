//! Error taxonomy for the GitLab release steps.
//!
//! Every user-facing failure carries a stable code (`EINVALIDASSETS`,
//! `ENOGLTOKEN`, ...). Codes are produced from a closed [`ErrorKind`] enum
//! through a single constructor, [`ReleaseError::new`], which looks up the
//! message and details for the kind. Verification collects several of these
//! into an [`AggregateError`]. HTTP failures that do not map to a known code are
//! surfaced unchanged as [`ApiError`].

use serde_json::Value;

use crate::assets::AssetError;
use crate::template::TemplateError;

const DOCS_URL: &str = "https://docs.stevedores.org/gitlab-release";

/// The closed set of typed release errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    InvalidAssets { assets: Value },
    InvalidFailTitle { fail_title: Value },
    InvalidFailComment { fail_comment: Value },
    InvalidLabels { labels: Value },
    InvalidAssignee { assignee: Value },
    InvalidGitlabUrl,
    InvalidGlToken { project_path: String },
    MissingRepo { project_path: String },
    NoPushPermission { project_path: String },
    NoPullPermission { project_path: String },
    NoGlToken { repository_url: String },
}

impl ErrorKind {
    /// Stable error code reported to the host tool.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAssets { .. } => "EINVALIDASSETS",
            ErrorKind::InvalidFailTitle { .. } => "EINVALIDFAILTITLE",
            ErrorKind::InvalidFailComment { .. } => "EINVALIDFAILCOMMENT",
            ErrorKind::InvalidLabels { .. } => "EINVALIDLABELS",
            ErrorKind::InvalidAssignee { .. } => "EINVALIDASSIGNEE",
            ErrorKind::InvalidGitlabUrl => "EINVALIDGITLABURL",
            ErrorKind::InvalidGlToken { .. } => "EINVALIDGLTOKEN",
            ErrorKind::MissingRepo { .. } => "EMISSINGREPO",
            ErrorKind::NoPushPermission { .. } => "EGLNOPUSHPERMISSION",
            ErrorKind::NoPullPermission { .. } => "EGLNOPULLPERMISSION",
            ErrorKind::NoGlToken { .. } => "ENOGLTOKEN",
        }
    }

    fn describe(&self) -> (String, String) {
        match self {
            ErrorKind::InvalidAssets { assets } => (
                "Invalid `assets` option.".to_string(),
                format!(
                    "The `assets` option ({DOCS_URL}#assets) must be a glob `String`, an `Array` of globs, or an `Array` of `Objects` with a non-empty `path` or `url` property.\n\nYour configuration for the `assets` option is `{}`.",
                    stringify(assets)
                ),
            ),
            ErrorKind::InvalidFailTitle { fail_title } => (
                "Invalid `failTitle` option.".to_string(),
                format!(
                    "The `failTitle` option ({DOCS_URL}#failtitle), if defined, must be a non-empty `String` or `false`.\n\nYour configuration for the `failTitle` option is `{}`.",
                    stringify(fail_title)
                ),
            ),
            ErrorKind::InvalidFailComment { fail_comment } => (
                "Invalid `failComment` option.".to_string(),
                format!(
                    "The `failComment` option ({DOCS_URL}#failcomment), if defined, must be a non-empty `String` or `false`.\n\nYour configuration for the `failComment` option is `{}`.",
                    stringify(fail_comment)
                ),
            ),
            ErrorKind::InvalidLabels { labels } => (
                "Invalid `labels` option.".to_string(),
                format!(
                    "The `labels` option ({DOCS_URL}#labels), if defined, must be a non-empty `String` or `false`.\n\nYour configuration for the `labels` option is `{}`.",
                    stringify(labels)
                ),
            ),
            ErrorKind::InvalidAssignee { assignee } => (
                "Invalid `assignee` option.".to_string(),
                format!(
                    "The `assignee` option ({DOCS_URL}#assignee), if defined, must be a non-empty `String`.\n\nYour configuration for the `assignee` option is `{}`.",
                    stringify(assignee)
                ),
            ),
            ErrorKind::InvalidGitlabUrl => (
                "The git repository URL is not a valid GitLab URL.".to_string(),
                "The `repositoryUrl` option must be a valid GitLab URL with the format `<GitLab_URL>/<projectPath>.git`.\n\nIt is usually read from the `repository` field of the project manifest or from the git origin URL of the repository cloned by the CI environment.".to_string(),
            ),
            ErrorKind::InvalidGlToken { project_path } => (
                "Invalid GitLab token.".to_string(),
                format!(
                    "The GitLab token ({DOCS_URL}#gitlab-authentication) configured in the `GL_TOKEN` or `GITLAB_TOKEN` environment variable must be a valid personal, project or group access token allowing to push to the repository {project_path}.\n\nPlease make sure the `GL_TOKEN` or `GITLAB_TOKEN` environment variable holds the exact value of the token."
                ),
            ),
            ErrorKind::MissingRepo { project_path } => (
                format!("The repository {project_path} doesn't exist."),
                format!(
                    "The `repositoryUrl` option must refer to your GitLab repository, and the repository must be reachable through the GitLab API.\n\nWhen using a self-managed GitLab instance, configure the `gitlabUrl` and `gitlabApiPathPrefix` options ({DOCS_URL}#options)."
                ),
            ),
            ErrorKind::NoPushPermission { project_path } => (
                format!("The GitLab token doesn't allow to push on the repository {project_path}."),
                format!(
                    "The user associated with the GitLab token ({DOCS_URL}#gitlab-authentication) configured in the `GL_TOKEN` or `GITLAB_TOKEN` environment variable must be allowed to push to the repository {project_path} (Developer role or higher)."
                ),
            ),
            ErrorKind::NoPullPermission { project_path } => (
                format!("The GitLab token doesn't allow to pull from the repository {project_path}."),
                format!(
                    "The user associated with the GitLab token ({DOCS_URL}#gitlab-authentication) configured in the `GL_TOKEN` or `GITLAB_TOKEN` environment variable must be allowed to pull from the repository {project_path} (Guest role or higher)."
                ),
            ),
            ErrorKind::NoGlToken { repository_url } => (
                "No GitLab token specified.".to_string(),
                format!(
                    "A GitLab access token ({DOCS_URL}#gitlab-authentication) must be created and set in the `GL_TOKEN` or `GITLAB_TOKEN` environment variable of your CI environment, or `useJobToken` must be enabled.\n\nThe token must allow to push to the repository {repository_url}."
                ),
            ),
        }
    }
}

fn stringify(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

/// A typed release error with a stable code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ReleaseError {
    pub code: &'static str,
    pub message: String,
    pub details: String,
}

impl ReleaseError {
    /// Build the error for `kind` from the code → template table.
    pub fn new(kind: ErrorKind) -> Self {
        let (message, details) = kind.describe();
        Self {
            code: kind.code(),
            message,
            details,
        }
    }
}

impl From<ErrorKind> for ReleaseError {
    fn from(kind: ErrorKind) -> Self {
        ReleaseError::new(kind)
    }
}

/// All errors found by one verification pass, in discovery order.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("GitLab verification failed with {count} error(s): {codes}", count = .errors.len(), codes = join_codes(.errors))]
pub struct AggregateError {
    pub errors: Vec<ReleaseError>,
}

impl AggregateError {
    pub fn new(errors: Vec<ReleaseError>) -> Self {
        Self { errors }
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.errors.iter().map(|e| e.code).collect()
    }
}

fn join_codes(errors: &[ReleaseError]) -> String {
    errors.iter().map(|e| e.code).collect::<Vec<_>>().join(", ")
}

/// A GitLab response with an unexpected status, preserved as received.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("GitLab API {method} {url} failed with status {status}: {body}")]
pub struct ApiError {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Umbrella error returned by the lifecycle steps.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error(transparent)]
    Verification(#[from] AggregateError),

    #[error(transparent)]
    Release(#[from] ReleaseError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("invalid releasedAt value {value:?}: {reason}")]
    InvalidReleasedAt { value: String, reason: String },

    #[error("release context is missing `{0}`")]
    MissingContext(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PluginError {
    /// HTTP status of an unexpected API response, if that is what failed.
    pub fn status(&self) -> Option<u16> {
        match self {
            PluginError::Api(err) => Some(err.status),
            PluginError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type for the lifecycle steps.
pub type Result<T> = std::result::Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_codes_are_stable() {
        let kinds = vec![
            ErrorKind::InvalidAssets { assets: json!(42) },
            ErrorKind::InvalidFailTitle { fail_title: json!("") },
            ErrorKind::InvalidFailComment { fail_comment: json!(1) },
            ErrorKind::InvalidLabels { labels: json!(true) },
            ErrorKind::InvalidAssignee { assignee: json!(" ") },
            ErrorKind::InvalidGitlabUrl,
            ErrorKind::InvalidGlToken { project_path: "a/b".into() },
            ErrorKind::MissingRepo { project_path: "a/b".into() },
            ErrorKind::NoPushPermission { project_path: "a/b".into() },
            ErrorKind::NoPullPermission { project_path: "a/b".into() },
            ErrorKind::NoGlToken { repository_url: "https://gitlab.com/a/b.git".into() },
        ];
        let codes: Vec<_> = kinds.into_iter().map(|k| ReleaseError::new(k).code).collect();
        assert_eq!(
            codes,
            vec![
                "EINVALIDASSETS",
                "EINVALIDFAILTITLE",
                "EINVALIDFAILCOMMENT",
                "EINVALIDLABELS",
                "EINVALIDASSIGNEE",
                "EINVALIDGITLABURL",
                "EINVALIDGLTOKEN",
                "EMISSINGREPO",
                "EGLNOPUSHPERMISSION",
                "EGLNOPULLPERMISSION",
                "ENOGLTOKEN",
            ]
        );
    }

    #[test]
    fn test_details_embed_offending_value() {
        let err = ReleaseError::new(ErrorKind::InvalidAssets {
            assets: json!([{"name": "x"}]),
        });
        assert_eq!(err.message, "Invalid `assets` option.");
        assert!(err.details.contains(r#"[{"name":"x"}]"#));
    }

    #[test]
    fn test_missing_repo_names_project() {
        let err = ReleaseError::new(ErrorKind::MissingRepo {
            project_path: "group/project".into(),
        });
        assert_eq!(err.message, "The repository group/project doesn't exist.");
        assert_eq!(err.to_string(), "EMISSINGREPO: The repository group/project doesn't exist.");
    }

    #[test]
    fn test_aggregate_display_lists_codes() {
        let agg = AggregateError::new(vec![
            ErrorKind::InvalidGitlabUrl.into(),
            ErrorKind::NoGlToken {
                repository_url: "x".into(),
            }
            .into(),
        ]);
        assert_eq!(agg.codes(), vec!["EINVALIDGITLABURL", "ENOGLTOKEN"]);
        assert!(agg.to_string().contains("2 error(s)"));
    }

    #[test]
    fn test_api_error_status_preserved() {
        let err = PluginError::from(ApiError {
            method: "GET".into(),
            url: "https://gitlab.com/api/v4/projects/1".into(),
            status: 500,
            body: "boom".into(),
        });
        assert_eq!(err.status(), Some(500));
        assert!(err.to_string().contains("500"));
    }
}
