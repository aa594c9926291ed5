//! Plugin options and their resolution into an effective configuration.
//!
//! [`PluginConfig`] is what the user wrote; [`ResolvedConfig`] is what the
//! steps run with. [`resolve_config`] is a pure function of the options and
//! the host [`Context`]: it reads environment variables from the context, never
//! from the process, and performs no I/O.
//!
//! Precedence for every URL-ish field is: explicit option, primary env var,
//! alternate env var, value derived from GitLab CI, hard-coded default.

pub mod proxy;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::Context;
use crate::identity::url_join;
use crate::retry::RetryPolicy;

pub use proxy::{select_proxy, should_proxy, ProxySelection};

pub const DEFAULT_GITLAB_URL: &str = "https://gitlab.com";
pub const DEFAULT_API_PATH_PREFIX: &str = "/api/v4";
pub const DEFAULT_FAIL_TITLE: &str = "The automated release is failing 🚨";
pub const DEFAULT_LABELS: &str = "semantic-release";

/// Options as supplied by the user, camelCase keys.
///
/// Fields checked by the option validators stay raw JSON so that a value of
/// the wrong type is reported as a typed error rather than rejected while
/// parsing. Unrecognised keys land in `extra` and are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginConfig {
    pub gitlab_url: Option<String>,
    pub gitlab_api_path_prefix: Option<String>,
    pub assets: Option<Value>,
    pub milestones: Option<Value>,
    pub success_comment: Option<Value>,
    pub success_comment_condition: Option<Value>,
    pub fail_title: Option<Value>,
    pub fail_comment: Option<Value>,
    pub fail_comment_condition: Option<Value>,
    pub labels: Option<Value>,
    pub assignee: Option<Value>,
    pub released_at: Option<String>,
    pub retry_limit: Option<u32>,
    pub use_job_token: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PluginConfig {
    /// Raw value of an option by its camelCase name.
    pub fn option(&self, name: &str) -> Option<&Value> {
        match name {
            "assets" => self.assets.as_ref(),
            "milestones" => self.milestones.as_ref(),
            "successComment" => self.success_comment.as_ref(),
            "successCommentCondition" => self.success_comment_condition.as_ref(),
            "failTitle" => self.fail_title.as_ref(),
            "failComment" => self.fail_comment.as_ref(),
            "failCommentCondition" => self.fail_comment_condition.as_ref(),
            "labels" => self.labels.as_ref(),
            "assignee" => self.assignee.as_ref(),
            other => self.extra.get(other),
        }
    }
}

/// A string option that may be left unset or turned off with `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Setting<T> {
    #[default]
    Unset,
    Disabled,
    Enabled(T),
}

impl<T> Setting<T> {
    pub fn is_disabled(&self) -> bool {
        matches!(self, Setting::Disabled)
    }

    pub fn enabled(&self) -> Option<&T> {
        match self {
            Setting::Enabled(value) => Some(value),
            _ => None,
        }
    }

    /// Replace `Unset` with `Enabled(default)`; `Disabled` is kept.
    pub fn or_default_value(self, default: T) -> Self {
        match self {
            Setting::Unset => Setting::Enabled(default),
            other => other,
        }
    }
}

impl Setting<String> {
    /// `false` disables, a string enables, anything else is treated as unset.
    pub fn from_option(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Bool(false)) => Setting::Disabled,
            Some(Value::String(s)) => Setting::Enabled(s.clone()),
            _ => Setting::Unset,
        }
    }
}

/// Header carrying the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenHeader {
    PrivateToken,
    JobToken,
}

impl TokenHeader {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenHeader::PrivateToken => "PRIVATE-TOKEN",
            TokenHeader::JobToken => "JOB-TOKEN",
        }
    }
}

/// Fully-defaulted configuration every step runs with.
#[derive(Clone, PartialEq, Serialize)]
pub struct ResolvedConfig {
    #[serde(skip)]
    pub gitlab_token: Option<String>,
    pub token_header: TokenHeader,
    pub gitlab_url: String,
    pub gitlab_api_url: String,
    pub gitlab_graphql_api_url: String,
    pub assets: Option<Vec<Value>>,
    pub milestones: Option<Vec<String>>,
    pub success_comment: Setting<String>,
    pub success_comment_condition: Setting<String>,
    pub fail_title: Setting<String>,
    pub fail_comment: Setting<String>,
    pub fail_comment_condition: Setting<String>,
    pub labels: Setting<String>,
    pub assignee: Option<String>,
    pub released_at: Option<String>,
    pub proxy: Option<ProxySelection>,
    pub retry: RetryPolicy,
    pub use_job_token: bool,
}

// Token stays out of debug output.
impl std::fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("gitlab_token", &self.gitlab_token.as_ref().map(|_| "***"))
            .field("token_header", &self.token_header)
            .field("gitlab_url", &self.gitlab_url)
            .field("gitlab_api_url", &self.gitlab_api_url)
            .field("gitlab_graphql_api_url", &self.gitlab_graphql_api_url)
            .field("assets", &self.assets)
            .field("milestones", &self.milestones)
            .field("fail_title", &self.fail_title)
            .field("labels", &self.labels)
            .field("proxy", &self.proxy)
            .field("retry", &self.retry)
            .field("use_job_token", &self.use_job_token)
            .finish_non_exhaustive()
    }
}

/// Merge options, environment and CI information into a [`ResolvedConfig`].
pub fn resolve_config(config: &PluginConfig, ctx: &Context) -> ResolvedConfig {
    let on_gitlab = ctx.env_ci.is_gitlab();

    let (gitlab_token, token_header) = if config.use_job_token {
        (ctx.env_var("CI_JOB_TOKEN"), TokenHeader::JobToken)
    } else {
        (
            ctx.env_var("GL_TOKEN").or_else(|| ctx.env_var("GITLAB_TOKEN")),
            TokenHeader::PrivateToken,
        )
    };

    let user_gitlab_url = config
        .gitlab_url
        .as_deref()
        .filter(|url| !url.is_empty())
        .or_else(|| ctx.env_var("GL_URL"))
        .or_else(|| ctx.env_var("GITLAB_URL"));

    // An empty prefix is a deliberate choice (API served at the root).
    let user_prefix = config
        .gitlab_api_path_prefix
        .as_deref()
        .or_else(|| ctx.env_raw("GL_PREFIX"))
        .or_else(|| ctx.env_raw("GITLAB_PREFIX"));

    let gitlab_url = match user_gitlab_url {
        Some(url) => url.to_string(),
        None => ci_gitlab_url(ctx).unwrap_or_else(|| DEFAULT_GITLAB_URL.to_string()),
    };

    let ci_api_url = ctx.env_var("CI_API_V4_URL").filter(|_| on_gitlab);
    let gitlab_api_url = match (user_gitlab_url, user_prefix, ci_api_url) {
        (None, None, Some(ci_api_url)) => ci_api_url.to_string(),
        _ => url_join(&[&gitlab_url, user_prefix.unwrap_or(DEFAULT_API_PATH_PREFIX)]),
    };
    let gitlab_graphql_api_url = graphql_url(&gitlab_url, &gitlab_api_url);

    let proxy = select_proxy(&gitlab_url, |name| ctx.env_var(name));

    ResolvedConfig {
        gitlab_token: gitlab_token.map(str::to_string),
        token_header,
        gitlab_url,
        gitlab_api_url,
        gitlab_graphql_api_url,
        assets: config.assets.as_ref().and_then(cast_array),
        milestones: config
            .milestones
            .as_ref()
            .and_then(cast_array)
            .map(|values| values.iter().filter_map(scalar_to_string).collect()),
        success_comment: Setting::from_option(config.success_comment.as_ref()),
        success_comment_condition: Setting::from_option(config.success_comment_condition.as_ref()),
        fail_title: Setting::from_option(config.fail_title.as_ref())
            .or_default_value(DEFAULT_FAIL_TITLE.to_string()),
        fail_comment: Setting::from_option(config.fail_comment.as_ref()),
        fail_comment_condition: Setting::from_option(config.fail_comment_condition.as_ref()),
        labels: Setting::from_option(config.labels.as_ref())
            .or_default_value(DEFAULT_LABELS.to_string()),
        assignee: config
            .assignee
            .as_ref()
            .and_then(Value::as_str)
            .map(str::to_string),
        released_at: config.released_at.clone().filter(|s| !s.trim().is_empty()),
        proxy,
        retry: config
            .retry_limit
            .map(RetryPolicy::with_limit)
            .unwrap_or_default(),
        use_job_token: config.use_job_token,
    }
}

/// Instance URL derived from `CI_PROJECT_URL` minus the `/CI_PROJECT_PATH` suffix.
fn ci_gitlab_url(ctx: &Context) -> Option<String> {
    if !ctx.env_ci.is_gitlab() {
        return None;
    }
    let project_url = ctx.env_var("CI_PROJECT_URL")?;
    let project_path = ctx.env_var("CI_PROJECT_PATH")?;
    let suffix = format!("/{project_path}");
    Some(
        project_url
            .strip_suffix(&suffix)
            .unwrap_or(project_url)
            .to_string(),
    )
}

/// GraphQL endpoint: the REST version segment swapped for `/api/graphql`.
fn graphql_url(gitlab_url: &str, gitlab_api_url: &str) -> String {
    let trimmed = gitlab_api_url.trim_end_matches('/');
    match trimmed.strip_suffix(DEFAULT_API_PATH_PREFIX) {
        Some(base) => format!("{base}/api/graphql"),
        None => url_join(&[gitlab_url, "/api/graphql"]),
    }
}

/// Wrap a lone value into a one-element list; `null` stays absent.
pub fn cast_array(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Null => None,
        Value::Array(items) => Some(items.clone()),
        other => Some(vec![other.clone()]),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
