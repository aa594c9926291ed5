//! Host release context.
//!
//! The release orchestrator hands every step the same [`Context`]: where the
//! repository lives, which release is being cut, which commits it contains, the
//! environment of the CI job and the errors of a failed run. The struct is
//! plain data, deserialisable from the orchestrator's camelCase JSON.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name under which GitLab CI is reported by CI detection.
pub const GITLAB_CI_SERVICE: &str = "gitlab";

/// Everything the orchestrator knows about the current run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Context {
    /// Working directory assets are resolved against.
    pub cwd: PathBuf,
    /// Environment variables of the job.
    pub env: HashMap<String, String>,
    /// CI service information.
    pub env_ci: EnvCi,
    /// Orchestrator options.
    pub options: ReleaseOptions,
    pub branch: Option<Branch>,
    pub next_release: Option<NextRelease>,
    pub last_release: Option<Value>,
    pub commits: Vec<Commit>,
    /// Releases published by every plugin for this run (used in comments).
    pub releases: Vec<ReleaseInfo>,
    /// Errors of a failed run, consumed by the fail step.
    pub errors: Vec<ReportedError>,
}

/// CI service detected by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvCi {
    pub is_ci: bool,
    pub service: Option<String>,
}

impl EnvCi {
    /// Detect GitLab CI from the predefined `GITLAB_CI` variable.
    pub fn detect(env: &HashMap<String, String>) -> Self {
        let on_gitlab = env.get("GITLAB_CI").map(|v| v == "true").unwrap_or(false);
        let is_ci = on_gitlab || env.get("CI").map(|v| v == "true").unwrap_or(false);
        EnvCi {
            is_ci,
            service: on_gitlab.then(|| GITLAB_CI_SERVICE.to_string()),
        }
    }

    pub fn is_gitlab(&self) -> bool {
        self.service.as_deref() == Some(GITLAB_CI_SERVICE)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReleaseOptions {
    pub repository_url: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Branch {
    pub name: String,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct NextRelease {
    pub git_tag: String,
    pub git_head: String,
    pub version: String,
    pub notes: Option<String>,
    pub channel: Option<String>,
    #[serde(rename = "type")]
    pub release_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Commit {
    pub hash: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReleaseInfo {
    pub name: Option<String>,
    pub url: Option<String>,
    pub plugin_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportedError {
    pub message: String,
    pub details: Option<String>,
    pub code: Option<String>,
}

impl Context {
    /// Look up an environment variable, treating empty values as unset.
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Look up an environment variable, keeping empty values.
    pub fn env_raw(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }

    /// Variables visible to user templates. `env` is never included.
    pub fn template_scope(&self) -> Map<String, Value> {
        let mut scope = Map::new();
        scope.insert("cwd".into(), Value::String(self.cwd.display().to_string()));
        scope.insert("options".into(), to_value(&self.options));
        scope.insert("branch".into(), to_value(&self.branch));
        scope.insert("nextRelease".into(), to_value(&self.next_release));
        scope.insert(
            "lastRelease".into(),
            self.last_release.clone().unwrap_or(Value::Null),
        );
        scope.insert("commits".into(), to_value(&self.commits));
        scope.insert("releases".into(), to_value(&self.releases));
        scope.insert("errors".into(), to_value(&self.errors));
        scope
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
