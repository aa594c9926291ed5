//! Project identity resolution.
//!
//! Turns the repository URL (or, on GitLab CI, the predefined project
//! variables) into the project path GitLab knows the project by, plus the
//! REST base URL every project-scoped call is made against.
//!
//! # Invariants
//!
//! - `project_path` never has leading/trailing slashes nor a `.git` suffix.
//! - `encoded_project_path` is `project_path` encoded once as a single path
//!   segment (`/` becomes `%2F`); subgroup paths are encoded as one unit.
//! - When the job runs on GitLab CI, `CI_PROJECT_ID` addresses the API ahead
//!   of any path, and `CI_PROJECT_PATH` wins over URL parsing.

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{ErrorKind, ReleaseError};

/// How the current project is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIdentity {
    /// Unencoded `namespace/.../project` path (GraphQL `fullPath`).
    pub project_path: String,
    /// `project_path` encoded for use as one URL path segment.
    pub encoded_project_path: String,
    /// Numeric project ID from GitLab CI, when available.
    pub project_id: Option<String>,
    /// `<apiUrl>/projects/<id or encoded path>`.
    pub project_api_url: String,
}

/// Resolve the project identity for the current run.
///
/// Fails with `EINVALIDGITLABURL` when no project path can be derived.
pub fn resolve_identity(
    ctx: &Context,
    gitlab_url: &str,
    gitlab_api_url: &str,
    repository_url: &str,
) -> Result<ProjectIdentity, ReleaseError> {
    let on_gitlab = ctx.env_ci.is_gitlab();
    let project_id = if on_gitlab {
        ctx.env_var("CI_PROJECT_ID").map(str::to_string)
    } else {
        None
    };

    let project_path = match ctx.env_var("CI_PROJECT_PATH") {
        Some(path) if on_gitlab => path.to_string(),
        _ => project_path_from_url(gitlab_url, repository_url),
    };

    if project_path.is_empty() {
        return Err(ReleaseError::new(ErrorKind::InvalidGitlabUrl));
    }

    let encoded_project_path = encode_uri_component(&project_path);
    let addressed_by = project_id.as_deref().unwrap_or(&encoded_project_path);
    let project_api_url = url_join(&[gitlab_api_url, "projects", addressed_by]);

    Ok(ProjectIdentity {
        project_path,
        encoded_project_path,
        project_id,
        project_api_url,
    })
}

/// Derive `namespace/project` from a git remote, dropping the instance's own
/// sub-path (for instances served below a "context" path) and `.git`.
pub fn project_path_from_url(gitlab_url: &str, repository_url: &str) -> String {
    let base = url_path(gitlab_url);
    let base = base.trim_end_matches('/');

    let path = url_path(repository_url);
    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);

    let relative = if !base.is_empty() && is_segment_prefix(path, base) {
        &path[base.len()..]
    } else {
        path
    };

    relative.trim_matches('/').to_string()
}

fn is_segment_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

/// Path component of an URL or SCP-style git remote (`git@host:group/repo.git`).
///
/// Query strings and fragments are dropped. The returned path always starts
/// with `/` unless it is empty.
pub fn url_path(url: &str) -> String {
    let rest = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    let rest = rest.split(['?', '#']).next().unwrap_or_default();

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };

    let host = authority.rsplit('@').next().unwrap_or(authority);
    // Bracketed IPv6 hosts contain colons of their own.
    let host = match host.find(']') {
        Some(idx) if host.starts_with('[') => &host[idx + 1..],
        _ => host,
    };

    if let Some(colon) = host.find(':') {
        let after = &host[colon + 1..];
        let is_port = after.chars().all(|c| c.is_ascii_digit());
        if !after.is_empty() && !is_port {
            return format!("/{after}{path}");
        }
    }

    path.to_string()
}

/// Join URL pieces with exactly one `/` between them. Empty pieces are skipped.
pub fn url_join(parts: &[&str]) -> String {
    let mut joined = String::new();
    for part in parts.iter().filter(|p| !p.is_empty()) {
        if joined.is_empty() {
            joined.push_str(part);
        } else {
            let head = joined.trim_end_matches('/').len();
            joined.truncate(head);
            joined.push('/');
            joined.push_str(part.trim_start_matches('/'));
        }
    }
    joined
}

/// Percent-encode `input` so it can be used as a single URL path segment or
/// query value. Only `A-Z a-z 0-9 - _ . ~` pass through.
pub fn encode_uri_component(input: &str) -> String {
    urlencoding::encode(input).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EnvCi;
    use std::collections::HashMap;

    const API: &str = "https://api.gitlab.com";

    fn ctx(service: Option<&str>, env: &[(&str, &str)]) -> Context {
        Context {
            env_ci: EnvCi {
                is_ci: service.is_some(),
                service: service.map(str::to_string),
            },
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            ..Default::default()
        }
    }

    fn path_of(gitlab_url: &str, repo: &str) -> String {
        resolve_identity(&ctx(None, &[]), gitlab_url, API, repo)
            .unwrap()
            .project_path
    }

    #[test]
    fn test_https_url() {
        assert_eq!(path_of("https://gitlbab.com", "https://gitlab.com/owner/repo.git"), "owner/repo");
        assert_eq!(path_of("https://gitlbab.com", "https://gitlab.com/owner/repo"), "owner/repo");
        assert_eq!(path_of("https://gitlab.com", "git+https://gitalb.com/owner/repo.git"), "owner/repo");
    }

    #[test]
    fn test_git_ssh_url() {
        assert_eq!(path_of("https://gitlab.com", "git+ssh://git@gitlab.com/owner/repo.git"), "owner/repo");
        assert_eq!(path_of("https://gitlab.com", "git+ssh://git@gitlab.com/owner/repo"), "owner/repo");
    }

    #[test]
    fn test_scp_style_remote() {
        assert_eq!(path_of("https://othertesturl.com:9090", "git@othertesturl.com:owner/repo.git"), "owner/repo");
        assert_eq!(path_of("https://gitlab.com", "https://gitlab.com:owner/repo.git"), "owner/repo");
    }

    #[test]
    fn test_context_in_repo_url() {
        assert_eq!(
            path_of("https://gitlbab.com/context", "https://gitlab.com/context/owner/repo.git"),
            "owner/repo"
        );
        assert_eq!(
            path_of("https://gitlbab.com/context", "git+ssh://git@gitlab.com/context/owner/repo.git"),
            "owner/repo"
        );
    }

    #[test]
    fn test_context_not_in_repo_url() {
        assert_eq!(path_of("https://gitlbab.com/context", "https://gitlab.com/owner/repo.git"), "owner/repo");
        assert_eq!(
            path_of("https://gitlbab.com/context", "git+ssh://git@gitlab.com/owner/repo.git"),
            "owner/repo"
        );
    }

    #[test]
    fn test_context_only_stripped_on_segment_boundary() {
        assert_eq!(
            path_of("https://gitlab.com/context", "https://gitlab.com/contextual/repo.git"),
            "contextual/repo"
        );
    }

    #[test]
    fn test_subgroups_preserved() {
        assert_eq!(
            path_of("https://gitlbab.com/context", "https://gitlab.com/orga/subgroup/owner/repo.git"),
            "orga/subgroup/owner/repo"
        );
        assert_eq!(
            path_of("https://customurl.com:9090/context", "git@customurl.com:orga/subgroup/owner/repo.git"),
            "orga/subgroup/owner/repo"
        );
    }

    #[test]
    fn test_trailing_slash_removed() {
        assert_eq!(path_of("https://gitlab.com", "https://gitlab.com/owner/repo/"), "owner/repo");
    }

    #[test]
    fn test_repo_url_equal_to_context_is_invalid() {
        let err = resolve_identity(
            &ctx(None, &[]),
            "https://gitlab.com/context",
            API,
            "git+ssh://git@gitlab.com/context.git",
        )
        .unwrap_err();
        assert_eq!(err.code, "EINVALIDGITLABURL");
    }

    #[test]
    fn test_ci_project_path_wins_on_gitlab() {
        let identity = resolve_identity(
            &ctx(Some("gitlab"), &[("CI_PROJECT_PATH", "other-owner/other-repo")]),
            "https://gitlbab.com",
            API,
            "https://gitlab.com/owner/repo.git",
        )
        .unwrap();
        assert_eq!(identity.project_path, "other-owner/other-repo");
        assert_eq!(identity.project_api_url, "https://api.gitlab.com/projects/other-owner%2Fother-repo");
    }

    #[test]
    fn test_ci_project_path_ignored_elsewhere() {
        let identity = resolve_identity(
            &ctx(Some("travis"), &[("CI_PROJECT_PATH", "other-owner/other-repo"), ("CI_PROJECT_ID", "42")]),
            "https://gitlbab.com",
            API,
            "https://gitlab.com/owner/repo.git",
        )
        .unwrap();
        assert_eq!(identity.project_path, "owner/repo");
        assert_eq!(identity.project_id, None);
    }

    #[test]
    fn test_ci_project_id_addresses_api() {
        let identity = resolve_identity(
            &ctx(Some("gitlab"), &[("CI_PROJECT_ID", "42"), ("CI_PROJECT_PATH", "a/b")]),
            "https://gitlab.com",
            API,
            "https://gitlab.com/owner/repo.git",
        )
        .unwrap();
        assert_eq!(identity.project_api_url, "https://api.gitlab.com/projects/42");
        assert_eq!(identity.project_path, "a/b");
    }

    #[test]
    fn test_encoding_is_single_pass() {
        let once = encode_uri_component("orga/subgroup/owner/repo");
        assert_eq!(once, "orga%2Fsubgroup%2Fowner%2Frepo");
        // A path that already contains an escape is encoded literally, once.
        assert_eq!(encode_uri_component("a%2Fb"), "a%252Fb");
        assert_eq!(encode_uri_component("v1.0.0"), "v1.0.0");
        assert_eq!(encode_uri_component("The failing 🚨"), "The%20failing%20%F0%9F%9A%A8");
        assert_eq!(encode_uri_component("a/b c!*'()"), "a%2Fb%20c%21%2A%27%28%29");
    }

    #[test]
    fn test_url_join() {
        assert_eq!(url_join(&["https://host.com", "/api/prefix"]), "https://host.com/api/prefix");
        assert_eq!(url_join(&["https://host.com/", "api/v4"]), "https://host.com/api/v4");
        assert_eq!(url_join(&["https://othertesturl.com:9090", ""]), "https://othertesturl.com:9090");
        assert_eq!(
            url_join(&["https://customurl.com:9090/context", "prefix"]),
            "https://customurl.com:9090/context/prefix"
        );
        assert_eq!(
            url_join(&["https://gitlab.com", "owner/repo", "/-/releases/v1.0.0"]),
            "https://gitlab.com/owner/repo/-/releases/v1.0.0"
        );
    }

    #[test]
    fn test_url_path_variants() {
        assert_eq!(url_path("https://gitlab.com"), "");
        assert_eq!(url_path("https://gitlab.com/"), "/");
        assert_eq!(url_path("https://gitlab.com:8443/ctx?x=1#y"), "/ctx");
        assert_eq!(url_path("ssh://git@[::1]:2222/group/repo.git"), "/group/repo.git");
    }
}
