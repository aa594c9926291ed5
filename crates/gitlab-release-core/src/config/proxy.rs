//! Proxy selection for the GitLab transport.
//!
//! The proxy is chosen from the scheme of the GitLab base URL: `HTTP_PROXY`
//! serves `http://` instances and `HTTPS_PROXY` serves `https://` ones. A
//! proxy variable for the other scheme never applies. Hosts matched by
//! `NO_PROXY` bypass the proxy.

use serde::{Deserialize, Serialize};

/// The forwarding proxy chosen for the GitLab instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySelection {
    /// Proxy URL as configured in the environment.
    pub url: String,
    /// Scheme of the GitLab instance the proxy was selected for.
    pub scheme: String,
}

/// Whether `host` should go through a proxy given a `NO_PROXY` style list.
///
/// Entries are comma or whitespace separated. `*` bypasses every host,
/// `*.example.com` and `.example.com` bypass subdomains of `example.com`, and
/// a plain `example.com` bypasses the host itself and its subdomains. Ports
/// are ignored on both sides.
pub fn should_proxy(host: &str, no_proxy: &str) -> bool {
    let host = strip_port(host).to_ascii_lowercase();
    if host.is_empty() {
        return true;
    }

    for entry in no_proxy
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|e| !e.is_empty())
    {
        if entry == "*" {
            return false;
        }
        let entry = strip_port(entry).to_ascii_lowercase();
        let suffix = entry.trim_start_matches('*');
        if suffix.starts_with('.') {
            if host.ends_with(suffix) {
                return false;
            }
        } else if host == suffix || host.ends_with(&format!(".{suffix}")) {
            return false;
        }
    }

    true
}

/// Pick the proxy for `gitlab_url` from environment lookups.
///
/// Upper-case variables win over their lower-case spelling.
pub fn select_proxy<'a, F>(gitlab_url: &str, env: F) -> Option<ProxySelection>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let lookup = |name: &str| {
        env(name)
            .or_else(|| env(&name.to_ascii_lowercase()))
            .filter(|v| !v.trim().is_empty())
    };

    let (scheme, variable) = if starts_with_ignore_case(gitlab_url, "https://") {
        ("https", "HTTPS_PROXY")
    } else if starts_with_ignore_case(gitlab_url, "http://") {
        ("http", "HTTP_PROXY")
    } else {
        return None;
    };

    let proxy_url = lookup(variable)?;
    let no_proxy = lookup("NO_PROXY").unwrap_or_default();
    if !should_proxy(url_host(gitlab_url), no_proxy) {
        return None;
    }

    Some(ProxySelection {
        url: proxy_url.to_string(),
        scheme: scheme.to_string(),
    })
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .map(|head| head.eq_ignore_ascii_case(prefix))
        .unwrap_or(false)
}

/// Host (with port) of an absolute URL.
fn url_host(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    authority.rsplit('@').next().unwrap_or(authority)
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host
            .find(']')
            .map(|end| &host[..=end])
            .unwrap_or(host);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
