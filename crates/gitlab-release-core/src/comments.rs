//! Default comment bodies used when no template is configured.

use crate::context::{Branch, ReleaseInfo, ReportedError};

const HOME_URL: &str = "https://docs.stevedores.org/gitlab-release";

/// What a success comment is posted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentTarget {
    Issue,
    MergeRequest,
}

fn linkify(release: &ReleaseInfo) -> String {
    let name = release.name.as_deref().unwrap_or_default();
    match &release.url {
        Some(url) => format!("[{name}]({url})"),
        None => format!("`{name}`"),
    }
}

/// Comment posted on resolved issues and merged MRs.
///
/// `releases` should only contain named releases.
pub fn success_comment(target: CommentTarget, version: &str, releases: &[ReleaseInfo]) -> String {
    let subject = match target {
        CommentTarget::Issue => "issue has been resolved",
        CommentTarget::MergeRequest => "MR is included",
    };
    let mut body = format!(":tada: This {subject} in version {version} :tada:");

    match releases {
        [] => {}
        [only] => body.push_str(&format!("\n\nThe release is available on {}.", linkify(only))),
        many => {
            body.push_str("\n\nThe release is available on:\n");
            let lines: Vec<String> = many.iter().map(|r| format!("- {}", linkify(r))).collect();
            body.push_str(&lines.join("\n"));
        }
    }

    body.push_str(&format!(
        "\n\nYour **[gitlab-release]({HOME_URL})** bot :package: :rocket:"
    ));
    body
}

/// Body of the issue tracking a failed release.
pub fn fail_comment(branch: Option<&Branch>, errors: &[ReportedError]) -> String {
    let branch = branch.map(|b| b.name.as_str()).unwrap_or("unknown");
    let sections: Vec<String> = errors.iter().map(format_error).collect();

    format!(
        "## :rotating_light: The automated release from the `{branch}` branch failed. :rotating_light:\n\n\
         Each error below has to be resolved before a new release can be published. \
         Errors are usually caused by a misconfiguration or an authentication problem; \
         the details of each one explain how to fix it.\n\n\
         Once they are resolved, the next pipeline on the `{branch}` branch will publish the release. \
         You can also retry the failed CI job.\n\n\
         ---\n\n{}\n\n---\n\n\
         Your **[gitlab-release]({HOME_URL})** bot :package: :rocket:",
        sections.join("\n\n---\n\n")
    )
}

fn format_error(error: &ReportedError) -> String {
    let details = error
        .details
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or("Unfortunately this error doesn't have any additional information.");
    format!("### {}\n\n{}", error.message, details)
}
