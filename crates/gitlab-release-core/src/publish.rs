//! Publish step: upload assets and create the GitLab release.

use std::path::Path;
use std::sync::OnceLock;

use futures::future::try_join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::assets::{AssetError, AssetObject, AssetResolver, AssetSpec, PathSpec, ResolvedAsset, UploadTarget};
use crate::config::{resolve_config, PluginConfig, ResolvedConfig};
use crate::context::{Context, NextRelease};
use crate::error::{PluginError, Result};
use crate::gitlab::{GitLabClient, ReleaseAssets, ReleaseLink, ReleasePayload, UploadResponse};
use crate::identity::{encode_uri_component, resolve_identity, url_join, ProjectIdentity};
use crate::template;

/// Display name reported to the host for the created release.
pub const RELEASE_NAME: &str = "GitLab release";

const DEFAULT_PACKAGE_NAME: &str = "release";

/// The release as reported back to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedRelease {
    pub name: String,
    pub url: String,
}

/// Everything an asset upload needs, borrowed for the duration of the step.
struct Publisher<'a> {
    client: &'a GitLabClient,
    config: &'a ResolvedConfig,
    identity: &'a ProjectIdentity,
    next_release: &'a NextRelease,
    cwd: &'a Path,
}

/// Upload the configured assets and create the release for `nextRelease`.
pub async fn publish(
    plugin_config: &PluginConfig,
    ctx: &Context,
    resolver: &dyn AssetResolver,
) -> Result<PublishedRelease> {
    let config = resolve_config(plugin_config, ctx);
    let identity = resolve_identity(
        ctx,
        &config.gitlab_url,
        &config.gitlab_api_url,
        &ctx.options.repository_url,
    )?;
    let next_release = ctx
        .next_release
        .as_ref()
        .ok_or(PluginError::MissingContext("nextRelease"))?;
    let client = GitLabClient::new(&config)?;
    let scope = Value::Object(ctx.template_scope());

    debug!(tag = %next_release.git_tag, head = %next_release.git_head, "publishing release");

    let specs = render_asset_specs(config.assets.as_deref().unwrap_or_default(), &scope)?;
    let assets = resolver.resolve(&ctx.cwd, &specs)?;
    debug!(count = assets.len(), "resolved release assets");

    let publisher = Publisher {
        client: &client,
        config: &config,
        identity: &identity,
        next_release,
        cwd: &ctx.cwd,
    };
    let links: Vec<ReleaseLink> = try_join_all(assets.iter().map(|asset| publisher.link_for(asset)))
        .await?
        .into_iter()
        .flatten()
        .collect();

    let released_at = match &config.released_at {
        Some(source) => Some(parse_released_at(&template::render(source, &scope)?)?),
        None => None,
    };

    let notes = next_release.notes.as_deref().unwrap_or_default();
    let payload = ReleasePayload {
        tag_name: next_release.git_tag.clone(),
        description: if notes.trim().is_empty() {
            next_release.git_tag.clone()
        } else {
            notes.to_string()
        },
        milestones: config.milestones.clone(),
        released_at,
        assets: ReleaseAssets { links },
    };

    debug!(?payload, "creating release");
    let releases_url = url_join(&[&identity.project_api_url, "releases"]);
    if let Err(err) = client.post_json::<_, Value>(&releases_url, &payload).await {
        error!("An error occurred while making a request to the GitLab release API:\n{err}");
        return Err(err);
    }

    info!("Published GitLab release: {}", next_release.git_tag);

    Ok(PublishedRelease {
        name: RELEASE_NAME.to_string(),
        url: url_join(&[
            &config.gitlab_url,
            &identity.project_path,
            "/-/releases/",
            &encode_uri_component(&next_release.git_tag),
        ]),
    })
}

impl Publisher<'_> {
    /// Link entry for one asset; `None` when the file is missing.
    async fn link_for(&self, asset: &ResolvedAsset) -> Result<Option<ReleaseLink>> {
        if let Some(url) = &asset.url {
            return Ok(Some(ReleaseLink {
                name: asset.label.clone().unwrap_or_else(|| url.clone()),
                url: url.clone(),
                link_type: asset.link_type.clone(),
                filepath: asset.filepath.clone(),
            }));
        }

        let Some(path) = &asset.path else {
            return Ok(None);
        };
        let file = self.cwd.join(path);
        let is_file = tokio::fs::metadata(&file)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            error!("The asset {path} cannot be read, and will be ignored.");
            return Ok(None);
        }

        let contents = tokio::fs::read(&file).await.map_err(|err| AssetError::Unreadable {
            path: path.clone(),
            message: err.to_string(),
        })?;
        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());

        let link = match asset.target {
            UploadTarget::ProjectUpload => self.upload_file(asset, &file_name, &contents).await?,
            UploadTarget::GenericPackage => self.upload_package(asset, &file_name, &contents).await?,
        };
        Ok(Some(link))
    }

    async fn upload_file(&self, asset: &ResolvedAsset, file_name: &str, contents: &[u8]) -> Result<ReleaseLink> {
        let endpoint = url_join(&[&self.identity.project_api_url, "uploads"]);
        debug!(file_name, "uploading file");
        let upload: UploadResponse = self
            .client
            .post_file(&endpoint, file_name, contents)
            .await
            .map_err(|err| {
                error!("An error occurred while uploading {file_name} to the GitLab project uploads API:\n{err}");
                err
            })?;

        let url = upload_link_url(&self.config.gitlab_url, &self.identity.project_path, &upload);
        info!("Uploaded file: {url}");

        Ok(ReleaseLink {
            name: asset
                .label
                .clone()
                .or_else(|| upload.alt.clone())
                .unwrap_or_else(|| file_name.to_string()),
            url,
            link_type: asset.link_type.clone(),
            filepath: asset.filepath.clone(),
        })
    }

    async fn upload_package(&self, asset: &ResolvedAsset, file_name: &str, contents: &[u8]) -> Result<ReleaseLink> {
        let label = asset.label.clone().unwrap_or_else(|| file_name.to_string());
        let package_name = asset.package_name.as_deref().unwrap_or(DEFAULT_PACKAGE_NAME);
        let download_url = url_join(&[
            &self.identity.project_api_url,
            "packages/generic",
            &encode_uri_component(package_name),
            &encode_uri_component(&self.next_release.version),
            &encode_uri_component(&label),
        ]);
        let query = match &asset.status {
            Some(status) => format!("?status={}&select=package_file", encode_uri_component(status)),
            None => "?select=package_file".to_string(),
        };

        debug!(file_name, package_name, "uploading generic package");
        self.client
            .put_bytes::<Value>(&format!("{download_url}{query}"), contents)
            .await
            .map_err(|err| {
                error!("An error occurred while uploading {file_name} to the GitLab generic package API:\n{err}");
                err
            })?;
        info!("Uploaded file: {download_url}");

        Ok(ReleaseLink {
            name: label,
            url: download_url,
            link_type: Some(asset.link_type.clone().unwrap_or_else(|| "package".to_string())),
            filepath: asset.filepath.clone(),
        })
    }
}

/// Public URL of an uploaded file.
fn upload_link_url(gitlab_url: &str, project_path: &str, upload: &UploadResponse) -> String {
    if is_absolute_url(&upload.url) {
        return upload.url.clone();
    }
    match &upload.full_path {
        Some(full_path) => url_join(&[gitlab_url, full_path]),
        None => url_join(&[gitlab_url, project_path, &upload.url]),
    }
}

fn is_absolute_url(url: &str) -> bool {
    static ABSOLUTE_URL: OnceLock<Option<Regex>> = OnceLock::new();
    ABSOLUTE_URL
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(url))
}

fn parse_released_at(value: &str) -> Result<String> {
    let trimmed = value.trim();
    chrono::DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.to_rfc3339())
        .map_err(|err| PluginError::InvalidReleasedAt {
            value: trimmed.to_string(),
            reason: err.to_string(),
        })
}

/// Render the templated fields of every asset before globbing.
fn render_asset_specs(values: &[Value], scope: &Value) -> Result<Vec<AssetSpec>> {
    let render = |s: &String| template::render(s, scope);
    let render_opt = |s: &Option<String>| s.as_ref().map(|s| template::render(s, scope)).transpose();

    values
        .iter()
        .map(|value| -> Result<AssetSpec> {
            let spec: AssetSpec = serde_json::from_value(value.clone())?;
            Ok(match spec {
                AssetSpec::Glob(glob) => AssetSpec::Glob(render(&glob)?),
                AssetSpec::Globs(globs) => {
                    AssetSpec::Globs(globs.iter().map(render).collect::<std::result::Result<_, _>>()?)
                }
                AssetSpec::Object(object) => AssetSpec::Object(AssetObject {
                    path: match &object.path {
                        Some(PathSpec::One(p)) => Some(PathSpec::One(render(p)?)),
                        Some(PathSpec::Many(ps)) => Some(PathSpec::Many(
                            ps.iter().map(render).collect::<std::result::Result<_, _>>()?,
                        )),
                        None => None,
                    },
                    url: render_opt(&object.url)?,
                    label: render_opt(&object.label)?,
                    link_type: render_opt(&object.link_type)?,
                    filepath: render_opt(&object.filepath)?,
                    target: render_opt(&object.target)?,
                    status: render_opt(&object.status)?,
                    package_name: render_opt(&object.package_name)?,
                }),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upload_link_url() {
        let relative = UploadResponse {
            alt: Some("file".into()),
            url: "/uploads/abc/file.txt".into(),
            full_path: None,
            markdown: None,
        };
        assert_eq!(
            upload_link_url("https://gitlab.com", "owner/repo", &relative),
            "https://gitlab.com/owner/repo/uploads/abc/file.txt"
        );

        let with_full_path = UploadResponse {
            full_path: Some("/-/project/42/uploads/abc/file.txt".into()),
            ..relative.clone()
        };
        assert_eq!(
            upload_link_url("https://gitlab.com", "owner/repo", &with_full_path),
            "https://gitlab.com/-/project/42/uploads/abc/file.txt"
        );

        let absolute = UploadResponse {
            url: "https://cdn.example.com/file.txt".into(),
            ..relative
        };
        assert_eq!(
            upload_link_url("https://gitlab.com", "owner/repo", &absolute),
            "https://cdn.example.com/file.txt"
        );
    }

    #[test]
    fn test_is_absolute_url() {
        assert!(is_absolute_url("https://cdn.example.com/a"));
        assert!(is_absolute_url("git+ssh://host/a"));
        assert!(!is_absolute_url("/uploads/abc/a.txt"));
        assert!(!is_absolute_url("uploads/://odd"));
    }

    #[test]
    fn test_parse_released_at() {
        assert_eq!(
            parse_released_at(" 2026-01-02T03:04:05Z ").unwrap(),
            "2026-01-02T03:04:05+00:00"
        );
        assert!(matches!(
            parse_released_at("tomorrow"),
            Err(PluginError::InvalidReleasedAt { .. })
        ));
    }

    #[test]
    fn test_render_asset_specs() {
        let scope = json!({"nextRelease": {"version": "1.2.3"}});
        let specs = render_asset_specs(
            &[
                json!("dist/app-${nextRelease.version}.tgz"),
                json!({"path": "bin/*", "label": "Binary ${nextRelease.version}", "target": "generic_package"}),
            ],
            &scope,
        )
        .unwrap();
        assert_eq!(specs[0], AssetSpec::Glob("dist/app-1.2.3.tgz".into()));
        match &specs[1] {
            AssetSpec::Object(object) => {
                assert_eq!(object.label.as_deref(), Some("Binary 1.2.3"));
                assert_eq!(object.target.as_deref(), Some("generic_package"));
            }
            other => panic!("unexpected asset {other:?}"),
        }
    }
}
