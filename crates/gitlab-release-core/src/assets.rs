//! Release asset descriptors and their expansion into concrete files.
//!
//! An asset is configured as a glob string, a list of globs (entries starting
//! with `!` exclude matches), or an object with a `path` glob or a `url`.
//! [`GlobAssetResolver`] expands globs against the working directory:
//!
//! - directories expand to the files below them, dot-files included;
//! - a glob with no match is kept verbatim so the upload step can report it;
//! - an object glob matching several files yields one asset per file, named
//!   after the file;
//! - duplicates (same path) are dropped, object descriptors winning.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetError {
    #[error("invalid glob pattern `{pattern}`: {message}")]
    Pattern { pattern: String, message: String },

    #[error("cannot read asset {path}: {message}")]
    Unreadable { path: String, message: String },
}

/// One configured asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssetSpec {
    Glob(String),
    Globs(Vec<String>),
    Object(AssetObject),
}

/// Object form of an asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssetObject {
    pub path: Option<PathSpec>,
    pub url: Option<String>,
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub link_type: Option<String>,
    pub filepath: Option<String>,
    pub target: Option<String>,
    pub status: Option<String>,
    pub package_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSpec {
    One(String),
    Many(Vec<String>),
}

impl PathSpec {
    fn patterns(&self) -> Vec<String> {
        match self {
            PathSpec::One(p) => vec![p.clone()],
            PathSpec::Many(ps) => ps.clone(),
        }
    }
}

/// Where a file asset is uploaded to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadTarget {
    #[default]
    ProjectUpload,
    GenericPackage,
}

impl UploadTarget {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("generic_package") => UploadTarget::GenericPackage,
            _ => UploadTarget::ProjectUpload,
        }
    }
}

/// An asset after glob expansion: at most one path, relative to the working
/// directory, or a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedAsset {
    pub path: Option<String>,
    pub url: Option<String>,
    pub label: Option<String>,
    pub link_type: Option<String>,
    pub filepath: Option<String>,
    pub target: UploadTarget,
    pub status: Option<String>,
    pub package_name: Option<String>,
}

impl ResolvedAsset {
    fn from_object(object: &AssetObject, path: Option<String>) -> Self {
        Self {
            path,
            url: object.url.clone(),
            label: object.label.clone(),
            link_type: object.link_type.clone(),
            filepath: object.filepath.clone(),
            target: UploadTarget::parse(object.target.as_deref()),
            status: object.status.clone(),
            package_name: object.package_name.clone(),
        }
    }

    fn from_path(path: String) -> Self {
        Self {
            path: Some(path),
            ..Self::default()
        }
    }
}

/// Expands configured assets into concrete ones.
pub trait AssetResolver {
    fn resolve(&self, cwd: &Path, assets: &[AssetSpec]) -> Result<Vec<ResolvedAsset>, AssetError>;
}

/// Default resolver backed by the `glob` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobAssetResolver;

impl AssetResolver for GlobAssetResolver {
    fn resolve(&self, cwd: &Path, assets: &[AssetSpec]) -> Result<Vec<ResolvedAsset>, AssetError> {
        let mut resolved = Vec::new();

        for asset in assets {
            match asset {
                AssetSpec::Glob(pattern) => {
                    resolved.extend(expand_bare(cwd, std::slice::from_ref(pattern))?)
                }
                AssetSpec::Globs(patterns) => resolved.extend(expand_bare(cwd, patterns)?),
                AssetSpec::Object(object) => match &object.path {
                    None => resolved.push(ResolvedAsset::from_object(object, None)),
                    Some(spec) => {
                        let patterns = spec.patterns();
                        let files = expand(cwd, &patterns)?;
                        match files.len() {
                            0 => {
                                let original = patterns.into_iter().find(|p| !p.starts_with('!'));
                                resolved.push(ResolvedAsset::from_object(object, original));
                            }
                            1 => resolved.push(ResolvedAsset::from_object(object, files.into_iter().next())),
                            _ => resolved.extend(files.into_iter().map(|file| ResolvedAsset {
                                label: None,
                                ..ResolvedAsset::from_object(object, Some(file))
                            })),
                        }
                    }
                },
            }
        }

        Ok(dedupe(cwd, resolved))
    }
}

fn expand_bare(cwd: &Path, patterns: &[String]) -> Result<Vec<ResolvedAsset>, AssetError> {
    let files = expand(cwd, patterns)?;
    if files.is_empty() {
        return Ok(patterns
            .iter()
            .filter(|p| !p.starts_with('!'))
            .cloned()
            .map(ResolvedAsset::from_path)
            .collect());
    }
    Ok(files.into_iter().map(ResolvedAsset::from_path).collect())
}

/// Files matched by `patterns` (with `!` negations), relative to `cwd`, sorted.
fn expand(cwd: &Path, patterns: &[String]) -> Result<Vec<String>, AssetError> {
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let mut excluded = Vec::new();
    let mut included = Vec::new();
    for pattern in patterns {
        match pattern.strip_prefix('!') {
            Some(negated) => excluded.push(compile(negated)?),
            None => included.push(pattern.as_str()),
        }
    }

    let mut files = Vec::new();
    for pattern in included {
        for entry in glob_in(cwd, pattern, options)? {
            if entry.is_dir() {
                let below = format!("{}/**/*", Pattern::escape(&relative(cwd, &entry)));
                files.extend(glob_in(cwd, &below, options)?.into_iter().filter(|p| p.is_file()));
            } else {
                files.push(entry);
            }
        }
    }

    let mut relative_files: Vec<String> = files
        .iter()
        .map(|file| relative(cwd, file))
        .filter(|file| !excluded.iter().any(|ex| ex.matches_with(file, options)))
        .collect();
    relative_files.sort();
    relative_files.dedup();
    debug!(?patterns, matched = relative_files.len(), "expanded asset globs");
    Ok(relative_files)
}

fn compile(pattern: &str) -> Result<Pattern, AssetError> {
    Pattern::new(pattern).map_err(|err| AssetError::Pattern {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })
}

fn glob_in(cwd: &Path, pattern: &str, options: MatchOptions) -> Result<Vec<PathBuf>, AssetError> {
    let full = if Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        format!("{}/{}", Pattern::escape(&cwd.to_string_lossy()), pattern)
    };
    let paths = glob::glob_with(&full, options).map_err(|err| AssetError::Pattern {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })?;
    Ok(paths.filter_map(|entry| entry.ok()).collect())
}

fn relative(cwd: &Path, path: &Path) -> String {
    path.strip_prefix(cwd)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Keep the first asset per path, objects before bare paths; URL-only assets
/// are always kept.
fn dedupe(cwd: &Path, assets: Vec<ResolvedAsset>) -> Vec<ResolvedAsset> {
    let is_bare = |asset: &ResolvedAsset| *asset == ResolvedAsset::from_path(asset.path.clone().unwrap_or_default());
    let (bare, objects): (Vec<_>, Vec<_>) = assets.into_iter().partition(is_bare);

    let mut seen = HashSet::new();
    objects
        .into_iter()
        .chain(bare)
        .filter(|asset| match &asset.path {
            Some(path) => seen.insert(cwd.join(path)),
            None => true,
        })
        .collect()
}
