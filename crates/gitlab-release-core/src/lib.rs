//! GitLab release steps for release automation.
//!
//! Verifies access to a GitLab project, publishes releases with their
//! assets, comments on the issues and merge requests a release ships and
//! tracks failed releases in an issue.
//!
//! Everything hangs off [`GitLabPlugin`]; the modules below are public for
//! hosts that want to drive single pieces (configuration resolution, project
//! identity, templates) on their own.

pub mod assets;
pub mod comments;
pub mod config;
pub mod context;
pub mod error;
pub mod fail;
pub mod gitlab;
pub mod identity;
pub mod options;
pub mod plugin;
pub mod publish;
pub mod retry;
pub mod success;
pub mod telemetry;
pub mod template;
pub mod verify;

pub use assets::{AssetResolver, AssetSpec, GlobAssetResolver, ResolvedAsset, UploadTarget};
pub use config::{resolve_config, PluginConfig, ResolvedConfig, Setting, TokenHeader};
pub use context::{Context, EnvCi};
pub use error::{AggregateError, ApiError, ErrorKind, PluginError, ReleaseError, Result};
pub use identity::{resolve_identity, ProjectIdentity};
pub use options::{validate_option, validate_options};
pub use plugin::{GitLabPlugin, VerificationState};
pub use publish::{PublishedRelease, RELEASE_NAME};

/// Crate version, reported in the HTTP user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
