//! Lifecycle entry points driven by the release orchestrator.
//!
//! The host calls [`GitLabPlugin::verify_conditions`], then `publish`, then
//! `success` or `fail`, with the same [`Context`]. Whether verification
//! already passed lives in a [`VerificationState`] owned by the plugin value,
//! so a host that skips the verify call still gets it run once before any
//! other step.

use tracing::debug;

use crate::assets::{AssetResolver, GlobAssetResolver};
use crate::config::PluginConfig;
use crate::context::Context;
use crate::error::Result;
use crate::publish::PublishedRelease;
use crate::{fail, publish, success, verify};

/// Whether the verify step already passed for this plugin instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationState {
    verified: bool,
}

impl VerificationState {
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Run verification unless it already passed. A failure leaves the state
    /// unverified so the next step tries again.
    pub async fn ensure_verified(&mut self, config: &PluginConfig, ctx: &Context) -> Result<()> {
        if self.verified {
            debug!("verification already passed, skipping");
            return Ok(());
        }
        verify::verify(config, ctx).await?;
        self.verified = true;
        Ok(())
    }
}

/// The GitLab release steps bound to one set of options.
pub struct GitLabPlugin {
    config: PluginConfig,
    state: VerificationState,
    resolver: Box<dyn AssetResolver + Send + Sync>,
}

impl GitLabPlugin {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            state: VerificationState::default(),
            resolver: Box::new(GlobAssetResolver),
        }
    }

    /// Use a custom asset resolver instead of filesystem globbing.
    pub fn with_resolver(mut self, resolver: impl AssetResolver + Send + Sync + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn state(&self) -> VerificationState {
        self.state
    }

    /// Verify options, repository, token and permissions.
    pub async fn verify_conditions(&mut self, ctx: &Context) -> Result<()> {
        verify::verify(&self.config, ctx).await?;
        self.state.verified = true;
        Ok(())
    }

    /// Create the GitLab release for `ctx.nextRelease`.
    pub async fn publish(&mut self, ctx: &Context) -> Result<PublishedRelease> {
        self.state.ensure_verified(&self.config, ctx).await?;
        publish::publish(&self.config, ctx, self.resolver.as_ref()).await
    }

    /// Comment on the issues and merge requests shipped by the release.
    pub async fn success(&mut self, ctx: &Context) -> Result<()> {
        self.state.ensure_verified(&self.config, ctx).await?;
        success::success(&self.config, ctx).await
    }

    /// Open or update the failure issue.
    pub async fn fail(&mut self, ctx: &Context) -> Result<()> {
        self.state.ensure_verified(&self.config, ctx).await?;
        fail::fail(&self.config, ctx).await
    }
}
