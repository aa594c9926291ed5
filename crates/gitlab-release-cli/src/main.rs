//! gitlab-release - run one GitLab release step from a CI job
//!
//! The `gitlab-release` command stands in for the release orchestrator: it
//! reads the plugin options and the release context from JSON files and runs
//! a single lifecycle step against GitLab.
//!
//! ## Commands
//!
//! - `verify`: Check options, token and project permissions
//! - `publish`: Upload assets and create the GitLab release
//! - `success`: Comment on the merge requests and issues the release ships
//! - `fail`: Open or update the failure issue

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use gitlab_release_core::{Context, EnvCi, GitLabPlugin, PluginConfig, PluginError};
use std::path::{Path, PathBuf};
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "gitlab-release")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Publish releases to GitLab from CI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify options, authentication and project permissions
    Verify(StepArgs),

    /// Create the GitLab release and print it as JSON
    Publish(StepArgs),

    /// Comment on released merge requests and issues
    Success(StepArgs),

    /// Report a failed release in a GitLab issue
    Fail(StepArgs),
}

#[derive(Args)]
struct StepArgs {
    /// Release context (JSON, camelCase keys)
    #[arg(long, env = "GITLAB_RELEASE_CONTEXT")]
    context: PathBuf,

    /// Plugin options (JSON, camelCase keys)
    #[arg(long, env = "GITLAB_RELEASE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    gitlab_release_core::telemetry::init_tracing(cli.json, level);

    let outcome = match cli.command {
        Commands::Verify(args) => cmd_verify(&args).await,
        Commands::Publish(args) => cmd_publish(&args).await,
        Commands::Success(args) => cmd_success(&args).await,
        Commands::Fail(args) => cmd_fail(&args).await,
    };

    if let Err(err) = &outcome {
        report(err);
    }
    outcome
}

async fn cmd_verify(args: &StepArgs) -> Result<()> {
    let (mut plugin, ctx) = load(args)?;
    plugin.verify_conditions(&ctx).await?;
    println!("✓ GitLab verification passed");
    Ok(())
}

async fn cmd_publish(args: &StepArgs) -> Result<()> {
    let (mut plugin, ctx) = load(args)?;
    let release = plugin.publish(&ctx).await?;
    println!("{}", serde_json::to_string_pretty(&release)?);
    Ok(())
}

async fn cmd_success(args: &StepArgs) -> Result<()> {
    let (mut plugin, ctx) = load(args)?;
    plugin.success(&ctx).await?;
    Ok(())
}

async fn cmd_fail(args: &StepArgs) -> Result<()> {
    let (mut plugin, ctx) = load(args)?;
    plugin.fail(&ctx).await?;
    Ok(())
}

fn load(args: &StepArgs) -> Result<(GitLabPlugin, Context)> {
    let config = match &args.config {
        Some(path) => read_json::<PluginConfig>(path)?,
        None => PluginConfig::default(),
    };
    let mut ctx: Context = read_json(&args.context)?;
    complete_context(&mut ctx, std::env::vars());
    if ctx.cwd.as_os_str().is_empty() {
        ctx.cwd = std::env::current_dir().context("Failed to get current directory")?;
    }
    debug!(cwd = %ctx.cwd.display(), ci = ?ctx.env_ci, "loaded release context");
    Ok((GitLabPlugin::new(config), ctx))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        std::fs::read_to_string(path).context(format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).context(format!("Failed to parse {:?} as JSON", path))
}

/// Fill env keys the context file left out and detect CI when it was not given.
fn complete_context(ctx: &mut Context, vars: impl IntoIterator<Item = (String, String)>) {
    for (key, value) in vars {
        ctx.env.entry(key).or_insert(value);
    }
    if ctx.env_ci == EnvCi::default() {
        ctx.env_ci = EnvCi::detect(&ctx.env);
    }
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<PluginError>() {
        Some(PluginError::Verification(aggregate)) => {
            for error in &aggregate.errors {
                eprintln!("{}: {}", error.code, error.message);
            }
        }
        Some(PluginError::Release(error)) => eprintln!("{}: {}", error.code, error.message),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_context_file_env_wins_over_process_env() {
        let mut ctx = Context {
            env: env_map(&[("GL_TOKEN", "from-file")]),
            ..Default::default()
        };
        complete_context(
            &mut ctx,
            vec![
                ("GL_TOKEN".to_string(), "from-process".to_string()),
                ("GL_URL".to_string(), "https://gitlab.example.com".to_string()),
            ],
        );
        assert_eq!(ctx.env["GL_TOKEN"], "from-file");
        assert_eq!(ctx.env["GL_URL"], "https://gitlab.example.com");
    }

    #[test]
    fn test_ci_detected_when_absent() {
        let mut ctx = Context::default();
        complete_context(&mut ctx, vec![("GITLAB_CI".to_string(), "true".to_string())]);
        assert!(ctx.env_ci.is_gitlab());
        assert!(ctx.env_ci.is_ci);
    }

    #[test]
    fn test_explicit_ci_info_kept() {
        let mut ctx = Context {
            env_ci: EnvCi {
                is_ci: true,
                service: Some("github".into()),
            },
            ..Default::default()
        };
        complete_context(&mut ctx, vec![("GITLAB_CI".to_string(), "true".to_string())]);
        assert!(!ctx.env_ci.is_gitlab());
    }

    #[test]
    fn test_read_json_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("context.json");
        std::fs::write(
            &path,
            r#"{"options": {"repositoryUrl": "https://gitlab.com/owner/repo.git"},
                "nextRelease": {"gitTag": "v1.0.0", "version": "1.0.0"}}"#,
        )
        .unwrap();

        let ctx: Context = read_json(&path).unwrap();
        assert_eq!(ctx.options.repository_url, "https://gitlab.com/owner/repo.git");
        assert_eq!(ctx.next_release.unwrap().git_tag, "v1.0.0");
    }

    #[test]
    fn test_cli_parses_step_arguments() {
        let cli = Cli::try_parse_from([
            "gitlab-release",
            "--verbose",
            "publish",
            "--context",
            "ctx.json",
            "--config",
            "release.json",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Publish(args) => {
                assert_eq!(args.context, PathBuf::from("ctx.json"));
                assert_eq!(args.config, Some(PathBuf::from("release.json")));
            }
            _ => panic!("expected publish"),
        }
    }
}
