use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orga_sync::config::{self, DEFAULT_CONFIG_FILE};
use orga_sync::github::list_organization;
use orga_sync::{Config, GitCli, Settings, SyncEngine, SyncSummary};

#[derive(Parser)]
#[command(name = "github-orga-sync")]
#[command(about = "Bulk pull or push repositories from a GitHub organization")]
#[command(long_about = "Simple tool to synchronize all repositories from a GitHub organization.

The intended workflow is to deal with a GitHub Classroom \"only\" organization.
New student repositories will be cloned or updated based on their pull branch.
A feedback can be pushed from a push branch afterwards.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// More verbosity, debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize new directory containing a configuration
    ///
    /// A dummy configuration will be created and opened with the $EDITOR.
    Init {
        /// Directory for the git repositories
        directory: PathBuf,
    },

    /// Pull or clone all new repositories
    Pull {
        /// Stop at the first repository that fails
        #[arg(long)]
        fail_fast: bool,
    },

    /// Push local changes to existing upstream repositories
    Push {
        /// Stop at the first repository that fails
        #[arg(long)]
        fail_fast: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Init { directory } => cmd_init(&config::expand_path(&directory)),
        Commands::Pull { fail_fast } => {
            let settings = load_settings(&cli.config)?;
            cmd_pull(&settings, fail_fast).await
        }
        Commands::Push { fail_fast } => {
            let settings = load_settings(&cli.config)?;
            cmd_push(&settings, fail_fast).await
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().without_time().with_target(false))
        .with(filter)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Load and validate configuration, before any network or git work
fn load_settings(path: &Path) -> Result<Settings> {
    let path = config::expand_path(path);
    let settings = Config::load(&path)?.settings()?;
    Ok(settings)
}

/// Working copies live in the current directory, one per repository
fn git_client(settings: &Settings) -> Result<GitCli> {
    let root = std::env::current_dir().context("Cannot determine current directory")?;
    Ok(GitCli::new(root)
        .with_timeout(settings.timeout)
        .fast_forward_only(settings.fast_forward_only))
}

/// Create a directory with an example configuration and open it in $EDITOR
fn cmd_init(directory: &Path) -> Result<()> {
    let outcome = config::init_directory(directory)?;

    if !outcome.created {
        info!(config = %outcome.config_path.display(), "Configuration does already exist");
        return Ok(());
    }

    match std::env::var("EDITOR").ok().filter(|e| !e.is_empty()) {
        None => warn!(
            config = %outcome.config_path.display(),
            "Cannot find $EDITOR, please edit the configuration manually"
        ),
        Some(editor) => {
            let status = std::process::Command::new(&editor)
                .arg(&outcome.config_path)
                .status()
                .with_context(|| format!("Cannot start editor {}", editor))?;

            if !status.success() {
                bail!(
                    "Cannot edit configuration {}: {} exited with {}",
                    outcome.config_path.display(),
                    editor,
                    status
                );
            }
        }
    }

    info!(directory = %directory.display(), "Directory is prepared");
    Ok(())
}

/// Clone or update all repositories on the pull branch
async fn cmd_pull(settings: &Settings, fail_fast: bool) -> Result<()> {
    let git = git_client(settings)?;
    let version = git.version().await?;
    info!("Using {}", version);

    let repos = list_organization(settings, &settings.pull_branch)
        .await
        .context("Fetching repositories failed")?;

    let summary = SyncEngine::new(git)
        .fail_fast(fail_fast)
        .pull_all(&repos, &settings.pull_branch)
        .await;

    report(&summary, "pull")
}

/// Push the push branch of every local working copy
async fn cmd_push(settings: &Settings, fail_fast: bool) -> Result<()> {
    let git = git_client(settings)?;
    let version = git.version().await?;
    info!("Using {}", version);

    let repos = list_organization(settings, &settings.push_branch)
        .await
        .context("Fetching repositories failed")?;

    let summary = SyncEngine::new(git)
        .fail_fast(fail_fast)
        .push_all(&repos, &settings.push_branch)
        .await;

    report(&summary, "push")
}

fn report(summary: &SyncSummary, operation: &str) -> Result<()> {
    println!("Repositories: {}", summary.total_repositories);
    println!("  Created:   {}", summary.created);
    println!("  Updated:   {}", summary.updated);
    println!("  Unchanged: {}", summary.unchanged);
    println!("  Skipped:   {}", summary.skipped);
    println!("  Failed:    {}", summary.failed);

    if summary.is_success() {
        return Ok(());
    }

    eprintln!("\nFailed repositories:");
    for (name, error) in summary.failures() {
        eprintln!("  {}: {}", name, error);
    }

    if summary.aborted {
        bail!("Stopped {} after the first failing repository", operation);
    }
    bail!("{} of {} repositories failed to {}", summary.failed, summary.total_repositories, operation)
}
