//! kubemirror - mirror Kubernetes images into a private registry
//!
//! ## Commands
//!
//! - `push`: check kubeadm, then pull, retag and push every image (default)
//! - `list`: print each image and the reference it would be pushed as
//! - `check`: run the preflight checks only

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, Level};

use kubemirror_core::{
    init_tracing, target_version_from_env, CommandRunner, Config, DockerCli, ImageClient,
    MirrorPipeline, Overrides, SystemRunner,
};

#[derive(Parser)]
#[command(name = "kubemirror")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Mirror kubeadm and extra images into a private registry", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Path to the config file (default: ./config.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct Settings {
    /// Choose a specific Kubernetes version for the control plane
    #[arg(long, global = true)]
    kubernetes_version: Option<String>,

    /// Registry to push to (default: pixiuio)
    #[arg(long, global = true)]
    image_repository: Option<String>,

    /// Registry user
    #[arg(long, global = true, env = "KUBEMIRROR_USER")]
    user: Option<String>,

    /// Registry password
    #[arg(long, global = true, env = "KUBEMIRROR_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Images mirrored at once (0 = all at once)
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Install the matching kubeadm with apt-get before checking it
    #[arg(long, global = true)]
    install_kubeadm: bool,
}

impl From<Settings> for Overrides {
    fn from(s: Settings) -> Self {
        Overrides {
            kubernetes_version: s.kubernetes_version,
            repository: s.image_repository,
            user: s.user,
            password: s.password,
            concurrency: s.concurrency,
            install_kubeadm: s.install_kubeadm,
        }
    }
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Check kubeadm, then mirror every image (default)
    Push,
    /// Print the images and their target references without touching a registry
    List,
    /// Run the kubeadm version and container runtime checks only
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
    let client: Arc<dyn ImageClient> = Arc::new(DockerCli::new(Arc::clone(&runner)));
    let pipeline = MirrorPipeline::new(
        config,
        cli.settings.into(),
        target_version_from_env(),
        runner,
        client,
    );

    match cli.command.unwrap_or(Commands::Push) {
        Commands::Push => cmd_push(&pipeline).await,
        Commands::List => cmd_list(&pipeline).await,
        Commands::Check => cmd_check(&pipeline).await,
    }
}

async fn cmd_push(pipeline: &MirrorPipeline) -> Result<()> {
    pipeline
        .prepare()
        .await
        .context("failed to install kubeadm")?;
    pipeline.validate().await.context("validation failed")?;

    let report = pipeline.push().await.context("failed to mirror images")?;
    let total = report.results.len();
    let failed = report.failed_count();
    report
        .into_result()
        .with_context(|| format!("{failed} of {total} images failed to mirror"))?;

    info!(
        images = total,
        registry = %pipeline.target_registry(),
        "all images mirrored"
    );
    Ok(())
}

async fn cmd_list(pipeline: &MirrorPipeline) -> Result<()> {
    let plan = pipeline.plan().await.context("failed to collect images")?;
    let mut invalid = 0usize;
    for (image, target) in &plan {
        match target {
            Ok(target) => println!("{image} -> {target}"),
            Err(e) => {
                invalid += 1;
                println!("{image} -> ({e})");
            }
        }
    }
    if invalid > 0 {
        bail!("{invalid} image references cannot be mirrored");
    }
    Ok(())
}

async fn cmd_check(pipeline: &MirrorPipeline) -> Result<()> {
    pipeline
        .prepare()
        .await
        .context("failed to install kubeadm")?;
    pipeline.validate().await.context("validation failed")?;
    match pipeline.kubernetes_version() {
        Some(version) => info!(version = %version, "kubeadm and container runtime ready"),
        None => info!("container runtime ready"),
    }
    Ok(())
}
