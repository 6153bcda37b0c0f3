//! gpu-host-bootstrap - staged, resumable GPU host provisioning
//!
//! Re-run it as often as you like: completed stages are never repeated, and a
//! run that stops at the driver reboot picks up where it left off.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use gpu_host_bootstrap::config::{BootstrapConfig, ConfigLoader};
use gpu_host_bootstrap::context::RunContext;
use gpu_host_bootstrap::host::{CommandRunner, SystemRunner};
use gpu_host_bootstrap::modules::deploy;
use gpu_host_bootstrap::modules::service::{ServiceUnit, UNIT_DIR};
use gpu_host_bootstrap::state::{MarkerStore, StatePaths};
use gpu_host_bootstrap::{RunOptions, RunOutcome, build_orchestrator, ensure_root, run_bootstrap};

#[derive(Parser)]
#[command(name = "gpu-host-bootstrap")]
#[command(author, version, about = "Resumable GPU host bootstrap", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (drop-ins are read from bootstrap.d next to it)
    #[arg(long, global = true, env = "GPU_HOST_BOOTSTRAP_CONFIG")]
    config: Option<PathBuf>,

    /// Override the state directory holding the progress marker
    #[arg(long, global = true, env = "GPU_HOST_BOOTSTRAP_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the remaining stages (default)
    Run {
        /// Stop at a reboot boundary without rebooting
        #[arg(long)]
        no_reboot: bool,
    },
    /// Show the progress marker and last status
    Status,
    /// Evaluate every stage's check without changing anything
    Check,
    /// List the stages in order
    Stages,
    /// Clear the progress marker, or rewind it to a stage number
    Reset {
        #[arg(long)]
        to: Option<usize>,
    },
    /// Install a systemd unit that resumes the bootstrap on boot
    InstallService {
        #[arg(long, default_value = UNIT_DIR)]
        unit_dir: PathBuf,
    },
}

fn init_logging(verbosity: u8) -> anyhow::Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

async fn load_config(cli: &Cli) -> anyhow::Result<BootstrapConfig> {
    let loader = match &cli.config {
        Some(path) => {
            if !path.exists() {
                bail!("config file {} does not exist", path.display());
            }
            ConfigLoader::with_file(path)
        }
        None => ConfigLoader::new(),
    };

    let mut config = loader.load().await?;
    if let Some(dir) = &cli.state_dir {
        config.state_dir = dir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = load_config(&cli).await?;

    match &cli.command {
        Some(Commands::Run { no_reboot }) => run(&config, *no_reboot).await,
        None => run(&config, false).await,
        Some(Commands::Status) => status(&config).await,
        Some(Commands::Check) => check(&config).await,
        Some(Commands::Stages) => stages(&config),
        Some(Commands::Reset { to }) => reset(&config, *to).await,
        Some(Commands::InstallService { unit_dir }) => {
            install_service(&config, cli.config.as_deref(), unit_dir).await
        }
    }
}

async fn run(config: &BootstrapConfig, no_reboot: bool) -> anyhow::Result<()> {
    let outcome = run_bootstrap(config, RunOptions { no_reboot }).await?;
    match outcome {
        RunOutcome::Completed { applied, skipped } => {
            info!("Done: {} stages applied, {} already satisfied", applied, skipped);
        }
        RunOutcome::AlreadyComplete => info!("Nothing to do"),
        RunOutcome::RebootRequired { stage } => {
            info!("Stopped at reboot boundary after '{}'", stage);
        }
    }
    Ok(())
}

async fn status(config: &BootstrapConfig) -> anyhow::Result<()> {
    let store = MarkerStore::new(StatePaths::with_base(&config.state_dir));
    let marker = store.load().await?;
    let status = store.read_status().await?;

    match marker {
        Some(m) => println!(
            "progress: {} stages complete (last: {})",
            m.completed,
            m.stage.as_deref().unwrap_or("unknown")
        ),
        None => println!("progress: no stage completed"),
    }
    println!("status:   {}", status.status);
    if let Some(stage) = &status.stage {
        println!("stage:    {stage}");
    }
    if let Some(error) = &status.error {
        println!("error:    {error}");
    }
    Ok(())
}

async fn check(config: &BootstrapConfig) -> anyhow::Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
    let mut ctx = RunContext::detect(config).await?;
    let orchestrator = build_orchestrator(config, runner, RunOptions { no_reboot: true })?;

    for probe in orchestrator.probe(&mut ctx).await? {
        println!(
            "{}. {:<18} {:<10} {:<9}{}",
            probe.number,
            probe.id,
            if probe.satisfied { "satisfied" } else { "pending" },
            if probe.recorded { "recorded" } else { "" },
            if probe.requires_reboot { " (reboot)" } else { "" },
        );
    }

    let credential = if deploy::credential_present(&config.deploy) {
        "present"
    } else {
        "missing"
    };
    println!("credential {}: {}", config.deploy.credential_env, credential);
    Ok(())
}

fn stages(config: &BootstrapConfig) -> anyhow::Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
    let orchestrator = build_orchestrator(config, runner, RunOptions { no_reboot: true })?;
    for (index, stage) in orchestrator.stages().iter().enumerate() {
        println!(
            "{}. {:<18} {}{}",
            index + 1,
            stage.id(),
            stage.label(),
            if stage.requires_reboot() { " (reboot)" } else { "" }
        );
    }
    Ok(())
}

async fn reset(config: &BootstrapConfig, to: Option<usize>) -> anyhow::Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
    let orchestrator = build_orchestrator(config, runner, RunOptions { no_reboot: true })?;
    orchestrator.reset(to).await?;
    Ok(())
}

async fn install_service(
    config: &BootstrapConfig,
    config_path: Option<&Path>,
    unit_dir: &Path,
) -> anyhow::Result<()> {
    let runner = SystemRunner::new();
    ensure_root(&runner).await?;
    let ctx = RunContext::detect(config).await?;

    let config_file = match config_path {
        Some(path) => Some(
            tokio::fs::canonicalize(path)
                .await
                .with_context(|| format!("cannot resolve {}", path.display()))?,
        ),
        None => None,
    };

    let unit = ServiceUnit {
        exe: std::env::current_exe().context("cannot locate own executable")?,
        config: config_file,
        state_dir: config.state_dir.clone(),
        user: ctx.target_user.clone(),
    };
    unit.install(&runner, &ctx, unit_dir).await?;
    Ok(())
}
