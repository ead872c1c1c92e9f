use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use mediad::adapters;
use mediad::config::AppConfig;
use mediad::context::AppContext;
use mediad::core::copy::{CopyRequest, copy_to_volume};
use mediad::core::notifications::{NotifyingSink, create_notifier};
use mediad::core::verifier::verify_on_volume;
use mediad::core::wipe::wipe_volume;
use mediad::core::{
    BatchConfig, DriveWatcher, EventSink, FanoutSink, ProcessingStatus, Reporter, TracingSink,
    Volume, VolumeState, WorkflowEvent,
};
use mediad::logging::{self, LogConfig};
use mediad::rpc::{DaemonStatus, RpcClient, RpcServer, VolumeEntry};

#[derive(Parser)]
#[command(name = "mediad")]
#[command(about = "Removable media batch wipe/copy/verify daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the watcher and RPC server until interrupted
    Daemon(ServerArgs),
    /// Show daemon and registry status
    Status,
    /// List attached removable volumes
    Volumes {
        /// Enumerate in this process instead of asking the daemon
        #[arg(long)]
        local: bool,
    },
    /// Arm or disarm batch mode on the running daemon
    Batch {
        #[command(subcommand)]
        action: BatchAction,
    },
    /// Delete everything at a mount root
    Wipe { mount: PathBuf },
    /// Copy a file onto a mounted volume
    Copy {
        source: PathBuf,
        mount: PathBuf,
        /// File name on the volume
        #[arg(long)]
        name: Option<String>,
    },
    /// Compare a copy's size against its source
    Verify { source: PathBuf, target: PathBuf },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum BatchAction {
    Enable {
        #[arg(long)]
        source_file: PathBuf,
        #[arg(long)]
        dest_filename: Option<String>,
    },
    Disable,
}

#[derive(Args, Serialize)]
struct ServerArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    poll_interval_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    rpc_bind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    simulation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    json_logs: Option<bool>,

    #[serde(skip_serializing_if = "BatchArgs::is_empty")]
    #[command(flatten)]
    batch: BatchArgs,
}

/// Serialized under the `batch` key so figment merges it into `AppConfig::batch`.
#[derive(Args, Serialize)]
struct BatchArgs {
    /// Arm batch mode at startup
    #[serde(rename = "enabled", skip_serializing_if = "Option::is_none")]
    #[arg(long = "batch", num_args = 0..=1, default_missing_value = "true")]
    enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    source_file: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    dest_filename: Option<String>,
}

impl BatchArgs {
    fn is_empty(&self) -> bool {
        self.enabled.is_none() && self.source_file.is_none() && self.dest_filename.is_none()
    }
}

/// Prints workflow events for the one-shot stage commands.
struct PrintSink;

impl EventSink for PrintSink {
    fn notify(&self, event: WorkflowEvent) {
        println!("{}", event);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Daemon(args) => AppConfig::new(Some(args))?,
        _ => AppConfig::new(None::<&ServerArgs>)?,
    };

    if matches!(cli.command, Commands::Daemon(_)) {
        logging::init(LogConfig::from(&config))?;
    }

    match cli.command {
        Commands::Daemon(_) => run_daemon(config).await.context("Daemon failed")?,
        Commands::Status => run_status(&config).await?,
        Commands::Volumes { local } => run_volumes(&config, local).await?,
        Commands::Batch { action } => run_batch(&config, action).await?,
        Commands::Wipe { mount } => {
            let reporter = Reporter::new(mount.display().to_string(), Arc::new(PrintSink));
            let report = wipe_volume(&mount, reporter).await?;
            if !report.is_clean() {
                anyhow::bail!("{} entries could not be removed", report.remaining.len());
            }
        }
        Commands::Copy {
            source,
            mount,
            name,
        } => {
            let result = copy_to_volume(&CopyRequest {
                source,
                volume_root: mount,
                dest_filename: name,
            })
            .await?;
            println!(
                "Copied {} bytes to {} in {}s",
                result.bytes_copied,
                result.target.display(),
                result.duration_secs
            );
        }
        Commands::Verify { source, target } => {
            let result = verify_on_volume(&source, &target).await?;
            println!("Verified {} bytes", result.bytes_verified);
        }
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let enumerator = adapters::get_enumerator(&config)?;

    let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
    if let Some(channel) = create_notifier(&config.notifications) {
        info!("Notifications enabled");
        sink = sink.with(Arc::new(NotifyingSink::new(channel)));
    }

    let ctx = AppContext::new(config, enumerator, Arc::new(sink));

    let watcher = Arc::new(
        DriveWatcher::new(ctx.registry.clone(), ctx.enumerator.clone(), ctx.sink.clone())
            .with_poll_interval(ctx.config.poll_interval())
            .with_stop_timeout(ctx.config.stop_timeout()),
    );

    let rpc = Arc::new(
        RpcServer::bind(ctx.clone(), ctx.config.rpc_bind)
            .await
            .with_context(|| format!("Failed to bind RPC server on {}", ctx.config.rpc_bind))?,
    );
    let rpc_task = {
        let rpc = rpc.clone();
        tokio::spawn(async move { rpc.serve().await })
    };

    let batch = ctx.registry.batch();
    info!(
        simulation = ctx.config.simulation,
        batch = batch.enabled,
        source = ?batch.source_file,
        "Daemon started"
    );
    watcher.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    watcher.stop().await;
    rpc.shutdown();
    match rpc_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "RPC server exited with error"),
        Err(e) => warn!(error = %e, "RPC server task failed"),
    }

    Ok(())
}

async fn run_status(config: &AppConfig) -> Result<()> {
    let client = RpcClient::new(config.rpc_bind);
    let daemon: DaemonStatus = client.call("daemon.status", None).await?;
    let registry: ProcessingStatus = client.call("registry.status", None).await?;

    println!("mediad {} (up {}s)", daemon.version, daemon.uptime_secs);
    println!("  rpc:        {}", daemon.rpc_bind);
    println!("  simulation: {}", daemon.simulation);
    match (&registry.batch.enabled, &registry.batch.source_file) {
        (true, Some(source)) => println!("  batch:      armed ({})", source.display()),
        _ => println!("  batch:      disabled"),
    }
    println!("  known:      {}", registry.known_volumes.join(", "));
    println!("  processing: {}", registry.processing_volumes.join(", "));
    println!("  completed:  {}", registry.completed_volumes.join(", "));
    Ok(())
}

async fn run_volumes(config: &AppConfig, local: bool) -> Result<()> {
    let rows: Vec<(Volume, Option<VolumeState>)> = if local {
        let enumerator = adapters::get_enumerator(config)?;
        tokio::task::spawn_blocking(move || enumerator.enumerate())
            .await??
            .into_iter()
            .map(|v| (v, None))
            .collect()
    } else {
        let entries: Vec<VolumeEntry> = RpcClient::new(config.rpc_bind)
            .call("volumes.list", None)
            .await?;
        entries.into_iter().map(|e| (e.volume, Some(e.state))).collect()
    };

    if rows.is_empty() {
        println!("No removable volumes attached");
        return Ok(());
    }

    for (volume, state) in rows {
        let state = state.map_or_else(|| "-".to_string(), |s| format!("{:?}", s).to_lowercase());
        println!(
            "{:<16} {:<32} {:>10.1}/{:<10.1} MB  {}",
            volume.id,
            volume.mount_path.display().to_string(),
            volume.used_bytes as f64 / 1_048_576.0,
            volume.total_bytes as f64 / 1_048_576.0,
            state
        );
    }
    Ok(())
}

async fn run_batch(config: &AppConfig, action: BatchAction) -> Result<()> {
    let params = match action {
        BatchAction::Enable {
            source_file,
            dest_filename,
        } => {
            // The daemon resolves relative paths against its own cwd
            let source_file = std::path::absolute(&source_file)
                .with_context(|| format!("Invalid path: {}", source_file.display()))?;
            json!({ "enabled": true, "source_file": source_file, "dest_filename": dest_filename })
        }
        BatchAction::Disable => json!({ "enabled": false }),
    };

    let batch: BatchConfig = RpcClient::new(config.rpc_bind)
        .call("batch.set", Some(params))
        .await?;

    match batch.source_file {
        Some(source) if batch.enabled => println!("Batch mode armed: {}", source.display()),
        _ => println!("Batch mode disabled"),
    }
    Ok(())
}
