//! CLI entry point for omnisight-ipc
//!
//! Inspects a running producer from the consumer side, or stands in for one:
//! - `read` / `watch`: one or repeated cache reads of a category
//! - `health`: the same health check the API tier serves
//! - `send`: a correlated command with acknowledgment
//! - `simulate`: a synthetic producer writing every output the client reads
//!
//! # Usage
//!
//! ```bash
//! omnisight-ipc simulate --interval-ms 100 &
//! omnisight-ipc read detections
//! omnisight-ipc send PING
//! omnisight-ipc health
//! ```
//!
//! Readings and acks are printed to stdout as JSON; logs go to stderr.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use omnisight_ipc::config::DEFAULT_CONFIG_PATH;
use omnisight_ipc::health::HealthStatus;
use omnisight_ipc::sim::Simulator;
use omnisight_ipc::tracing_setup::{self, OutputFormat, TracingConfig};
use omnisight_ipc::{CommandType, IpcClient, IpcConfig};

#[derive(Parser)]
#[command(name = "omnisight-ipc")]
#[command(about = "Consumer-side tools for the OMNISIGHT IPC data plane", long_about = None)]
struct Cli {
    /// Configuration file (missing file means defaults plus environment)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read one category once and print the reading
    Read {
        /// Category to read
        category: Category,
    },

    /// Run a health check
    Health,

    /// Send a command and wait for its acknowledgment
    Send {
        /// Command type, e.g. PING or CONFIG_UPDATE
        command: CommandType,

        /// JSON payload
        #[arg(long, default_value = "{}")]
        data: String,

        /// Override the configured default timeout
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Read one category repeatedly, one JSON line per read
    Watch {
        /// Category to read
        category: Category,

        /// Delay between reads
        #[arg(long, default_value = "500")]
        interval_ms: u64,

        /// Stop after this many reads
        #[arg(long)]
        count: Option<u64>,
    },

    /// Act as the producer with synthetic data
    Simulate {
        /// Delay between frames
        #[arg(long, default_value = "100")]
        interval_ms: u64,

        /// Stop after this long (runs until Ctrl+C or SHUTDOWN otherwise)
        #[arg(long)]
        duration_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Category {
    Detections,
    Tracks,
    Timelines,
    Stats,
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = IpcConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let tracing_config = TracingConfig::from_ipc_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_format(cli.log_format);
    tracing_setup::init(tracing_config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Read { category } => {
            let client = IpcClient::new(config);
            println!("{}", read_category(&client, category, true)?);
            Ok(())
        }
        Commands::Health => health(IpcClient::new(config)),
        Commands::Send {
            command,
            data,
            timeout_ms,
        } => send(IpcClient::new(config), command, &data, timeout_ms).await,
        Commands::Watch {
            category,
            interval_ms,
            count,
        } => watch(IpcClient::new(config), category, interval_ms, count).await,
        Commands::Simulate {
            interval_ms,
            duration_ms,
        } => simulate(&config, interval_ms, duration_ms).await,
    }
}

fn read_category(client: &IpcClient, category: Category, pretty: bool) -> Result<String> {
    fn render<T: serde::Serialize>(value: &T, pretty: bool) -> serde_json::Result<String> {
        if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
    }

    let out = match category {
        Category::Detections => render(&client.get_detections(), pretty)?,
        Category::Tracks => render(&client.get_tracks(), pretty)?,
        Category::Timelines => render(&client.get_timelines(), pretty)?,
        Category::Stats => render(&client.get_stats(), pretty)?,
        Category::Status => render(&client.get_status(), pretty)?,
    };
    Ok(out)
}

fn health(client: IpcClient) -> Result<()> {
    let report = client.health_check();
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.status == HealthStatus::Unhealthy {
        bail!("producer is unhealthy");
    }
    Ok(())
}

async fn send(
    client: IpcClient,
    command: CommandType,
    data: &str,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let data: serde_json::Value =
        serde_json::from_str(data).context("--data must be valid JSON")?;
    let timeout = timeout_ms.map(Duration::from_millis);

    let ack = client.send_command_async(command, data, timeout).await?;
    println!("{}", serde_json::to_string_pretty(&ack)?);
    if !ack.is_success() {
        bail!(
            "{} rejected: {}",
            command,
            ack.message.as_deref().unwrap_or("no message")
        );
    }
    Ok(())
}

async fn watch(
    client: IpcClient,
    category: Category,
    interval_ms: u64,
    count: Option<u64>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    let mut reads = 0u64;
    loop {
        ticker.tick().await;
        println!("{}", read_category(&client, category, false)?);
        reads += 1;
        if count.is_some_and(|limit| reads >= limit) {
            break;
        }
    }
    tracing::debug!(stats = ?client.cache_stats(), "Watch finished");
    Ok(())
}

async fn simulate(config: &IpcConfig, interval_ms: u64, duration_ms: Option<u64>) -> Result<()> {
    let mut simulator = Simulator::from_config(config).context("starting simulator")?;
    let deadline = duration_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));

    tracing::info!(
        snapshot_dir = %config.paths.snapshot_dir.display(),
        shm = config.shm.enabled,
        interval_ms,
        "Simulated producer running"
    );

    let mut frames = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }

        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        if !simulator.step(now_ms)? {
            tracing::info!("SHUTDOWN received");
            break;
        }
        frames += 1;

        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
    }

    tracing::info!(frames, "Simulated producer stopped");
    Ok(())
}
