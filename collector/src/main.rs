//! Hostpulse collector entry point

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hostpulse_collector::{
    presenter, ChannelPresenter, CollectionLoop, MetricSource, MonitorConfig, PersistenceSink,
    RateDeriver, RunSummary, Sample, SysinfoSource,
};

/// Hostpulse command line interface
#[derive(Parser)]
#[command(name = "hostpulse")]
#[command(about = "Sample CPU, memory and network usage, persist it and raise alerts")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (overrides the configuration file)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the collection loop (default)
    Run(RunArgs),

    /// Validate configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Write the effective configuration to this path
        #[arg(long)]
        write: Option<PathBuf>,
    },

    /// Take a single reading and print it
    Probe,
}

#[derive(Args)]
struct RunArgs {
    /// Sampling interval in seconds
    #[arg(short, long)]
    interval: Option<f64>,

    /// Run duration in seconds, 0 runs until stopped
    #[arg(short, long)]
    duration: Option<f64>,

    /// CPU alert threshold in percent
    #[arg(short, long)]
    threshold: Option<f64>,

    /// Window capacity in samples
    #[arg(long)]
    capacity: Option<usize>,

    /// Keep the log and database from previous runs
    #[arg(long)]
    keep_history: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut MonitorConfig) {
        if let Some(interval) = self.interval {
            config.sampling.interval_secs = interval;
        }
        if let Some(duration) = self.duration {
            config.sampling.duration_secs = duration;
        }
        if let Some(threshold) = self.threshold {
            config.alerts.cpu_threshold = threshold;
        }
        if let Some(capacity) = self.capacity {
            config.window.capacity = capacity;
        }
        if self.keep_history {
            config.storage.reset_on_start = false;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            process::exit(1);
        }
    };

    if let Some(Commands::Run(args)) = &cli.command {
        args.apply(&mut config);
    }

    if let Err(e) = initialize_logging(&cli, &config) {
        eprintln!("Failed to initialize logging: {:#}", e);
        process::exit(1);
    }

    let result = match cli.command {
        Some(Commands::Run(_)) | None => run_monitor(config).await,
        Some(Commands::Config { show, write }) => handle_config(config, show, write),
        Some(Commands::Probe) => probe(config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        process::exit(1);
    }
}

/// Initialize logging based on configuration
fn initialize_logging(cli: &Cli, config: &MonitorConfig) -> anyhow::Result<()> {
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("hostpulse_collector={}", log_level).parse()?)
        .add_directive(format!("hostpulse={}", log_level).parse()?)
        .add_directive("tokio=warn".parse()?);

    if cli.json_logs || config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init();
    }

    Ok(())
}

/// Load configuration: defaults, then file, then environment
fn load_configuration(cli: &Cli) -> anyhow::Result<MonitorConfig> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => MonitorConfig::default_config_path()
            .ok()
            .filter(|path| path.exists()),
    };

    let config = MonitorConfig::load_with_fallback(path.as_ref())
        .with_context(|| match &path {
            Some(path) => format!("loading {}", path.display()),
            None => "loading defaults and environment".to_string(),
        })?;

    Ok(config)
}

async fn run_monitor(config: MonitorConfig) -> anyhow::Result<()> {
    config.validate()?;
    info!("Starting hostpulse collector");

    let source = SysinfoSource::new(config.sampling.cpu_window())?;
    let sink = PersistenceSink::open(&config.storage)?;

    let (channel, rx) = ChannelPresenter::new();
    let console = tokio::spawn(presenter::run_console(rx));

    let collection = CollectionLoop::new(config, Box::new(source), sink, Arc::new(channel))?;

    let stop = CancellationToken::new();
    let _signals = tokio::spawn(cancel_on_signal(stop.clone()));

    let summary = collection.run(stop.clone()).await;
    // Keep listening: any signal from here on exits at once.
    stop.cancel();

    // The presenter is dropped with the loop, which closes the channel.
    console.await.context("console task failed")?;

    print_summary(&summary?);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Run {}", summary.status);
    println!("  Samples: {} ({} persisted)", summary.stats.ticks, summary.samples_persisted);
    println!("  Skipped ticks: {}", summary.stats.ticks_skipped);
    println!("  Alerts: {}", summary.stats.alerts);
    println!("  Counter anomalies: {}", summary.stats.counter_anomalies);
    println!("  Persistence failures: {}", summary.stats.persistence_failures);
    match &summary.report_path {
        Some(path) => println!("  Report: {}", path.display()),
        None => println!("  Report: not written"),
    }
}

/// Handle configuration commands
fn handle_config(config: MonitorConfig, show: bool, write: Option<PathBuf>) -> anyhow::Result<()> {
    config.validate()?;

    if show {
        println!("Effective configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    } else {
        println!("Configuration is valid");
    }

    if let Some(path) = write {
        config.save_to_file(&path)?;
        println!("Configuration written to {}", path.display());
    }

    Ok(())
}

/// One reading, with network rates over the CPU measurement window
async fn probe(config: MonitorConfig) -> anyhow::Result<()> {
    let cpu_window = config.sampling.cpu_window();

    let sample = tokio::task::spawn_blocking(move || -> anyhow::Result<Sample> {
        let mut source = SysinfoSource::new(cpu_window)?;
        let mut rates = RateDeriver::seeded(source.read_counters()?);
        let reading = source.sample_instant()?;
        let derivation = rates.advance(reading.counters());

        Ok(Sample::from_byte_rates(
            Local::now(),
            reading.cpu_percent,
            reading.memory_percent,
            derivation.sent_rate,
            derivation.recv_rate,
        ))
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&sample)?);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalAction {
    /// Stop after the current tick and write the closing report
    Cancel,
    /// The run is already stopping, leave now
    Exit,
}

fn on_shutdown_signal(stop: &CancellationToken) -> SignalAction {
    if stop.is_cancelled() {
        SignalAction::Exit
    } else {
        stop.cancel();
        SignalAction::Cancel
    }
}

/// Cancel `stop` on SIGINT or SIGTERM, exit on any signal after that
async fn cancel_on_signal(stop: CancellationToken) {
    loop {
        if let Err(e) = wait_for_shutdown().await {
            error!("Failed to install signal handlers: {}", e);
            return;
        }
        if on_shutdown_signal(&stop) == SignalAction::Exit {
            process::exit(130);
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, stopping after the current tick");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, stopping after the current tick");
        }
    }

    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, stopping after the current tick");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signal_cancels_then_exits() {
        let stop = CancellationToken::new();

        assert_eq!(on_shutdown_signal(&stop), SignalAction::Cancel);
        assert!(stop.is_cancelled());
        assert_eq!(on_shutdown_signal(&stop), SignalAction::Exit);
    }

    #[test]
    fn test_signal_after_run_finished_exits() {
        // The run cancels the token itself once it returns.
        let stop = CancellationToken::new();
        stop.cancel();

        assert_eq!(on_shutdown_signal(&stop), SignalAction::Exit);
    }
}
