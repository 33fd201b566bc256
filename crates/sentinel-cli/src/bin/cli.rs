use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sentinel_chain::{ClientOptions, RpcChainClient};
use sentinel_cli::{execute, OperatorCommand, RecapTracker};
use sentinel_core::{MonitorEvent, WitnessConfig};
use sentinel_monitor::WitnessMonitor;

#[derive(Parser)]
#[command(name = "witness-sentinel")]
#[command(about = "Watches a Graphene witness and rotates its signing key when it misses blocks", long_about = None)]
struct Cli {
    /// Configuration file (JSON, YAML or TOML); SENTINEL_* variables override it
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Log filter, overrides log_level from the configuration
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = WitnessConfig::load(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;

    let chain = RpcChainClient::new(ClientOptions {
        key_prefixes: config.key_prefixes.clone(),
        core_asset: config.core_asset.clone(),
        ..ClientOptions::default()
    })?;
    let monitor = WitnessMonitor::with_system_clock(config, Arc::new(chain));

    let relay = tokio::spawn(relay_events(monitor.clone(), monitor.subscribe()));
    let scheduler = monitor.start_monitoring();
    info!("Witness sentinel running, type /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if console_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match OperatorCommand::parse(&line) {
                    Ok(command) => println!("{}", execute(&monitor, command).await),
                    Err(e) => println!("{}", e),
                },
                None => {
                    info!("Operator console closed, monitoring continues until interrupted");
                    console_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    scheduler.shutdown().await;
    relay.abort();
    Ok(())
}

/// Print notifications and periodic recaps for the operator.
async fn relay_events(monitor: WitnessMonitor, mut events: broadcast::Receiver<MonitorEvent>) {
    let mut recap = RecapTracker::new(Utc::now());
    loop {
        match events.recv().await {
            Ok(MonitorEvent::Started) => {
                println!("Monitor (re)started.\n{}", monitor.settings());
            }
            Ok(MonitorEvent::Notify(message)) => println!("{}", message),
            Ok(MonitorEvent::Checked) => {
                if recap.due(Utc::now(), monitor.config().recap_time) {
                    println!("{}", monitor.current_statistics());
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!("Operator console fell behind, {} events dropped", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}
