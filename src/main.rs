//! IoT gateway MQTT connection manager - main entry point

use clap::{Parser, Subcommand};
use gateway_mqtt::config::GatewayConfig;
use gateway_mqtt::error::{GatewayError, GatewayResult};
use gateway_mqtt::health::HealthStatus;
use gateway_mqtt::observability::init_default_logging;
use gateway_mqtt::runtime::GatewayRuntime;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument};

/// How often the running gateway re-resolves the broker endpoint
const ENDPOINT_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_CONFIG_PATHS: &[&str] = &["gateway.toml", "config/gateway.toml"];

/// MQTT connection manager for the IoT gateway dashboard
#[derive(Parser)]
#[command(name = "gateway-mqtt")]
#[command(about = "MQTT connection manager for the IoT gateway dashboard")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and keep the broker connection alive until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
    /// Connect once, run the health probe and print the result
    Probe {
        /// Probe deadline in milliseconds (defaults to [health].mqtt_deadline_ms)
        #[arg(long)]
        deadline_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting gateway MQTT manager");

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_gateway(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Probe { deadline_ms } => run_probe(config, deadline_ms).await,
    };

    if let Err(e) = result {
        error!(error = %e.sanitized(), "Command failed");
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: Option<&Path>) -> GatewayResult<GatewayConfig> {
    if let Some(path) = config_path {
        info!(path = %path.display(), "Loading configuration");
        return Ok(GatewayConfig::load_from_file(path)?);
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            info!(path = %path.display(), "Loading configuration");
            return Ok(GatewayConfig::load_from_file(path)?);
        }
    }

    info!("No configuration file found, using defaults and environment");
    Ok(GatewayConfig::from_env()?)
}

async fn run_gateway(config: GatewayConfig) -> GatewayResult<()> {
    let runtime = GatewayRuntime::build(config)?;
    let manager = runtime.manager().clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let health_handle = runtime.health_server().map(|server| {
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let signal = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = server.start(signal).await {
                error!(error = %e, "Health server error");
            }
        })
    });

    let watcher_manager = manager.clone();
    let mut watcher_shutdown = shutdown_rx.clone();
    let endpoint_watcher = tokio::spawn(
        async move {
            let mut ticker = interval(ENDPOINT_CHECK_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = watcher_shutdown.changed() => break,
                }
                match watcher_manager.ensure_connected().await {
                    Ok(session) => debug!(client_id = %session.client_id(), "Broker connection current"),
                    Err(e) => warn!(error = %e, "Broker connection unavailable; use POST /mqtt/reconnect or restart"),
                }
            }
        }
        .instrument(gateway_mqtt::lifecycle_span!(event = "endpoint_watch")),
    );

    info!("Gateway running, waiting for shutdown signal");
    wait_for_shutdown_signal().await?;

    info!("Application shutdown initiated");
    let _ = shutdown_tx.send(true);
    let _ = endpoint_watcher.await;
    if let Some(handle) = health_handle {
        let _ = handle.await;
    }
    drop(manager);
    runtime.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> GatewayResult<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> GatewayResult<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down gracefully");
    Ok(())
}

fn handle_config_command(config: &GatewayConfig, show: bool) -> GatewayResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| GatewayError::internal_error(format!("cannot render configuration: {e}")))?;
        println!("{rendered}");
    }

    info!("Configuration validation complete");
    Ok(())
}

async fn run_probe(config: GatewayConfig, deadline_ms: Option<u64>) -> GatewayResult<()> {
    let runtime = GatewayRuntime::build(config)?;
    if let Err(e) = runtime.manager().ensure_connected().await {
        warn!(error = %e, "Connection attempt failed before probe");
    }

    let report = match deadline_ms {
        Some(ms) => runtime.probe().check_within(Duration::from_millis(ms)).await,
        None => runtime.probe().check().await,
    };
    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|e| GatewayError::internal_error(format!("cannot render probe report: {e}")))?;
    println!("{rendered}");

    let status = report.status;
    runtime.shutdown().await;

    if status == HealthStatus::Healthy {
        Ok(())
    } else {
        Err(GatewayError::internal_error(format!("MQTT health is {status}")))
    }
}
