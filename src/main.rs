//! thinglink - device connectivity supervisor entry point

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use thinglink::certificate::{CertificateStatus, CertificateValidator, X509Validator};
use thinglink::config::DeviceConfig;
use thinglink::observability::init_default_logging;
use thinglink::runtime::run_until;
use thinglink::supervisor::ConnectivitySupervisor;
use thinglink::transport::mqtt::RumqttTransport;
use tokio::signal;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "thinglink.toml";
const DEFAULT_LAYER_PATHS: [&str; 2] = ["config/cloud.toml", "config/device.toml"];

/// MQTT-over-TLS connectivity and liveness supervisor
#[derive(Parser)]
#[command(name = "thinglink")]
#[command(about = "Keeps a device's broker session alive and publishes liveness telemetry")]
#[command(version)]
struct Cli {
    /// Configuration file; repeat to layer files, later ones win
    #[arg(short, long, value_name = "FILE", env = "THINGLINK_CONFIG")]
    config: Vec<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and supervise until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Print the merged configuration (private key redacted)
        #[arg(long)]
        show: bool,
    },
    /// Check the configured certificates and private key
    CheckCert,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose > 0 && std::env::var("LOG_LEVEL").is_err() {
        let level = if cli.verbose > 1 { "trace" } else { "debug" };
        std::env::set_var("LOG_LEVEL", level);
    }
    init_default_logging();

    info!("Starting thinglink v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_supervisor(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::CheckCert => handle_check_cert(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(paths: &[PathBuf]) -> Result<DeviceConfig, Box<dyn std::error::Error>> {
    if !paths.is_empty() {
        for path in paths {
            info!("Loading configuration layer: {}", path.display());
        }
        return Ok(DeviceConfig::load_layered(paths)?);
    }

    let single = PathBuf::from(DEFAULT_CONFIG_PATH);
    if single.exists() {
        info!("Loading configuration from: {}", single.display());
        return Ok(DeviceConfig::load_from_file(&single)?);
    }

    // Split layout: cloud-provider layer first, device layer on top
    let layers: Vec<PathBuf> = DEFAULT_LAYER_PATHS
        .iter()
        .map(PathBuf::from)
        .filter(|path| path.exists())
        .collect();
    if layers.is_empty() {
        return Err(
            "no configuration file found; pass -c/--config or create thinglink.toml".into(),
        );
    }
    for path in &layers {
        info!("Loading configuration layer: {}", path.display());
    }
    Ok(DeviceConfig::load_layered(&layers)?)
}

async fn run_supervisor(config: DeviceConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        thing = %config.broker.thing_name,
        endpoint = %config.broker.endpoint,
        port = config.broker.port,
        "Supervisor starting"
    );

    let mut supervisor = ConnectivitySupervisor::new(Arc::new(config), RumqttTransport::new())?;
    let metrics = supervisor.metrics();

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
    };

    run_until(&mut supervisor, shutdown).await?;

    let snapshot = metrics.snapshot();
    info!(
        attempts = snapshot.connection.attempts,
        lost = snapshot.connection.lost,
        published = snapshot.publish.published,
        heartbeats = snapshot.publish.heartbeats_sent,
        "Final counters"
    );
    Ok(())
}

fn handle_config_command(config: &DeviceConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        let mut redacted = config.clone();
        redacted.identity.private_key = "<redacted>".to_string();
        println!("Current configuration:");
        println!("{}", redacted.to_toml_string()?);
    }

    info!("Configuration validation complete");
    Ok(())
}

fn handle_check_cert(config: &DeviceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let validator = X509Validator::new(config.identity.expiry_warning_days);
    let status = validator.validate(&config.identity, Utc::now());
    println!("{}", serde_json::to_string_pretty(&status)?);

    match status {
        CertificateStatus::Valid => Ok(()),
        CertificateStatus::ExpiringSoon { days } => {
            warn!(days_remaining = days, "Device certificate expiring soon");
            Ok(())
        }
        CertificateStatus::Invalid { reason } => Err(reason.into()),
    }
}
