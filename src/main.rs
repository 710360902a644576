use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use plantmon::config::Config;
use plantmon::display::{Display, FileDisplay, LogDisplay};
use plantmon::link::{HostLink, InterfaceLink, Link};
use plantmon::mqtt::{announcements, MqttTransport, TopicLayout};
use plantmon::reclaim::ProcReclaimer;
use plantmon::sensors::{self, IioClimateSensor, IioLightSensor, IioSoilSensor, Sensor};
use plantmon::state::{Aggregator, FaultTracker, HealthEvaluator, NodeState};
use plantmon::{ConnectivityManager, Scheduler};

#[derive(Parser, Debug)]
#[command(name = "plantmon")]
#[command(version)]
#[command(about = "plantmon - plant sensor telemetry node reporting to MQTT", long_about = None)]
struct Args {
    /// Path to configuration file (default: ./config.toml, then ~/.config/plantmon/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// MQTT broker port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Client ID (overrides config)
    #[arg(long)]
    client_id: Option<String>,

    /// Username for MQTT auth (overrides config)
    #[arg(short, long)]
    username: Option<String>,

    /// Password for MQTT auth (overrides config)
    #[arg(long)]
    password: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match &args.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init()
        }
        None => builder.try_init(),
    };
    result.map_err(|err| anyhow::anyhow!("Failed to set tracing subscriber: {}", err))
}

fn apply_overrides(config: &mut Config, args: Args) {
    if let Some(host) = args.host {
        config.mqtt.host = host;
    }
    if let Some(port) = args.port {
        config.mqtt.port = port;
    }
    if let Some(client_id) = args.client_id {
        config.mqtt.client_id = client_id;
    }
    if let Some(username) = args.username {
        config.mqtt.username = Some(username);
    }
    if let Some(password) = args.password {
        config.mqtt.password = Some(password);
    }
}

fn build_sensors(config: &Config) -> Vec<Box<dyn Sensor>> {
    let mut drivers: Vec<Box<dyn Sensor>> = Vec::new();
    if let Some(device) = &config.sensors.climate {
        drivers.push(Box::new(IioClimateSensor::new("climate", device)));
    }
    if let Some(device) = &config.sensors.light {
        drivers.push(Box::new(IioLightSensor::new("light", device)));
    }
    if let Some(channel) = &config.sensors.soil {
        drivers.push(Box::new(IioSoilSensor::new(
            "soil_moisture",
            channel,
            config.calibration,
        )));
    }
    if drivers.is_empty() {
        warn!("No sensors configured");
    }
    sensors::verify_at_startup(drivers)
}

fn build_display(config: &Config) -> Box<dyn Display> {
    match &config.display.path {
        Some(path) => Box::new(FileDisplay::new(path)),
        None => Box::new(LogDisplay),
    }
}

async fn run<L: Link>(config: Config, link: L) -> Result<()> {
    let layout = TopicLayout::new(&config.mqtt.discovery_prefix, &config.mqtt.node_id);
    let transport = MqttTransport::new(config.mqtt.clone(), layout.clone());
    let manager = ConnectivityManager::new(
        link,
        transport,
        config.link.retry_policy(),
        announcements(&layout, &config.device),
    );

    let sensors = build_sensors(&config);
    info!("{} sensor(s) initialized", sensors.len());

    let state = NodeState::new(
        FaultTracker::new(config.sensors.failure_threshold),
        Aggregator::new(config.sensors.window_capacity),
        config.intervals.schedule(),
    );
    let mut scheduler = Scheduler::new(
        manager,
        state,
        sensors,
        build_display(&config),
        Box::new(ProcReclaimer::new(config.memory.low_memory_kb)),
        HealthEvaluator::new(config.intervals.stale_after())
            .with_link_down_label(&config.device.link_down_status),
        layout,
        config.intervals.tick(),
    );

    scheduler.startup(Instant::now()).await;
    scheduler.run().await;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let config_path = Config::find_config_path(args.config.as_deref());
    let mut config = Config::load(&config_path)?;
    apply_overrides(&mut config, args);
    config.validate().context("Invalid configuration after CLI overrides")?;

    info!("Starting plantmon");
    info!("Loaded config from {}", config_path.display());
    info!(
        "Reporting to {}:{} as {}",
        config.mqtt.host, config.mqtt.port, config.mqtt.client_id
    );

    match config.link.interface.clone() {
        Some(interface) => run(config, InterfaceLink::new(interface)).await,
        None => run(config, HostLink::new()).await,
    }
}
