//! flowguard control-plane agent.
//!
//! Runs the adaptive-firewall control loop against the in-process simulated
//! switch fabric, with a synthetic traffic driver that alternates calm and
//! flood phases so the block/unblock edges are visible. A hardware
//! deployment supplies its own `SwitchConnector` implementation over the
//! device RPC transport and wires it up the same way `run` does here.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use flowguard::config::AppConfig;
use flowguard::controller::{resolve_watches, spawn_signal_listener, Controller, Shutdown};
use flowguard::logging::{init_logging, LogFormat};
use flowguard::metrics::ControllerMetrics;
use flowguard::schema::{sim_catalog, SchemaCatalog};
use flowguard::session::sim::{SimConnector, SimFabric};
use flowguard::types::CounterRef;

#[derive(Parser)]
#[command(name = "flowguard")]
#[command(version, about = "Adaptive firewall control plane for programmable switches", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowguard.toml")]
    config: String,

    /// Override averaging window in seconds
    #[arg(long)]
    window_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Output format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    /// Log file path (logs to both file and stdout)
    #[arg(long)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a sample config file
    GenerateConfig {
        /// Output file path
        #[arg(short, long, default_value = "flowguard.toml")]
        output: String,
    },
    /// Validate config and pipeline artifacts without running
    ValidateConfig,
    /// Run the control loop against the simulated fabric (default)
    Run {
        /// Calm-phase traffic per watched counter, packets/second
        #[arg(long, default_value_t = 2.0)]
        base_pps: f64,
        /// Flood-phase traffic per watched counter, packets/second
        #[arg(long, default_value_t = 30.0)]
        flood_pps: f64,
        /// Length of each calm phase, seconds
        #[arg(long, default_value_t = 45)]
        calm_secs: u64,
        /// Length of each flood phase, seconds
        #[arg(long, default_value_t = 45)]
        flood_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::GenerateConfig { output }) => {
            generate_sample_config(output)?;
            return Ok(());
        }
        Some(Commands::ValidateConfig) => {
            let config = load_config(&cli.config)?;
            config.validate()?;
            config.ensure_pipeline_artifacts()?;
            println!("Configuration is valid:\n{config:#?}");
            return Ok(());
        }
        Some(Commands::Run { .. }) | None => {}
    }

    let (base_pps, flood_pps, calm_secs, flood_secs) = match cli.command {
        Some(Commands::Run {
            base_pps,
            flood_pps,
            calm_secs,
            flood_secs,
        }) => (base_pps, flood_pps, calm_secs, flood_secs),
        _ => (2.0, 30.0, 45, 45),
    };

    let mut config = load_config(&cli.config)?;
    if let Some(window) = cli.window_secs {
        config.controller.window_secs = window;
    }
    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.logging.format = parse_log_format(format)?;
    }
    if let Some(ref log_file) = cli.log_file {
        config.logging.log_file = Some(log_file.clone());
    }
    config.validate()?;

    init_logging(&config.logging)?;
    print_startup_banner(&config);

    let catalog = sim_catalog();
    let fabric = build_fabric(&config, &catalog)?;
    let connector = SimConnector::new(fabric.clone());

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    let metrics = Arc::new(ControllerMetrics::new());
    {
        let metrics = metrics.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => metrics.log_summary(),
                    _ = shutdown.wait() => break,
                }
            }
        });
    }

    spawn_traffic_drivers(
        &config,
        &catalog,
        fabric.clone(),
        shutdown.clone(),
        TrafficProfile {
            base_pps,
            flood_pps,
            calm: Duration::from_secs(calm_secs),
            flood: Duration::from_secs(flood_secs),
        },
    )?;

    let controller =
        Controller::connect_all(&connector, &config, &catalog, metrics.clone(), shutdown).await?;

    controller.run().await?;

    metrics.log_summary();
    info!("shutdown complete");
    Ok(())
}

fn load_config(path: &str) -> Result<AppConfig, Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        eprintln!("Config file {path} not found, using built-in two-switch sample topology");
        return Ok(AppConfig::sample());
    }
    Ok(AppConfig::load(path)?)
}

fn parse_log_format(s: &str) -> Result<LogFormat, Box<dyn std::error::Error>> {
    match s.to_lowercase().as_str() {
        "pretty" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        "compact" => Ok(LogFormat::Compact),
        _ => Err(format!("Unknown log format '{s}'. Use: pretty, json, compact").into()),
    }
}

fn generate_sample_config(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let content = toml::to_string_pretty(&AppConfig::sample())?;
    let with_comments = format!(
        "# flowguard configuration\n\
         # One [[devices]] entry per managed switch; one [[devices.watches]]\n\
         # entry per counter/threshold/rule-set tuple on that switch.\n\n{content}"
    );
    std::fs::write(path, with_comments)?;
    println!("Sample config written to: {path}");
    Ok(())
}

/// Register every configured device in the sim fabric and preload its
/// forwarding rules, matching the startup invariant that rules are already
/// installed (block state starts at `allowed`).
fn build_fabric(config: &AppConfig, catalog: &SchemaCatalog) -> Result<SimFabric, flowguard::Error> {
    let fabric = SimFabric::new();
    for device in &config.devices {
        fabric.add_device(device.device_id);
        for watch in resolve_watches(device, catalog)? {
            fabric.preload_rules(device.device_id, watch.rules.rules());
        }
    }
    Ok(fabric)
}

#[derive(Debug, Clone, Copy)]
struct TrafficProfile {
    base_pps: f64,
    flood_pps: f64,
    calm: Duration,
    flood: Duration,
}

/// One task per watched counter pumps synthetic traffic into the fabric,
/// alternating calm and flood phases with a little jitter.
fn spawn_traffic_drivers(
    config: &AppConfig,
    catalog: &SchemaCatalog,
    fabric: SimFabric,
    shutdown: Shutdown,
    profile: TrafficProfile,
) -> Result<(), flowguard::Error> {
    for device in &config.devices {
        for watch in &device.watches {
            let counter = CounterRef::new(catalog.counter_id(&watch.counter)?, watch.index);
            let device_id = device.device_id;
            let name = device.name.clone();
            let fabric = fabric.clone();
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                let mut flooding = false;
                let mut phase_left = profile.calm;
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = shutdown.wait() => break,
                    }

                    let pps = if flooding {
                        profile.flood_pps
                    } else {
                        profile.base_pps
                    };
                    // +/- one packet of jitter so the traces look alive
                    let jitter = (rand::random::<u8>() % 3) as i64 - 1;
                    let packets = ((pps as i64) + jitter).max(0) as u64;
                    fabric.advance_counter(device_id, counter, packets);

                    phase_left = phase_left.saturating_sub(Duration::from_secs(1));
                    if phase_left.is_zero() {
                        flooding = !flooding;
                        phase_left = if flooding { profile.flood } else { profile.calm };
                        info!(
                            device = %name,
                            flooding,
                            pps = if flooding { profile.flood_pps } else { profile.base_pps },
                            "traffic driver phase change"
                        );
                    }
                }
            });
        }
    }
    if config.devices.is_empty() {
        warn!("no devices configured; traffic driver idle");
    }
    Ok(())
}

fn print_startup_banner(config: &AppConfig) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!();
    eprintln!("=========================================================");
    eprintln!("  flowguard v{version}  (simulated fabric)");
    eprintln!(
        "  devices: {}   window: {}s",
        config.devices.len(),
        config.controller.window_secs
    );
    eprintln!("=========================================================");
    eprintln!();
}
