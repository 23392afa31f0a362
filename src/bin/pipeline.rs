//! Building Telemetry Pipeline
//!
//! Filters EnergyPlus output, replays it over MQTT, ingests it into the
//! store and manages the deployment description.
//!
//! ```bash
//! # Keep only the published variables
//! telemetry-pipeline extract --input eplusout.csv --output output/filtered_eplus_results.csv
//!
//! # Subscriber and publisher together, API alongside
//! INFLUXDB_TOKEN=... telemetry-pipeline run --serve
//!
//! # Render the compose file
//! telemetry-pipeline stack render --output deploy/docker-compose.yml
//! ```

use building_telemetry::{
    api::{build_router, AppState},
    config::AppConfig,
    ingest::IngestionMetrics,
    logging,
    mqtt::MqttPublisher,
    replay::ReplayPublisher,
    services::{
        shutdown_signal, HealthChecker, HealthConfig, IngestService, ReplayService, Service,
        ServiceManager,
    },
    simulation::{
        extract_specific_outputs, extract_zone_temperatures, SimulationTable,
        DEFAULT_TARGET_VARIABLES, ZONE_TEMPERATURE_KEYWORD,
    },
    stack::{StackSettings, StackSpec},
    store,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How long services get to stop after a signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "telemetry-pipeline")]
#[command(about = "Replay building simulation output over MQTT into a time-series store")]
#[command(version)]
struct Cli {
    /// Config file (overrides TELEMETRY_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter raw EnergyPlus output down to the published variables
    Extract {
        /// Raw EnergyPlus CSV
        #[arg(short, long, default_value = "eplusout.csv")]
        input: PathBuf,
        /// Filtered CSV to write
        #[arg(short, long, default_value = "output/filtered_eplus_results.csv")]
        output: PathBuf,
        /// Keep only zone air temperatures, one column per zone
        #[arg(long)]
        zones_only: bool,
    },
    /// Replay a filtered CSV to the broker, then exit
    Publish {
        /// Filtered CSV (defaults to replay.csv_path)
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Write every broker message to the store until interrupted
    Subscribe {
        /// Serve the HTTP API from this process too
        #[arg(long)]
        serve: bool,
    },
    /// Subscriber plus a one-shot replay, until interrupted
    Run {
        /// Filtered CSV (defaults to replay.csv_path)
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Serve the HTTP API from this process too
        #[arg(long)]
        serve: bool,
    },
    /// Inspect the container deployment
    Stack {
        #[command(subcommand)]
        action: StackAction,
    },
}

#[derive(Subcommand)]
enum StackAction {
    /// Print (or write) the compose document
    Render {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the container start order
    Order,
    /// Report topology problems; exits 1 on any error
    Check {
        /// Compose file to check instead of the built-in stack
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let explicit = cli
        .config
        .clone()
        .or_else(|| std::env::var(building_telemetry::config::CONFIG_ENV).ok().map(PathBuf::from));
    let config = AppConfig::read_with(explicit.as_deref(), |key| std::env::var(key).ok())?;
    logging::init(&config.logging, "telemetry_pipeline")?;

    match cli.command {
        Commands::Extract {
            input,
            output,
            zones_only,
        } => extract(&input, &output, zones_only)?,
        Commands::Publish { csv } => {
            config.validate_mqtt()?;
            config.validate_replay()?;
            let csv = csv.unwrap_or_else(|| config.replay.csv_path.clone());
            publish(&config, &csv).await?;
        }
        Commands::Subscribe { serve } => {
            config.validate()?;
            run_services(&config, None, serve).await?;
        }
        Commands::Run { csv, serve } => {
            config.validate()?;
            let csv = csv.unwrap_or_else(|| config.replay.csv_path.clone());
            run_services(&config, Some(csv), serve).await?;
        }
        Commands::Stack { action } => {
            if !stack(&config, action)? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

fn extract(input: &Path, output: &Path, zones_only: bool) -> Result<(), BoxError> {
    let table = SimulationTable::read_csv(input)?;
    let filtered = if zones_only {
        extract_zone_temperatures(&table, ZONE_TEMPERATURE_KEYWORD, true)?
    } else {
        extract_specific_outputs(&table, &DEFAULT_TARGET_VARIABLES[..])?
    };
    filtered.write_csv(output)?;
    info!(
        input = %input.display(),
        output = %output.display(),
        columns = filtered.width(),
        rows = filtered.len(),
        "Wrote filtered simulation output"
    );
    Ok(())
}

async fn publish(config: &AppConfig, csv: &Path) -> Result<(), BoxError> {
    let metrics = Arc::new(IngestionMetrics::new());
    let replay = ReplayPublisher::new(&config.replay, metrics.clone());

    let (tx, mut rx) = broadcast::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(());
    });

    let publisher = MqttPublisher::connect(&config.mqtt).await?;
    let result = replay.run(&publisher, csv, &mut rx).await;
    publisher.disconnect().await;

    metrics.log_summary();
    result?;
    Ok(())
}

/// Ingest (and optionally replay and serve) until a termination signal
async fn run_services(config: &AppConfig, csv: Option<PathBuf>, serve: bool) -> Result<(), BoxError> {
    let store = store::open(config)?;
    info!(backend = store.backend(), "Store opened");
    let metrics = Arc::new(IngestionMetrics::new());
    let manager = Arc::new(ServiceManager::new());

    let ingest = Arc::new(IngestService::new(&config.mqtt, store.clone(), metrics.clone()));
    let connected = ingest.connection_flag();
    manager.register(ingest)?;

    if let Some(csv) = csv {
        let replay = ReplayService::new(&config.mqtt, &config.replay, csv, metrics.clone()).after("ingest");
        manager.register(Arc::new(replay))?;
    }

    manager.start_all()?;

    let health = Arc::new(
        HealthChecker::new(HealthConfig::from(&config.health), store.clone())
            .with_mqtt(connected)
            .with_service_manager(manager.clone()),
    );
    let checker = health.clone();
    let shutdown = manager.subscribe();
    let health_task = tokio::spawn(async move { checker.start(shutdown).await });

    let server = if serve {
        let state = Arc::new(AppState {
            store,
            health,
            metrics: metrics.clone(),
        });
        let listener = tokio::net::TcpListener::bind(config.listen_addr()?).await?;
        info!(addr = %config.http.listen_addr, "Serving HTTP API");
        let mut stop = manager.subscribe();
        Some(tokio::spawn(async move {
            axum::serve(listener, build_router(state))
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await
        }))
    } else {
        None
    };

    shutdown_signal().await;
    manager.shutdown(SHUTDOWN_TIMEOUT).await;

    if let Err(e) = health_task.await {
        error!(error = %e, "Health checker task failed");
    }
    if let Some(server) = server {
        match server.await {
            Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
            Err(e) => error!(error = %e, "HTTP server task failed"),
            Ok(Ok(())) => {}
        }
    }

    for (name, status) in manager.status() {
        info!(service = name, status = status.label(), "Final service status");
    }
    metrics.log_summary();
    Ok(())
}

/// Returns false when the check found errors
fn stack(config: &AppConfig, action: StackAction) -> Result<bool, BoxError> {
    let settings = StackSettings {
        org: config.influx.org.clone(),
        bucket: config.influx.bucket.clone(),
        ..Default::default()
    };
    let reference = StackSpec::reference(&settings);

    match action {
        StackAction::Render { output } => {
            let yaml = reference.to_compose_yaml()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, yaml)?;
                    info!(path = %path.display(), "Wrote compose file");
                }
                None => print!("{yaml}"),
            }
        }
        StackAction::Order => {
            for name in reference.start_order()? {
                println!("{name}");
            }
        }
        StackAction::Check { file } => {
            let spec = match file {
                Some(path) => StackSpec::from_compose_yaml(&std::fs::read_to_string(&path)?)?,
                None => reference,
            };
            let issues = spec.validate();
            for issue in &issues {
                println!("{issue}");
            }
            let errors = issues.iter().filter(|i| i.is_error()).count();
            println!(
                "{} services, {} errors, {} warnings",
                spec.services.len(),
                errors,
                issues.len() - errors
            );
            return Ok(errors == 0);
        }
    }
    Ok(true)
}
