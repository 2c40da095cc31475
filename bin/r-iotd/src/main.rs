//! ---
//! iot_section: "01-core-functionality"
//! iot_subsection: "binary"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Binary entrypoint for the R-IoTSim daemon."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prometheus::{Encoder, Registry, TextEncoder};
use r_iot_common::{init_tracing, AppConfig, LogFormat};
use r_iot_core::SimulationRuntime;
use r_iot_ingest::{IngestionPipeline, LatencyBatchProcessor};
use r_iot_msg::{InMemoryHub, SimulationMetrics};
use r_iot_sim::TemplateStore;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!(
        "R-IoTSim ",
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("VERGEN_CARGO_TARGET_TRIPLE"),
        ")"
    ),
    about = "R-IoTSim device fleet simulator",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FORMAT", help = "Override log format (json or pretty)")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run every configured entity and the ingestion pipeline")]
    Run,
    #[command(about = "Load and validate the configuration, then exit")]
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/r-iot.toml"));
    candidates.push(PathBuf::from("configs/r-iot.dev.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Validate => {
            println!("configuration {} is valid", loaded.source.display());
            for (name, entity) in &config.entities {
                let identity = entity.identity()?;
                println!(
                    "  {:<20} {:<32} module={}",
                    name,
                    identity.artifact_id(),
                    identity.is_module()
                );
            }
            Ok(())
        }
        Commands::Run => {
            init_tracing("r-iotd", &config.logging)?;
            info!(config_path = %loaded.source.display(), entities = config.entities.len(), "configuration loaded");
            run_daemon(config).await
        }
    }
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let registry = config.metrics.enabled.then(Registry::new);
    let metrics = match &registry {
        Some(registry) => Some(
            SimulationMetrics::register(registry).context("unable to register metrics")?,
        ),
        None => {
            info!("metrics disabled by configuration");
            None
        }
    };

    let templates = match &config.templates_dir {
        Some(dir) => TemplateStore::from_dir(dir)
            .with_context(|| format!("unable to load templates from {}", dir.display()))?,
        None => TemplateStore::embedded(),
    };

    let hub = InMemoryHub::new();
    let mut runtimes = Vec::with_capacity(config.entities.len());
    for (name, entity) in &config.entities {
        let identity = entity.identity()?;
        let transport = hub.attach(&identity);
        let runtime = SimulationRuntime::builder(identity, transport)
            .profile(entity.simulation.clone())
            .reboot(config.reboot.clone())
            .templates(templates.clone())
            .metrics(metrics.clone())
            .build();
        runtime
            .start()
            .await
            .with_context(|| format!("unable to start entity '{}'", name))?;
        runtimes.push(runtime);
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let processor = LatencyBatchProcessor::new(Arc::new(hub.clone()))
        .with_callback_timeout(config.ingestion.callback_timeout);
    let pipeline = tokio::spawn(
        IngestionPipeline::new(hub.clone(), processor, &config.ingestion)
            .with_shutdown(shutdown_rx)
            .run(),
    );

    info!(
        entities = runtimes.len(),
        artifacts = ?hub.artifacts(),
        "daemon running; waiting for termination signal"
    );
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    for runtime in &runtimes {
        let reports = runtime.shutdown().await;
        for report in reports {
            debug!(
                artifact_id = %runtime.artifact_id(),
                kind = %report.kind,
                sent = report.sent,
                failed = report.failed,
                exit = ?report.exit,
                "publisher report"
            );
        }
    }

    if shutdown_tx.send(()).is_err() {
        warn!("ingestion pipeline already stopped");
    }
    match pipeline.await {
        Ok(stats) => info!(
            batches = stats.batches,
            callbacks = stats.callbacks,
            failed_items = stats.failed_items,
            "ingestion pipeline drained"
        ),
        Err(err) => error!(error = %err, "ingestion pipeline task failed"),
    }

    if let Some(registry) = registry {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .context("unable to encode metrics")?;
        debug!(snapshot = %String::from_utf8_lossy(&buffer), "final metrics snapshot");
    }
    Ok(())
}
