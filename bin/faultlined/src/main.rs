//! ---
//! flt_section: "01-core-functionality"
//! flt_subsection: "binary"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Binary entrypoint for the Faultline daemon."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use faultline_common::config::AppConfig;
use faultline_common::logging::init_tracing;
use faultline_metrics::{
    new_registry, spawn_http_server, DaemonMetrics, MonitorMetrics, PollerMetrics,
};
use faultline_monitor::{CriterionFactoryRegistry, Monitor};
use faultline_store::ExperimentStore;
use faultline_xds::{
    GeneratorRegistry, InMemorySnapshotCache, Poller, PollerOptions, ResourceNameTracker,
};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Faultline daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the control plane")]
    Run,
    #[command(about = "Load and validate configuration, then exit")]
    ConfigCheck,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/faultline.prod.toml"));
    candidates.push(PathBuf::from("configs/faultline.dev.toml"));

    let load_started = Instant::now();
    let loaded_config = AppConfig::load_with_source(&candidates)?;
    let config = loaded_config.config;
    let load_duration = load_started.elapsed();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config, loaded_config.source, load_duration).await,
        Commands::ConfigCheck => {
            println!("configuration ok: {}", loaded_config.source.display());
            Ok(())
        }
    }
}

async fn run_daemon(
    config: AppConfig,
    config_path: PathBuf,
    load_duration: std::time::Duration,
) -> Result<()> {
    init_tracing("faultlined", &config.logging)?;
    info!(config = %config_path.display(), "configuration loaded");

    let metrics_registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(metrics_registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();

    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(
            metrics_registry.clone(),
            config.metrics.listen,
        )?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    // Transformations and generators are registered before the store
    // and registry are shared; duplicate registrations abort startup.
    let mut store = ExperimentStore::open(&config.storage.path)?;
    faultline_faults::server::register_transformation(&mut store)?;
    faultline_faults::redis::register_transformation(&mut store)?;
    let store = Arc::new(store);

    let mut generators = GeneratorRegistry::new();
    faultline_faults::server::register_generators(&mut generators, &config.poller.ecds_resource_name)?;
    faultline_faults::redis::register_generators(&mut generators)?;
    let generators = Arc::new(generators);

    let cache = Arc::new(InMemorySnapshotCache::new());
    let tracker = Arc::new(ResourceNameTracker::new());
    for cluster in &config.poller.ecds_clusters {
        cache.register_cluster(cluster);
    }

    let (shutdown_tx, _) = broadcast::channel(1);

    let poller = Poller::new(
        store.clone(),
        cache.clone(),
        generators,
        tracker,
        PollerOptions::from_settings(&config.poller),
        PollerMetrics::new(metrics_registry.clone())?,
    );
    let poller_shutdown = shutdown_tx.subscribe();
    let poller_task = tokio::spawn(async move { poller.run(poller_shutdown).await });

    let mut monitor_tasks = Vec::new();
    if config.monitor.enabled {
        let monitor = Monitor::from_settings(
            store.clone(),
            &config.monitor,
            &CriterionFactoryRegistry::with_builtins(),
            MonitorMetrics::new(metrics_registry.clone())?,
        )?;
        monitor_tasks = monitor.spawn(&shutdown_tx);
    } else {
        info!("termination monitor disabled by configuration");
    }

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    let _ = shutdown_tx.send(());

    if let Err(err) = poller_task.await {
        warn!(error = %err, "poller task did not shut down cleanly");
    }
    for task in monitor_tasks {
        if let Err(err) = task.await {
            warn!(error = %err, "monitor task did not shut down cleanly");
        }
    }

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    Ok(())
}
