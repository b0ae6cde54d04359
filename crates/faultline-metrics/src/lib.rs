//! ---
//! flt_section: "04-observability"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Metrics collection and export utilities."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint. Returns `text/plain` metrics even on large registries.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_str(encoder.format_type())
                    .unwrap_or_else(|_| HeaderValue::from_static("text/plain")),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "faultlined_starts_total",
            "Total number of times the Faultline daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "faultlined_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }
}

/// Metrics for the resource poller reconciliation loop.
#[derive(Clone)]
pub struct PollerMetrics {
    active_faults: IntGauge,
    poll_failures: IntCounterVec,
    generator_errors: IntCounterVec,
    conflicts_skipped: IntCounterVec,
    snapshot_writes: IntCounter,
}

impl PollerMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let active_faults = IntGauge::with_opts(Opts::new(
            "faultline_active_faults",
            "Number of clusters currently carrying an applied fault",
        ))?;
        registry.register(Box::new(active_faults.clone()))?;

        let poll_failures = IntCounterVec::new(
            Opts::new(
                "faultline_poll_failures_total",
                "Poll tick failures by stage (store listing, checksum, cache write)",
            ),
            &["stage"],
        )?;
        registry.register(Box::new(poll_failures.clone()))?;

        let generator_errors = IntCounterVec::new(
            Opts::new(
                "faultline_generator_errors_total",
                "Per-experiment resource generation failures by channel",
            ),
            &["channel"],
        )?;
        registry.register(Box::new(generator_errors.clone()))?;

        let conflicts_skipped = IntCounterVec::new(
            Opts::new(
                "faultline_conflicts_skipped_total",
                "Experiments skipped by conflict resolution, by channel",
            ),
            &["channel"],
        )?;
        registry.register(Box::new(conflicts_skipped.clone()))?;

        let snapshot_writes = IntCounter::with_opts(Opts::new(
            "faultline_snapshot_writes_total",
            "Snapshot cache writes that passed the checksum gate",
        ))?;
        registry.register(Box::new(snapshot_writes.clone()))?;

        Ok(Self {
            active_faults,
            poll_failures,
            generator_errors,
            conflicts_skipped,
            snapshot_writes,
        })
    }

    /// Build against a private registry, for tests that only care about
    /// the values.
    pub fn unregistered() -> Self {
        Self::new(new_registry()).expect("metrics registration on a fresh registry")
    }

    pub fn set_active_faults(&self, count: i64) {
        self.active_faults.set(count);
    }

    pub fn active_faults(&self) -> i64 {
        self.active_faults.get()
    }

    pub fn inc_poll_failure(&self, stage: &str) {
        self.poll_failures.with_label_values(&[stage]).inc();
    }

    pub fn inc_generator_error(&self, channel: &str) {
        self.generator_errors.with_label_values(&[channel]).inc();
    }

    pub fn inc_conflict_skipped(&self, channel: &str) {
        self.conflicts_skipped.with_label_values(&[channel]).inc();
    }

    pub fn inc_snapshot_write(&self) {
        self.snapshot_writes.inc();
    }

    pub fn snapshot_writes(&self) -> u64 {
        self.snapshot_writes.get()
    }
}

/// Metrics for the termination monitor.
#[derive(Clone)]
pub struct MonitorMetrics {
    watchers: IntGauge,
    criterion_evaluations: IntCounterVec,
    terminations: IntCounterVec,
}

impl MonitorMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let watchers = IntGauge::with_opts(Opts::new(
            "faultline_monitor_watchers",
            "Number of per-experiment watcher tasks currently running",
        ))?;
        registry.register(Box::new(watchers.clone()))?;

        let criterion_evaluations = IntCounterVec::new(
            Opts::new(
                "faultline_criterion_evaluations_total",
                "Termination criterion evaluations by config type and result",
            ),
            &["config_type", "result"],
        )?;
        registry.register(Box::new(criterion_evaluations.clone()))?;

        let terminations = IntCounterVec::new(
            Opts::new(
                "faultline_terminations_total",
                "Experiments terminated by the monitor, by config type",
            ),
            &["config_type"],
        )?;
        registry.register(Box::new(terminations.clone()))?;

        Ok(Self {
            watchers,
            criterion_evaluations,
            terminations,
        })
    }

    /// Build against a private registry, for tests.
    pub fn unregistered() -> Self {
        Self::new(new_registry()).expect("metrics registration on a fresh registry")
    }

    pub fn inc_watchers(&self) {
        self.watchers.inc();
    }

    pub fn dec_watchers(&self) {
        self.watchers.dec();
    }

    pub fn watchers(&self) -> i64 {
        self.watchers.get()
    }

    pub fn inc_evaluation(&self, config_type: &str, result: &str) {
        self.criterion_evaluations
            .with_label_values(&[config_type, result])
            .inc();
    }

    pub fn inc_termination(&self, config_type: &str) {
        self.terminations.with_label_values(&[config_type]).inc();
    }

    pub fn terminations(&self, config_type: &str) -> u64 {
        self.terminations.with_label_values(&[config_type]).get()
    }
}

pub use prometheus;
