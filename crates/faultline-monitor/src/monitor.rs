//! ---
//! flt_section: "03-termination-monitor"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Termination criteria and the experiment watchdog."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use faultline_common::config::MonitorSettings;
use faultline_metrics::MonitorMetrics;
use faultline_model::{Experiment, RunStatus};
use faultline_store::ExperimentStore;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::criteria::{CriterionFactoryRegistry, TerminationCriterion};
use crate::Result;

/// Tuning for the two loop levels.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Interval at which each outer loop re-lists active experiments.
    pub outer_interval: Duration,
    /// Interval at which each watcher evaluates its criteria.
    pub check_interval: Duration,
}

struct WatchedType {
    config_type: String,
    criteria: Arc<Vec<Arc<dyn TerminationCriterion>>>,
}

/// The termination monitor: one outer supervisor task per watched
/// config type, each owning a map of per-experiment watcher tasks.
pub struct Monitor {
    store: Arc<ExperimentStore>,
    watched: Vec<WatchedType>,
    options: MonitorOptions,
    metrics: MonitorMetrics,
}

impl Monitor {
    /// Resolve every configured criterion through the factory registry.
    /// Construction fails fast on an unknown criterion kind.
    pub fn from_settings(
        store: Arc<ExperimentStore>,
        settings: &MonitorSettings,
        factories: &CriterionFactoryRegistry,
        metrics: MonitorMetrics,
    ) -> Result<Self> {
        let mut watched = Vec::with_capacity(settings.watched.len());
        for entry in &settings.watched {
            let mut criteria = Vec::with_capacity(entry.criteria.len());
            for criterion in &entry.criteria {
                criteria.push(factories.build(&criterion.kind, &criterion.settings)?);
            }
            watched.push(WatchedType {
                config_type: entry.config_type.clone(),
                criteria: Arc::new(criteria),
            });
        }
        Ok(Self {
            store,
            watched,
            options: MonitorOptions {
                outer_interval: settings.outer_interval,
                check_interval: settings.check_interval,
            },
            metrics,
        })
    }

    /// Construct directly from resolved criteria, for tests and custom
    /// wiring.
    pub fn new(
        store: Arc<ExperimentStore>,
        config_type: impl Into<String>,
        criteria: Vec<Arc<dyn TerminationCriterion>>,
        options: MonitorOptions,
        metrics: MonitorMetrics,
    ) -> Self {
        Self {
            store,
            watched: vec![WatchedType {
                config_type: config_type.into(),
                criteria: Arc::new(criteria),
            }],
            options,
            metrics,
        }
    }

    /// Spawn one outer supervisor task per watched config type.
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let Self {
            store,
            watched,
            options,
            metrics,
        } = self;
        watched
            .into_iter()
            .map(|watched| {
                let store = store.clone();
                let options = options.clone();
                let metrics = metrics.clone();
                let shutdown_rx = shutdown.subscribe();
                tokio::spawn(run_outer(store, watched, options, metrics, shutdown_rx))
            })
            .collect()
    }
}

/// Outer supervisor for one config type. The watcher map is owned and
/// mutated exclusively here: watchers never remove themselves, so the
/// outer loop cannot respawn a task whose teardown is still in flight.
async fn run_outer(
    store: Arc<ExperimentStore>,
    watched: WatchedType,
    options: MonitorOptions,
    metrics: MonitorMetrics,
    mut shutdown: broadcast::Receiver<()>,
) {
    let config_type = watched.config_type;
    let mut watchers: HashMap<String, watch::Sender<bool>> = HashMap::new();
    let mut ticker = tokio::time::interval(options.outer_interval);
    info!(config_type, interval = ?options.outer_interval, "termination monitor started");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!(config_type, "termination monitor shutdown");
                // Dropping the senders cancels every watcher.
                watchers.clear();
                break;
            }
            _ = ticker.tick() => {
                let active = match store.get_experiments(&config_type, RunStatus::Running) {
                    Ok(experiments) => experiments,
                    Err(err) => {
                        warn!(config_type, error = %err, "active experiment listing failed");
                        continue;
                    }
                };
                let active_ids: HashSet<&str> =
                    active.iter().map(|e| e.run.id.as_str()).collect();

                watchers.retain(|run_id, cancel| {
                    if active_ids.contains(run_id.as_str()) {
                        return true;
                    }
                    debug!(config_type, run_id, "tearing down watcher");
                    let _ = cancel.send(true);
                    false
                });

                for experiment in active {
                    if watchers.contains_key(&experiment.run.id) {
                        continue;
                    }
                    let (cancel_tx, cancel_rx) = watch::channel(false);
                    watchers.insert(experiment.run.id.clone(), cancel_tx);
                    tokio::spawn(run_watcher(
                        store.clone(),
                        experiment,
                        watched.criteria.clone(),
                        options.check_interval,
                        metrics.clone(),
                        cancel_rx,
                    ));
                }
            }
        }
    }
}

/// Per-experiment watcher: evaluate every criterion in order on each
/// tick. A termination flips a local flag and then waits for the outer
/// loop to notice the run left the active set; the watcher never tears
/// itself down.
async fn run_watcher(
    store: Arc<ExperimentStore>,
    experiment: Experiment,
    criteria: Arc<Vec<Arc<dyn TerminationCriterion>>>,
    check_interval: Duration,
    metrics: MonitorMetrics,
    mut cancel: watch::Receiver<bool>,
) {
    metrics.inc_watchers();
    let config_type = experiment.config_type();
    let run_id = experiment.run.id.clone();
    let mut terminated = false;
    let mut ticker = tokio::time::interval(check_interval);
    debug!(run_id = %run_id, config_type, "watcher started");

    loop {
        tokio::select! {
            // Both an explicit cancel and a dropped sender end the
            // watcher.
            _ = cancel.changed() => {
                break;
            }
            _ = ticker.tick() => {
                if terminated {
                    continue;
                }
                for criterion in criteria.iter() {
                    match criterion.should_terminate(&experiment) {
                        Ok(Some(reason)) => {
                            metrics.inc_evaluation(config_type, "terminate");
                            match store.cancel_experiment_run(&run_id, &reason) {
                                Ok(()) => {
                                    info!(run_id = %run_id, reason = %reason, "experiment terminated");
                                    metrics.inc_termination(config_type);
                                    terminated = true;
                                }
                                Err(err) => {
                                    // Retry on the next tick.
                                    warn!(run_id = %run_id, error = %err, "termination write failed");
                                }
                            }
                            break;
                        }
                        Ok(None) => {
                            metrics.inc_evaluation(config_type, "ok");
                        }
                        Err(err) => {
                            // Criterion errors never terminate and never
                            // stop the remaining criteria.
                            warn!(run_id = %run_id, error = %err, "criterion evaluation failed");
                            metrics.inc_evaluation(config_type, "error");
                        }
                    }
                }
            }
        }
    }
    debug!(run_id = %run_id, "watcher stopped");
    metrics.dec_watchers();
}
