//! ---
//! flt_section: "01-core-functionality"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Discovery resource generation, caching, and polling."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use faultline_common::config::PollerSettings;
use faultline_metrics::PollerMetrics;
use faultline_model::{Experiment, RunStatus};
use faultline_store::ExperimentStore;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::{
    ClusterSnapshot, ResourceNameTracker, ResourceType, SnapshotCache, TtlResource,
    VersionedResources,
};
use crate::checksum::content_version;
use crate::registry::GeneratorRegistry;
use crate::resources::{ExtensionConfig, ResourcePayload, RuntimeKeyValue, RuntimeLayer};
use crate::Result;

/// Tuning for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub interval: Duration,
    pub resource_ttl: Duration,
    pub runtime_layer_name: String,
    /// Clusters served full extension configs over ECDS; everything
    /// else rides RTDS.
    pub ecds_clusters: HashSet<String>,
    /// Fallback ECDS resource name for clusters with no recorded
    /// request names.
    pub ecds_resource_name: String,
}

impl PollerOptions {
    pub fn from_settings(settings: &PollerSettings) -> Self {
        Self {
            interval: settings.interval,
            resource_ttl: settings.resource_ttl,
            runtime_layer_name: settings.runtime_layer_name.clone(),
            ecds_clusters: settings.ecds_clusters.iter().cloned().collect(),
            ecds_resource_name: settings.ecds_resource_name.clone(),
        }
    }
}

/// The reconciliation loop: every tick, recompute the resource set
/// implied by the currently-running experiments and push per-cluster
/// snapshots through the checksum gate.
pub struct Poller {
    store: Arc<ExperimentStore>,
    cache: Arc<dyn SnapshotCache>,
    registry: Arc<GeneratorRegistry>,
    tracker: Arc<ResourceNameTracker>,
    options: PollerOptions,
    metrics: PollerMetrics,
}

impl Poller {
    pub fn new(
        store: Arc<ExperimentStore>,
        cache: Arc<dyn SnapshotCache>,
        registry: Arc<GeneratorRegistry>,
        tracker: Arc<ResourceNameTracker>,
        options: PollerOptions,
        metrics: PollerMetrics,
    ) -> Self {
        Self {
            store,
            cache,
            registry,
            tracker,
            options,
            metrics,
        }
    }

    /// Run until shutdown. Errors never escape a tick; both loops are
    /// autonomous and report through logs and counters only.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.options.interval);
        info!(interval = ?self.options.interval, "resource poller started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("resource poller shutdown");
                    break;
                }
                _ = ticker.tick() => {
                    self.refresh();
                }
            }
        }
    }

    /// One reconciliation tick. Public so integration tests can drive
    /// convergence without timers.
    pub fn refresh(&self) {
        // A store failure means we cannot tell what is active, so fail
        // toward removing faults rather than leaving stale ones.
        let experiments = match self.store.get_experiments("", RunStatus::Running) {
            Ok(experiments) => experiments,
            Err(err) => {
                warn!(error = %err, "experiment listing failed; treating active set as empty");
                self.metrics.inc_poll_failure("store");
                Vec::new()
            }
        };

        let buckets = self.bucket_experiments(&experiments);
        let mut clusters: BTreeSet<String> = self.cache.get_status_keys().into_iter().collect();
        clusters.extend(buckets.rtds.keys().cloned());
        clusters.extend(buckets.ecds.keys().cloned());

        let mut rtds = buckets.rtds;
        let mut ecds = buckets.ecds;
        let mut active_clusters = 0i64;
        for cluster in clusters {
            let key_values = rtds.remove(&cluster).unwrap_or_default();
            let extension = ecds.remove(&cluster);
            match self.reconcile_cluster(&cluster, key_values, extension) {
                Ok(fault_active) => {
                    if fault_active {
                        active_clusters += 1;
                    }
                }
                Err(err) => {
                    warn!(cluster = %cluster, error = %err, "cluster reconciliation failed");
                    self.metrics.inc_poll_failure("snapshot");
                }
            }
        }
        self.metrics.set_active_faults(active_clusters);
    }

    /// Route each experiment to its enforcing cluster, resolving
    /// conflicts: RTDS key sets within a cluster must be disjoint and
    /// only one extension config may be active per cluster. Precedence
    /// is listing order, which the store keeps stable by creation time.
    fn bucket_experiments(&self, experiments: &[Experiment]) -> Buckets {
        let mut buckets = Buckets::default();
        let mut claimed_keys: HashMap<String, HashSet<String>> = HashMap::new();

        for experiment in experiments {
            let run_id = experiment.run.id.as_str();
            let config_type = experiment.config_type();

            if let Some(generator) = self.registry.ecds_for(config_type) {
                match generator.generate_resource(experiment) {
                    Ok(resource) if !resource.is_empty() => {
                        if self.options.ecds_clusters.contains(&resource.cluster) {
                            let Some(config) = resource.extension_config else {
                                continue;
                            };
                            match buckets.ecds.entry(resource.cluster.clone()) {
                                Entry::Vacant(slot) => {
                                    slot.insert(config);
                                }
                                Entry::Occupied(_) => {
                                    debug!(
                                        run_id,
                                        cluster = %resource.cluster,
                                        "competing extension config ignored"
                                    );
                                    self.metrics.inc_conflict_skipped("ecds");
                                }
                            }
                            // Routed to ECDS; the RTDS path must not
                            // also apply this experiment.
                            continue;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(run_id, error = %err, "extension config generation failed");
                        self.metrics.inc_generator_error("ecds");
                        continue;
                    }
                }
            }

            let Some(generator) = self.registry.rtds_for(config_type) else {
                continue;
            };
            match generator.generate_resource(experiment) {
                Ok(resource) if !resource.is_empty() => {
                    let keys: HashSet<String> = resource
                        .runtime_key_values
                        .iter()
                        .map(|kv| kv.key.clone())
                        .collect();
                    let claimed = claimed_keys.entry(resource.cluster.clone()).or_default();
                    if keys.iter().any(|key| claimed.contains(key)) {
                        // Overlap means the whole experiment sits out
                        // this tick; partial application would mix two
                        // faults.
                        warn!(
                            run_id,
                            cluster = %resource.cluster,
                            "runtime key overlap; experiment skipped for this tick"
                        );
                        self.metrics.inc_conflict_skipped("rtds");
                        continue;
                    }
                    claimed.extend(keys);
                    buckets
                        .rtds
                        .entry(resource.cluster)
                        .or_default()
                        .extend(resource.runtime_key_values);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(run_id, error = %err, "runtime key generation failed");
                    self.metrics.inc_generator_error("rtds");
                }
            }
        }
        buckets
    }

    /// Build the new per-cluster snapshot and write it only when a
    /// resource type's checksum changed. Returns whether the cluster
    /// carries an applied fault.
    fn reconcile_cluster(
        &self,
        cluster: &str,
        key_values: Vec<RuntimeKeyValue>,
        extension: Option<ExtensionConfig>,
    ) -> Result<bool> {
        let layer =
            RuntimeLayer::from_key_values(self.options.runtime_layer_name.clone(), key_values);
        let runtime_active = !layer.is_empty();
        let ecds_active = extension.is_some();

        let extension_configs = match extension {
            Some(config) => vec![config],
            None if self.options.ecds_clusters.contains(cluster) => self.default_extensions(cluster),
            None => Vec::new(),
        };

        let runtime_version = content_version(&layer)?;
        let extension_version = content_version(&extension_configs)?;

        let previous = self.cache.get_snapshot(cluster).ok();
        let runtime_unchanged = previous
            .as_ref()
            .and_then(|snapshot| snapshot.version(ResourceType::Runtime))
            == Some(runtime_version.as_str());
        let extension_unchanged = previous
            .as_ref()
            .and_then(|snapshot| snapshot.version(ResourceType::ExtensionConfig))
            == Some(extension_version.as_str());
        if runtime_unchanged && extension_unchanged {
            return Ok(runtime_active || ecds_active);
        }

        // Only non-empty payloads get a TTL; idle clusters must not be
        // heartbeat-spammed.
        let runtime_ttl = runtime_active.then_some(self.options.resource_ttl);
        let extension_ttl = ecds_active.then_some(self.options.resource_ttl);

        let snapshot = ClusterSnapshot {
            runtime: Some(VersionedResources {
                version: runtime_version,
                items: vec![TtlResource {
                    name: layer.name.clone(),
                    payload: ResourcePayload::Runtime(layer),
                    ttl: runtime_ttl,
                }],
            }),
            extension: Some(VersionedResources {
                version: extension_version,
                items: extension_configs
                    .into_iter()
                    .map(|config| TtlResource {
                        name: config.name.clone(),
                        payload: ResourcePayload::Extension(config),
                        ttl: extension_ttl,
                    })
                    .collect(),
            }),
        };

        self.cache.set_snapshot(cluster, snapshot)?;
        self.metrics.inc_snapshot_write();
        debug!(
            cluster,
            runtime_active, ecds_active, "snapshot updated"
        );
        Ok(runtime_active || ecds_active)
    }

    /// Disabled baselines for every ECDS resource name this cluster has
    /// ever requested, so an expired experiment is retracted with an
    /// explicit no-op payload.
    fn default_extensions(&self, cluster: &str) -> Vec<ExtensionConfig> {
        let Some(generator) = self.registry.default_ecds_generator() else {
            return Vec::new();
        };
        let mut names = self.tracker.names_for(cluster);
        if names.is_empty() {
            names.push(self.options.ecds_resource_name.clone());
        }
        names
            .iter()
            .filter_map(|name| {
                generator
                    .generate_default_resource(cluster, name)
                    .extension_config
            })
            .collect()
    }
}

#[derive(Default)]
struct Buckets {
    rtds: HashMap<String, Vec<RuntimeKeyValue>>,
    ecds: HashMap<String, ExtensionConfig>,
}
