//! ---
//! flt_section: "01-core-functionality"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Discovery resource generation, caching, and polling."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use parking_lot::RwLock;

use crate::resources::ResourcePayload;
use crate::{Result, XdsError};

/// Discovery channels a snapshot carries resources for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Runtime,
    ExtensionConfig,
}

/// One resource plus the optional TTL that makes the discovery server
/// heartbeat it.
#[derive(Debug, Clone, PartialEq)]
pub struct TtlResource {
    pub name: String,
    pub payload: ResourcePayload,
    pub ttl: Option<Duration>,
}

/// Versioned resource set for one resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedResources {
    /// Content checksum of the payload; changes iff the payload does.
    pub version: String,
    pub items: Vec<TtlResource>,
}

/// Per-cluster snapshot held by the snapshot cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterSnapshot {
    pub runtime: Option<VersionedResources>,
    pub extension: Option<VersionedResources>,
}

impl ClusterSnapshot {
    /// Cached version string for one resource type, if present.
    pub fn version(&self, resource_type: ResourceType) -> Option<&str> {
        let slot = match resource_type {
            ResourceType::Runtime => &self.runtime,
            ResourceType::ExtensionConfig => &self.extension,
        };
        slot.as_ref().map(|versioned| versioned.version.as_str())
    }
}

/// Boundary to the discovery server's versioned, per-cluster resource
/// store. The wire protocol behind it is out of scope; the poller only
/// needs get/set plus the set of cluster keys with live connections.
pub trait SnapshotCache: Send + Sync {
    fn get_snapshot(&self, cluster: &str) -> Result<ClusterSnapshot>;
    fn set_snapshot(&self, cluster: &str, snapshot: ClusterSnapshot) -> Result<()>;
    /// All cluster keys ever seen by a live discovery connection.
    fn get_status_keys(&self) -> Vec<String>;
}

/// In-memory snapshot cache used by the daemon wiring and tests.
#[derive(Default)]
pub struct InMemorySnapshotCache {
    snapshots: RwLock<HashMap<String, ClusterSnapshot>>,
    status_keys: RwLock<BTreeSet<String>>,
}

impl InMemorySnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cluster as having a live discovery connection. Called
    /// by the discovery server when a proxy stream opens.
    pub fn register_cluster(&self, cluster: &str) {
        self.status_keys.write().insert(cluster.to_owned());
    }
}

impl SnapshotCache for InMemorySnapshotCache {
    fn get_snapshot(&self, cluster: &str) -> Result<ClusterSnapshot> {
        self.snapshots
            .read()
            .get(cluster)
            .cloned()
            .ok_or_else(|| XdsError::UnknownCluster(cluster.to_owned()))
    }

    fn set_snapshot(&self, cluster: &str, snapshot: ClusterSnapshot) -> Result<()> {
        self.snapshots.write().insert(cluster.to_owned(), snapshot);
        Ok(())
    }

    fn get_status_keys(&self) -> Vec<String> {
        self.status_keys.read().iter().cloned().collect()
    }
}

/// Per-cluster record of the ECDS resource names proxies have
/// requested, populated by the discovery server's request callback and
/// read by the poller to know which names to retract on removal.
#[derive(Default)]
pub struct ResourceNameTracker {
    names: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl ResourceNameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record names from one discovery request.
    pub fn record(&self, cluster: &str, requested: &[String]) {
        if requested.is_empty() {
            return;
        }
        let mut names = self.names.write();
        let entry = names.entry(cluster.to_owned()).or_default();
        for name in requested {
            entry.insert(name.clone());
        }
    }

    /// Every resource name this cluster has ever requested.
    pub fn names_for(&self, cluster: &str) -> Vec<String> {
        self.names
            .read()
            .get(cluster)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::RuntimeLayer;

    fn snapshot(version: &str) -> ClusterSnapshot {
        ClusterSnapshot {
            runtime: Some(VersionedResources {
                version: version.to_owned(),
                items: vec![TtlResource {
                    name: "faults".to_owned(),
                    payload: ResourcePayload::Runtime(RuntimeLayer::new("faults")),
                    ttl: None,
                }],
            }),
            extension: None,
        }
    }

    #[test]
    fn get_set_round_trip() {
        let cache = InMemorySnapshotCache::new();
        assert!(matches!(
            cache.get_snapshot("cluster-a"),
            Err(XdsError::UnknownCluster(_))
        ));

        cache.set_snapshot("cluster-a", snapshot("v1")).unwrap();
        let stored = cache.get_snapshot("cluster-a").unwrap();
        assert_eq!(stored.version(ResourceType::Runtime), Some("v1"));
        assert_eq!(stored.version(ResourceType::ExtensionConfig), None);
    }

    #[test]
    fn status_keys_track_connections_not_snapshots() {
        let cache = InMemorySnapshotCache::new();
        cache.set_snapshot("cluster-a", snapshot("v1")).unwrap();
        assert!(cache.get_status_keys().is_empty());

        cache.register_cluster("cluster-b");
        cache.register_cluster("cluster-a");
        assert_eq!(cache.get_status_keys(), vec!["cluster-a", "cluster-b"]);
    }

    #[test]
    fn tracker_accumulates_names() {
        let tracker = ResourceNameTracker::new();
        tracker.record("cluster-a", &["envoy.extension_config".to_owned()]);
        tracker.record("cluster-a", &["custom.fault_filter".to_owned()]);
        tracker.record("cluster-b", &[]);

        assert_eq!(
            tracker.names_for("cluster-a"),
            vec!["custom.fault_filter".to_owned(), "envoy.extension_config".to_owned()]
        );
        assert!(tracker.names_for("cluster-b").is_empty());
    }
}
