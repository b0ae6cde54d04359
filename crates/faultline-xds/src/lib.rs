//! ---
//! flt_section: "01-core-functionality"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Discovery resource generation, caching, and polling."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
//! Translation of active experiments into per-cluster RTDS/ECDS
//! resource snapshots: resource types, the snapshot cache boundary,
//! content-checksum versioning, generator registries, and the
//! reconciliation poller.

/// Result alias used throughout the xds crate.
pub type Result<T> = std::result::Result<T, XdsError>;

/// Error type for resource generation and snapshot handling.
#[derive(Debug, thiserror::Error)]
pub enum XdsError {
    /// The snapshot cache has never seen this cluster.
    #[error("unknown cluster {0}")]
    UnknownCluster(String),
    /// Two generators were registered for one config type.
    #[error("duplicate generator for config type {0}")]
    DuplicateGenerator(String),
    /// A fault config carried targeting no proxy can enforce.
    #[error("unsatisfiable fault targeting: {0}")]
    Targeting(String),
    /// Wrapper for checksum/payload serialization failures.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub mod cache;
pub mod checksum;
pub mod poller;
pub mod registry;
pub mod resources;

pub use cache::{
    ClusterSnapshot, InMemorySnapshotCache, ResourceNameTracker, ResourceType, SnapshotCache,
    TtlResource, VersionedResources,
};
pub use checksum::content_version;
pub use poller::{Poller, PollerOptions};
pub use registry::{EcdsResourceGenerator, GeneratorRegistry, RtdsResourceGenerator};
pub use resources::{
    EcdsResource, ExtensionConfig, FilterAbort, FilterDelay, HttpFaultFilter, ResourcePayload,
    RtdsResource, RuntimeKeyValue, RuntimeLayer,
};
