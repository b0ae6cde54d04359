//! ---
//! flt_section: "02-experiment-store"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Experiment data model and fault configuration types."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
//! Data model shared by the store, the resource poller, and the
//! termination monitor: experiment runs, immutable fault configs, and
//! pure status derivation.

pub mod experiment;
pub mod fault;
pub mod properties;

pub use experiment::{
    CreationOrigin, Experiment, ExperimentConfig, ExperimentRun, ExperimentSpecification,
    RunStatus,
};
pub use fault::{
    AbortFault, ClusterPairTarget, FaultConfig, FaultEnforcement, HttpFault, HttpFaultConfig,
    LatencyFault, RedisFault, RedisFaultConfig, HTTP_FAULT_TYPE, REDIS_FAULT_TYPE,
};
pub use properties::{ListViewItem, Property, RunDetails};
