//! ---
//! flt_section: "03-termination-monitor"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Termination criteria and the experiment watchdog."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
//! Concurrent watchdog that evaluates pluggable criteria against every
//! active experiment and auto-cancels the ones that should no longer
//! be running.

/// Result alias used throughout the monitor crate.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Error type for monitor construction and criterion evaluation.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// A configured criterion kind has no registered factory.
    #[error("no factory registered for criterion kind {0}")]
    UnknownCriterion(String),
    /// Two factories were registered under one kind.
    #[error("criterion factory already registered for kind {0}")]
    DuplicateCriterion(String),
    /// Criterion settings did not deserialize.
    #[error("invalid settings for criterion kind {kind}: {source}")]
    InvalidSettings {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    /// A criterion failed to evaluate one experiment.
    #[error("criterion evaluation failed: {0}")]
    Evaluation(String),
}

pub mod criteria;
pub mod monitor;

pub use criteria::{
    CriterionFactoryRegistry, MaxDurationCriterion, TerminationCriterion, MAX_DURATION_KIND,
};
pub use monitor::{Monitor, MonitorOptions};
