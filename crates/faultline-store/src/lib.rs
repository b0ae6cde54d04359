//! ---
//! flt_section: "02-experiment-store"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Experiment persistence and transformation registry."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
//! Durable home for experiment specifications, runs, and configs, and
//! the sole source of truth for what is active right now.

/// Result alias used throughout the store crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for the experiment store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Specification violated a creation-time invariant.
    #[error("invalid experiment specification: {0}")]
    Validation(String),
    /// The referenced run does not exist.
    #[error("experiment run {0} not found")]
    NotFound(String),
    /// A transformation was registered twice for one config type.
    #[error("transformation already registered for config type {0}")]
    DuplicateTransformation(String),
    /// Wrapper for SQLite failures.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Wrapper for fault config (de)serialization failures.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A persisted timestamp column could not be interpreted.
    #[error("corrupt timestamp column value {0}")]
    CorruptTimestamp(i64),
}

pub mod store;
pub mod transformation;
mod views;

pub use store::ExperimentStore;
pub use transformation::Transformation;
