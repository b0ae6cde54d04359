//! ---
//! flt_section: "03-termination-monitor"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Termination criteria and the experiment watchdog."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use faultline_common::time::utc_now;
use faultline_model::Experiment;
use serde::Deserialize;
use tracing::debug;

use crate::{MonitorError, Result};

/// Kind string for the built-in maximum-duration criterion.
pub const MAX_DURATION_KIND: &str = "max_duration";

/// Pluggable predicate deciding whether a running experiment must be
/// force-canceled ahead of its natural end time.
pub trait TerminationCriterion: Send + Sync + std::fmt::Debug {
    /// Return a human-readable termination reason, or `None` to let the
    /// experiment keep running.
    fn should_terminate(&self, experiment: &Experiment) -> Result<Option<String>>;
}

/// Terminates experiments that have been running longer than a fixed
/// maximum, regardless of their declared end time.
#[derive(Debug)]
pub struct MaxDurationCriterion {
    max_duration: Duration,
}

impl MaxDurationCriterion {
    pub fn new(max_duration: Duration) -> Self {
        Self { max_duration }
    }
}

#[derive(Debug, Deserialize)]
struct MaxDurationSettings {
    max_duration_secs: i64,
}

impl TerminationCriterion for MaxDurationCriterion {
    fn should_terminate(&self, experiment: &Experiment) -> Result<Option<String>> {
        let deadline = experiment.run.start_time + self.max_duration;
        if deadline < utc_now() {
            return Ok(Some(format!(
                "exceeded maximum duration of {}s",
                self.max_duration.num_seconds()
            )));
        }
        Ok(None)
    }
}

/// Factory building a criterion from its declarative settings.
pub type CriterionFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn TerminationCriterion>> + Send + Sync>;

/// Registry of criterion factories keyed by kind. Consulted once, at
/// monitor construction; an unknown kind is a construction error, not
/// a later runtime one.
pub struct CriterionFactoryRegistry {
    factories: HashMap<String, CriterionFactory>,
}

impl CriterionFactoryRegistry {
    /// Empty registry, for tests that bring their own criteria.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in criteria registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry
            .register(MAX_DURATION_KIND, Box::new(build_max_duration))
            .expect("builtin registration on an empty registry");
        registry
    }

    /// Register a factory under a kind; duplicates are rejected.
    pub fn register(&mut self, kind: &str, factory: CriterionFactory) -> Result<()> {
        if self.factories.contains_key(kind) {
            return Err(MonitorError::DuplicateCriterion(kind.to_owned()));
        }
        debug!(kind, "criterion factory registered");
        self.factories.insert(kind.to_owned(), factory);
        Ok(())
    }

    /// Build a criterion, failing fast on unknown kinds.
    pub fn build(
        &self,
        kind: &str,
        settings: &serde_json::Value,
    ) -> Result<Arc<dyn TerminationCriterion>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| MonitorError::UnknownCriterion(kind.to_owned()))?;
        factory(settings)
    }
}

fn build_max_duration(settings: &serde_json::Value) -> Result<Arc<dyn TerminationCriterion>> {
    let parsed: MaxDurationSettings =
        serde_json::from_value(settings.clone()).map_err(|source| MonitorError::InvalidSettings {
            kind: MAX_DURATION_KIND.to_owned(),
            source,
        })?;
    Ok(Arc::new(MaxDurationCriterion::new(Duration::seconds(
        parsed.max_duration_secs,
    ))))
}
