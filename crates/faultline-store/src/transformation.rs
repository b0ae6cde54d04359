//! ---
//! flt_section: "02-experiment-store"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Experiment persistence and transformation registry."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use std::collections::HashMap;

use faultline_model::{Experiment, Property};
use tracing::debug;

use crate::{Result, StoreError};

/// Pluggable presenter adding domain-specific properties to run detail
/// and list views, keyed by the experiment config type.
pub trait Transformation: Send + Sync {
    /// Config type identifier this transformation applies to.
    fn config_type(&self) -> &'static str;

    /// Produce extra properties for one experiment.
    fn transform(&self, experiment: &Experiment) -> Result<Vec<Property>>;
}

/// Explicit transformation registry populated during wiring, before
/// the store is shared with the background actors.
#[derive(Default)]
pub struct TransformationRegistry {
    by_type: HashMap<&'static str, Box<dyn Transformation>>,
}

impl TransformationRegistry {
    /// Register exactly one transformation per config type. Duplicate
    /// registration is rejected; silent replacement would hide a
    /// wiring bug.
    pub fn register(&mut self, transformation: Box<dyn Transformation>) -> Result<()> {
        let config_type = transformation.config_type();
        if self.by_type.contains_key(config_type) {
            return Err(StoreError::DuplicateTransformation(config_type.to_owned()));
        }
        debug!(config_type, "transformation registered");
        self.by_type.insert(config_type, transformation);
        Ok(())
    }

    /// Extra properties for one experiment. Unregistered config types
    /// contribute nothing; transformation is additive, never required.
    pub fn properties_for(&self, experiment: &Experiment) -> Result<Vec<Property>> {
        match self.by_type.get(experiment.config_type()) {
            Some(transformation) => transformation.transform(experiment),
            None => Ok(Vec::new()),
        }
    }
}
