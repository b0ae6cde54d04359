//! ---
//! flt_section: "01-core-functionality"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Discovery resource generation, caching, and polling."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use faultline_model::Experiment;
use tracing::debug;

use crate::resources::{EcdsResource, RtdsResource};
use crate::{Result, XdsError};

/// Pure translation of one experiment into a runtime key/value
/// contribution, keyed by the experiment config type.
pub trait RtdsResourceGenerator: Send + Sync {
    /// Config type identifier this generator handles.
    fn config_type(&self) -> &'static str;

    /// Produce the enforcing cluster and the runtime keys encoding the
    /// fault, or [`RtdsResource::empty`] when the experiment does not
    /// apply to this channel.
    fn generate_resource(&self, experiment: &Experiment) -> Result<RtdsResource>;
}

/// Pure translation of one experiment into a serialized extension
/// filter configuration.
pub trait EcdsResourceGenerator: Send + Sync {
    fn config_type(&self) -> &'static str;

    /// Produce the enforcing cluster and the extension config, or
    /// [`EcdsResource::empty`] when the experiment does not apply.
    fn generate_resource(&self, experiment: &Experiment) -> Result<EcdsResource>;

    /// Produce the disabled baseline for a previously-seen resource
    /// name, so removal pushes an explicit no-op payload instead of
    /// relying on absence.
    fn generate_default_resource(&self, cluster: &str, resource_name: &str) -> EcdsResource;
}

/// Explicit generator registry constructed during wiring and handed to
/// the poller by reference; registration order and duplicates are
/// testable instead of hidden in process-global state.
#[derive(Default)]
pub struct GeneratorRegistry {
    rtds: HashMap<&'static str, Arc<dyn RtdsResourceGenerator>>,
    ecds: HashMap<&'static str, Arc<dyn EcdsResourceGenerator>>,
    ecds_order: Vec<&'static str>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an RTDS generator; duplicates for a config type are
    /// rejected.
    pub fn register_rtds(&mut self, generator: Arc<dyn RtdsResourceGenerator>) -> Result<()> {
        let config_type = generator.config_type();
        if self.rtds.contains_key(config_type) {
            return Err(XdsError::DuplicateGenerator(config_type.to_owned()));
        }
        debug!(config_type, channel = "rtds", "generator registered");
        self.rtds.insert(config_type, generator);
        Ok(())
    }

    /// Register an ECDS generator; duplicates for a config type are
    /// rejected.
    pub fn register_ecds(&mut self, generator: Arc<dyn EcdsResourceGenerator>) -> Result<()> {
        let config_type = generator.config_type();
        if self.ecds.contains_key(config_type) {
            return Err(XdsError::DuplicateGenerator(config_type.to_owned()));
        }
        debug!(config_type, channel = "ecds", "generator registered");
        self.ecds.insert(config_type, generator);
        self.ecds_order.push(config_type);
        Ok(())
    }

    pub fn rtds_for(&self, config_type: &str) -> Option<&Arc<dyn RtdsResourceGenerator>> {
        self.rtds.get(config_type)
    }

    pub fn ecds_for(&self, config_type: &str) -> Option<&Arc<dyn EcdsResourceGenerator>> {
        self.ecds.get(config_type)
    }

    /// Generator used for retraction pushes: the first ECDS generator
    /// registered during wiring.
    pub fn default_ecds_generator(&self) -> Option<&Arc<dyn EcdsResourceGenerator>> {
        self.ecds_order.first().and_then(|ty| self.ecds.get(ty))
    }
}
