//! ---
//! flt_section: "01-core-functionality"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Fault feature modules for HTTP and Redis experiments."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
//! Redis fault experimentation: synthetic errors and latency on the
//! client side of a Redis cluster pair. Redis faults ride RTDS only;
//! there is no extension-filter equivalent.

use std::sync::Arc;

use faultline_model::{
    Experiment, FaultConfig, Property, RedisFault, RedisFaultConfig, REDIS_FAULT_TYPE,
};
use faultline_store::{ExperimentStore, Transformation};
use faultline_xds::{GeneratorRegistry, RtdsResource, RtdsResourceGenerator, RuntimeKeyValue};

/// Register this module's generator against the wiring registry.
pub fn register_generators(registry: &mut GeneratorRegistry) -> faultline_xds::Result<()> {
    registry.register_rtds(Arc::new(RedisFaultRtdsGenerator))
}

/// Register this module's view transformation against the store.
pub fn register_transformation(store: &mut ExperimentStore) -> faultline_store::Result<()> {
    store.register_transformation(Box::new(RedisFaultTransformation))
}

fn runtime_key_values(config: &RedisFaultConfig) -> Vec<RuntimeKeyValue> {
    let upstream = &config.upstream_cluster;
    match &config.fault {
        RedisFault::Error { percent } => vec![RuntimeKeyValue {
            key: format!("fault.redis.{upstream}.error_percent"),
            value: *percent,
        }],
        RedisFault::Latency { percent } => vec![RuntimeKeyValue {
            key: format!("fault.redis.{upstream}.delay_percent"),
            value: *percent,
        }],
    }
}

/// Redis faults are enforced egress at the client (downstream) cluster.
pub struct RedisFaultRtdsGenerator;

impl RtdsResourceGenerator for RedisFaultRtdsGenerator {
    fn config_type(&self) -> &'static str {
        REDIS_FAULT_TYPE
    }

    fn generate_resource(&self, experiment: &Experiment) -> faultline_xds::Result<RtdsResource> {
        let FaultConfig::Redis(config) = &experiment.config.fault else {
            return Ok(RtdsResource::empty());
        };
        Ok(RtdsResource {
            cluster: config.downstream_cluster.clone(),
            runtime_key_values: runtime_key_values(config),
        })
    }
}

/// Adds the targeting line and fault magnitude to detail/list views.
pub struct RedisFaultTransformation;

impl Transformation for RedisFaultTransformation {
    fn config_type(&self) -> &'static str {
        REDIS_FAULT_TYPE
    }

    fn transform(&self, experiment: &Experiment) -> faultline_store::Result<Vec<Property>> {
        let FaultConfig::Redis(config) = &experiment.config.fault else {
            return Ok(Vec::new());
        };
        let fault_line = match &config.fault {
            RedisFault::Error { percent } => format!("Error {}%", percent),
            RedisFault::Latency { percent } => format!("Latency {}%", percent),
        };
        Ok(vec![
            Property::new(
                "target",
                "Target",
                format!(
                    "{} \u{27a1} {}",
                    config.downstream_cluster, config.upstream_cluster
                ),
            ),
            Property::new("fault_types", "Fault Types", fault_line),
        ])
    }
}
