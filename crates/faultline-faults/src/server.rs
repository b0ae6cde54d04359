//! ---
//! flt_section: "01-core-functionality"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Fault feature modules for HTTP and Redis experiments."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
//! HTTP (server) fault experimentation: aborts and added latency on a
//! cluster pair, delivered as runtime overrides or a full fault-filter
//! extension config.

use std::sync::Arc;

use faultline_model::{
    ClusterPairTarget, Experiment, FaultConfig, HttpFault, HttpFaultConfig, Property,
    HTTP_FAULT_TYPE,
};
use faultline_store::{ExperimentStore, Transformation};
use faultline_xds::{
    EcdsResource, EcdsResourceGenerator, ExtensionConfig, FilterAbort, FilterDelay,
    GeneratorRegistry, HttpFaultFilter, RtdsResource, RtdsResourceGenerator, RuntimeKeyValue,
    XdsError,
};

const ABORT_PERCENT_SUFFIX: &str = "abort.abort_percent";
const ABORT_STATUS_SUFFIX: &str = "abort.http_status";
const DELAY_PERCENT_SUFFIX: &str = "delay.fixed_delay_percent";
const DELAY_DURATION_SUFFIX: &str = "delay.fixed_duration_ms";

/// Register this module's generators against the wiring registry.
pub fn register_generators(
    registry: &mut GeneratorRegistry,
    ecds_resource_name: &str,
) -> faultline_xds::Result<()> {
    registry.register_rtds(Arc::new(HttpFaultRtdsGenerator))?;
    registry.register_ecds(Arc::new(HttpFaultEcdsGenerator {
        resource_name: ecds_resource_name.to_owned(),
    }))?;
    Ok(())
}

/// Register this module's view transformation against the store.
pub fn register_transformation(store: &mut ExperimentStore) -> faultline_store::Result<()> {
    store.register_transformation(Box::new(HttpFaultTransformation))
}

/// Runtime key prefix for the fault, dependent on which side enforces
/// it and whether a specific downstream is targeted.
fn key_prefix(targeting: &ClusterPairTarget) -> faultline_xds::Result<String> {
    match targeting.enforcing_cluster() {
        None => Err(XdsError::Targeting(format!(
            "egress fault on upstream {} has no downstream cluster",
            targeting.upstream_cluster
        ))),
        Some(_) => Ok(match targeting.enforcement {
            faultline_model::FaultEnforcement::Ingress => match &targeting.downstream_cluster {
                Some(downstream) => format!("fault.http.{downstream}"),
                None => "fault.http".to_owned(),
            },
            faultline_model::FaultEnforcement::Egress => {
                format!("fault.http.egress.{}", targeting.upstream_cluster)
            }
        }),
    }
}

fn runtime_key_values(config: &HttpFaultConfig) -> faultline_xds::Result<Vec<RuntimeKeyValue>> {
    let prefix = key_prefix(&config.targeting)?;
    Ok(match &config.fault {
        HttpFault::Abort(abort) => vec![
            RuntimeKeyValue {
                key: format!("{prefix}.{ABORT_PERCENT_SUFFIX}"),
                value: abort.percent,
            },
            RuntimeKeyValue {
                key: format!("{prefix}.{ABORT_STATUS_SUFFIX}"),
                value: abort.http_status,
            },
        ],
        HttpFault::Latency(latency) => vec![
            RuntimeKeyValue {
                key: format!("{prefix}.{DELAY_PERCENT_SUFFIX}"),
                value: latency.percent,
            },
            RuntimeKeyValue {
                key: format!("{prefix}.{DELAY_DURATION_SUFFIX}"),
                value: latency.duration_ms,
            },
        ],
    })
}

/// RTDS path: percentage + magnitude runtime keys.
pub struct HttpFaultRtdsGenerator;

impl RtdsResourceGenerator for HttpFaultRtdsGenerator {
    fn config_type(&self) -> &'static str {
        HTTP_FAULT_TYPE
    }

    fn generate_resource(&self, experiment: &Experiment) -> faultline_xds::Result<RtdsResource> {
        let FaultConfig::Http(config) = &experiment.config.fault else {
            return Ok(RtdsResource::empty());
        };
        let cluster = config
            .targeting
            .enforcing_cluster()
            .ok_or_else(|| {
                XdsError::Targeting(format!(
                    "egress fault on upstream {} has no downstream cluster",
                    config.targeting.upstream_cluster
                ))
            })?
            .to_owned();
        Ok(RtdsResource {
            cluster,
            runtime_key_values: runtime_key_values(config)?,
        })
    }
}

/// ECDS path: a full serialized HTTP fault filter.
pub struct HttpFaultEcdsGenerator {
    pub resource_name: String,
}

impl EcdsResourceGenerator for HttpFaultEcdsGenerator {
    fn config_type(&self) -> &'static str {
        HTTP_FAULT_TYPE
    }

    fn generate_resource(&self, experiment: &Experiment) -> faultline_xds::Result<EcdsResource> {
        let FaultConfig::Http(config) = &experiment.config.fault else {
            return Ok(EcdsResource::empty());
        };
        let cluster = config
            .targeting
            .enforcing_cluster()
            .ok_or_else(|| {
                XdsError::Targeting(format!(
                    "egress fault on upstream {} has no downstream cluster",
                    config.targeting.upstream_cluster
                ))
            })?
            .to_owned();

        let mut filter = HttpFaultFilter::disabled();
        filter.downstream_cluster_match = config.targeting.downstream_cluster.clone();
        match &config.fault {
            HttpFault::Abort(abort) => {
                filter.abort = Some(FilterAbort {
                    http_status: abort.http_status,
                    percentage: abort.percent,
                });
            }
            HttpFault::Latency(latency) => {
                filter.delay = Some(FilterDelay {
                    duration_ms: latency.duration_ms,
                    percentage: latency.percent,
                });
            }
        }

        Ok(EcdsResource {
            cluster,
            extension_config: Some(ExtensionConfig {
                name: self.resource_name.clone(),
                filter,
            }),
        })
    }

    fn generate_default_resource(&self, cluster: &str, resource_name: &str) -> EcdsResource {
        EcdsResource {
            cluster: cluster.to_owned(),
            extension_config: Some(ExtensionConfig::disabled(resource_name)),
        }
    }
}

/// Adds the targeting line and fault magnitude to detail/list views.
pub struct HttpFaultTransformation;

impl Transformation for HttpFaultTransformation {
    fn config_type(&self) -> &'static str {
        HTTP_FAULT_TYPE
    }

    fn transform(&self, experiment: &Experiment) -> faultline_store::Result<Vec<Property>> {
        let FaultConfig::Http(config) = &experiment.config.fault else {
            return Ok(Vec::new());
        };
        let downstream = config
            .targeting
            .downstream_cluster
            .as_deref()
            .unwrap_or("all downstreams");
        let mut properties = vec![Property::new(
            "target",
            "Target",
            format!("{} \u{27a1} {}", downstream, config.targeting.upstream_cluster),
        )];
        match &config.fault {
            HttpFault::Abort(abort) => {
                properties.push(Property::new(
                    "fault_types",
                    "Fault Types",
                    format!("Abort {}% (HTTP {})", abort.percent, abort.http_status),
                ));
            }
            HttpFault::Latency(latency) => {
                properties.push(Property::new(
                    "fault_types",
                    "Fault Types",
                    format!("Latency {}% (+{} ms)", latency.percent, latency.duration_ms),
                ));
            }
        }
        Ok(properties)
    }
}
