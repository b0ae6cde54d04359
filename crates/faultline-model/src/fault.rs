//! ---
//! flt_section: "02-experiment-store"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Experiment data model and fault configuration types."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

/// Type identifier for HTTP (server) fault configurations.
pub const HTTP_FAULT_TYPE: &str = "faultline.faults.v1.HttpFault";
/// Type identifier for Redis fault configurations.
pub const REDIS_FAULT_TYPE: &str = "faultline.faults.v1.RedisFault";

/// Closed set of fault payloads an experiment can carry.
///
/// Generators, transformations, and termination criteria are keyed by
/// [`FaultConfig::type_id`]; adding a variant here is a compile-checked
/// change everywhere the config is consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum FaultConfig {
    #[serde(rename = "faultline.faults.v1.HttpFault")]
    Http(HttpFaultConfig),
    #[serde(rename = "faultline.faults.v1.RedisFault")]
    Redis(RedisFaultConfig),
}

impl FaultConfig {
    /// Stable identifier used to key the generator, transformation, and
    /// criterion registries.
    pub fn type_id(&self) -> &'static str {
        match self {
            FaultConfig::Http(_) => HTTP_FAULT_TYPE,
            FaultConfig::Redis(_) => REDIS_FAULT_TYPE,
        }
    }
}

/// Whether a fault is applied at the serving (ingress) side of the
/// upstream cluster or the calling (egress) side of the downstream
/// cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultEnforcement {
    Ingress,
    Egress,
}

/// Cluster pair a fault applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPairTarget {
    /// Cluster receiving the traffic the fault disturbs.
    pub upstream_cluster: String,
    /// Originating cluster; `None` targets all downstreams of the
    /// upstream (ingress enforcement only).
    pub downstream_cluster: Option<String>,
    pub enforcement: FaultEnforcement,
}

impl ClusterPairTarget {
    /// Cluster whose proxy actually injects the fault, or `None` when
    /// the targeting is unsatisfiable (egress without a downstream).
    pub fn enforcing_cluster(&self) -> Option<&str> {
        match self.enforcement {
            FaultEnforcement::Ingress => Some(&self.upstream_cluster),
            FaultEnforcement::Egress => self.downstream_cluster.as_deref(),
        }
    }
}

/// HTTP fault injection: an abort or added latency on a cluster pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpFaultConfig {
    pub targeting: ClusterPairTarget,
    pub fault: HttpFault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpFault {
    Abort(AbortFault),
    Latency(LatencyFault),
}

/// Abort a percentage of requests with a fixed HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortFault {
    pub http_status: u32,
    pub percent: u32,
}

/// Delay a percentage of requests by a fixed duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyFault {
    pub duration_ms: u32,
    pub percent: u32,
}

/// Redis fault injection, always enforced egress at the client cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisFaultConfig {
    /// Client cluster issuing the Redis commands.
    pub downstream_cluster: String,
    /// Redis cluster the commands are addressed to.
    pub upstream_cluster: String,
    pub fault: RedisFault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedisFault {
    /// Fail a percentage of commands with a synthetic error reply.
    Error { percent: u32 },
    /// Delay a percentage of commands.
    Latency { percent: u32 },
}
