//! ---
//! flt_section: "01-core-functionality"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Discovery resource generation, caching, and polling."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One RTDS scalar override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeKeyValue {
    pub key: String,
    pub value: u32,
}

/// Contribution of one experiment to a cluster's runtime layer. An
/// empty key/value list is the sentinel for "nothing to contribute".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtdsResource {
    pub cluster: String,
    pub runtime_key_values: Vec<RuntimeKeyValue>,
}

impl RtdsResource {
    /// The "not applicable" sentinel.
    pub fn empty() -> Self {
        Self {
            cluster: String::new(),
            runtime_key_values: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.runtime_key_values.is_empty()
    }
}

/// Contribution of one experiment to a cluster's extension config. An
/// absent extension config is the sentinel for "nothing to contribute".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdsResource {
    pub cluster: String,
    pub extension_config: Option<ExtensionConfig>,
}

impl EcdsResource {
    /// The "not applicable" sentinel.
    pub fn empty() -> Self {
        Self {
            cluster: String::new(),
            extension_config: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.extension_config.is_none()
    }
}

/// Named runtime layer delivered over RTDS. Keys are held in a
/// `BTreeMap` so the serialized form (and therefore the content
/// checksum) is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeLayer {
    pub name: String,
    pub layer: BTreeMap<String, u32>,
}

impl RuntimeLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layer: BTreeMap::new(),
        }
    }

    pub fn from_key_values(name: impl Into<String>, key_values: Vec<RuntimeKeyValue>) -> Self {
        let mut layer = Self::new(name);
        for kv in key_values {
            layer.layer.insert(kv.key, kv.value);
        }
        layer
    }

    pub fn is_empty(&self) -> bool {
        self.layer.is_empty()
    }
}

/// Serialized extension-filter configuration delivered over ECDS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionConfig {
    /// Resource name the proxy requested this config under.
    pub name: String,
    pub filter: HttpFaultFilter,
}

impl ExtensionConfig {
    /// The "disabled" baseline pushed on removal so proxies fall back
    /// gracefully instead of relying on absence.
    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: HttpFaultFilter::disabled(),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.filter.abort.is_none() && self.filter.delay.is_none()
    }
}

/// HTTP fault filter payload: an abort section, a delay section, or
/// neither (the disabled baseline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpFaultFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort: Option<FilterAbort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<FilterDelay>,
    /// Header predicate restricting the fault to traffic from one
    /// downstream cluster; absent means all downstreams.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downstream_cluster_match: Option<String>,
}

impl HttpFaultFilter {
    pub fn disabled() -> Self {
        Self {
            abort: None,
            delay: None,
            downstream_cluster_match: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterAbort {
    pub http_status: u32,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDelay {
    pub duration_ms: u32,
    pub percentage: u32,
}

/// Payload stored per resource in a cluster snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourcePayload {
    Runtime(RuntimeLayer),
    Extension(ExtensionConfig),
}
