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

use crate::experiment::RunStatus;

/// One human-readable attribute of an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Stable machine identifier, e.g. `run_identifier`.
    pub id: String,
    /// Display label, e.g. `Run Identifier`.
    pub label: String,
    pub value: String,
}

impl Property {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Detail view for a single run: run properties, config properties,
/// and any transformation output merged into one list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDetails {
    pub run_id: String,
    pub status: RunStatus,
    pub properties: Vec<Property>,
}

/// One row of the experiment list view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListViewItem {
    pub run_id: String,
    pub properties: Vec<Property>,
}
