//! ---
//! flt_section: "02-experiment-store"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Experiment persistence and transformation registry."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use faultline_common::time::{display_optional_timestamp, display_timestamp};
use faultline_model::{Experiment, Property};

/// Properties derived from the run lifecycle.
pub(crate) fn run_properties(experiment: &Experiment, now: DateTime<Utc>) -> Vec<Property> {
    let run = &experiment.run;
    let mut properties = vec![
        Property::new("run_identifier", "Run Identifier", run.id.clone()),
        Property::new("status", "Status", run.status(now).to_string()),
        Property::new(
            "start_time",
            "Start Time",
            display_timestamp(run.start_time),
        ),
        Property::new("end_time", "End Time", display_optional_timestamp(run.end_time)),
        Property::new(
            "creation_time",
            "Creation Time",
            display_timestamp(run.creation_time),
        ),
    ];
    if run.cancellation_time.is_some() {
        properties.push(Property::new(
            "cancellation_time",
            "Cancellation Time",
            display_optional_timestamp(run.cancellation_time),
        ));
    }
    if let Some(reason) = &run.termination_reason {
        properties.push(Property::new(
            "termination_reason",
            "Termination Reason",
            reason.clone(),
        ));
    }
    properties
}

/// Properties derived from the immutable config payload.
pub(crate) fn config_properties(experiment: &Experiment) -> Vec<Property> {
    vec![
        Property::new(
            "config_identifier",
            "Config Identifier",
            experiment.config.id.clone(),
        ),
        Property::new("config_type", "Config Type", experiment.config_type()),
    ]
}
