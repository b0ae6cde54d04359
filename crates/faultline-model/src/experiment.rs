//! ---
//! flt_section: "02-experiment-store"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Experiment data model and fault configuration types."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fault::FaultConfig;

/// Caller-provided input to experiment creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSpecification {
    /// Optional caller-supplied run id; generated when absent. Callers
    /// that retry creation supply their own id and go through the
    /// create-or-get path.
    pub run_id: Option<String>,
    /// Defaults to the creation instant when absent.
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub config: FaultConfig,
}

impl ExperimentSpecification {
    /// Resolve the run id, generating one when the caller did not
    /// supply their own.
    pub fn run_id_or_generated(&self) -> String {
        self.run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

/// Whether `create_or_get_experiment` persisted a new run or found an
/// existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationOrigin {
    New,
    Existing,
}

/// One lifecycle instance of an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentRun {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub cancellation_time: Option<DateTime<Utc>>,
    pub creation_time: DateTime<Utc>,
    pub termination_reason: Option<String>,
}

impl ExperimentRun {
    /// Derive the lifecycle status from the four timestamps and `now`.
    pub fn status(&self, now: DateTime<Utc>) -> RunStatus {
        if let Some(cancellation) = self.cancellation_time {
            if cancellation > self.start_time {
                return if self.end_time.is_some() {
                    RunStatus::Stopped
                } else {
                    // Cancellation after the run already completed
                    // naturally does not change the outcome.
                    RunStatus::Completed
                };
            }
            return RunStatus::Canceled;
        }
        if now < self.start_time {
            return RunStatus::Scheduled;
        }
        match self.end_time {
            None => RunStatus::Running,
            Some(end) if now < end => RunStatus::Running,
            Some(_) => RunStatus::Completed,
        }
    }
}

/// Lifecycle status derived from an [`ExperimentRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Unspecified,
    Scheduled,
    Running,
    Completed,
    Canceled,
    Stopped,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RunStatus::Unspecified => "UNSPECIFIED",
            RunStatus::Scheduled => "SCHEDULED",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Canceled => "CANCELED",
            RunStatus::Stopped => "STOPPED",
        };
        f.write_str(label)
    }
}

/// Immutable typed payload referenced by exactly one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub id: String,
    pub fault: FaultConfig,
}

/// The unit exposed to generators, the monitor, and views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    pub run: ExperimentRun,
    pub config: ExperimentConfig,
}

impl Experiment {
    /// Config type identifier used to key the registries.
    pub fn config_type(&self) -> &'static str {
        self.config.fault.type_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn run(
        start_offset_min: i64,
        end_offset_min: Option<i64>,
        cancel_offset_min: Option<i64>,
    ) -> ExperimentRun {
        let now = base_now();
        ExperimentRun {
            id: "run-1".to_owned(),
            start_time: now + Duration::minutes(start_offset_min),
            end_time: end_offset_min.map(|m| now + Duration::minutes(m)),
            cancellation_time: cancel_offset_min.map(|m| now + Duration::minutes(m)),
            creation_time: now - Duration::minutes(60),
            termination_reason: None,
        }
    }

    #[test]
    fn running_within_window() {
        assert_eq!(run(0, Some(60), None).status(base_now()), RunStatus::Running);
        assert_eq!(run(-5, None, None).status(base_now()), RunStatus::Running);
    }

    #[test]
    fn scheduled_before_start() {
        assert_eq!(
            run(10, Some(60), None).status(base_now()),
            RunStatus::Scheduled
        );
    }

    #[test]
    fn completed_after_window() {
        assert_eq!(
            run(-60, Some(-10), None).status(base_now()),
            RunStatus::Completed
        );
    }

    #[test]
    fn stopped_when_canceled_mid_run() {
        // Cancellation landed after start and the window was closed.
        assert_eq!(
            run(-30, Some(-10), Some(-10)).status(base_now()),
            RunStatus::Stopped
        );
    }

    #[test]
    fn completed_when_canceled_after_open_ended_run() {
        assert_eq!(
            run(-30, None, Some(-10)).status(base_now()),
            RunStatus::Completed
        );
    }

    #[test]
    fn canceled_before_it_ever_ran() {
        assert_eq!(
            run(10, Some(60), Some(-1)).status(base_now()),
            RunStatus::Canceled
        );
        // Cancellation exactly at start also counts as never ran.
        assert_eq!(
            run(10, Some(60), Some(10)).status(base_now()),
            RunStatus::Canceled
        );
    }

    #[test]
    fn generated_run_ids_are_unique() {
        let spec = ExperimentSpecification {
            run_id: None,
            start_time: None,
            end_time: None,
            config: crate::fault::FaultConfig::Redis(crate::fault::RedisFaultConfig {
                downstream_cluster: "client".to_owned(),
                upstream_cluster: "cache".to_owned(),
                fault: crate::fault::RedisFault::Error { percent: 5 },
            }),
        };
        assert_ne!(spec.run_id_or_generated(), spec.run_id_or_generated());

        let supplied = ExperimentSpecification {
            run_id: Some("run-42".to_owned()),
            ..spec
        };
        assert_eq!(supplied.run_id_or_generated(), "run-42");
    }
}
