//! ---
//! flt_section: "02-experiment-store"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Experiment persistence and transformation registry."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use std::path::Path;

use chrono::{DateTime, Utc};
use faultline_common::time::utc_now;
use faultline_model::{
    CreationOrigin, Experiment, ExperimentConfig, ExperimentRun, ExperimentSpecification,
    FaultConfig, ListViewItem, RunDetails, RunStatus,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::transformation::{Transformation, TransformationRegistry};
use crate::views::{config_properties, run_properties};
use crate::{Result, StoreError};

/// Termination reasons are bounded before storage.
const MAX_TERMINATION_REASON_CHARS: usize = 255;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS experiment_config (
    id          TEXT PRIMARY KEY,
    config_type TEXT NOT NULL,
    config      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS experiment_run (
    id                 TEXT PRIMARY KEY,
    config_id          TEXT NOT NULL REFERENCES experiment_config (id),
    start_time         INTEGER NOT NULL,
    end_time           INTEGER,
    cancellation_time  INTEGER,
    creation_time      INTEGER NOT NULL,
    termination_reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_experiment_run_window
    ON experiment_run (start_time, end_time);
";

const SELECT_EXPERIMENT: &str = "
SELECT r.id, r.start_time, r.end_time, r.cancellation_time, r.creation_time,
       r.termination_reason, c.id, c.config
FROM experiment_run r
JOIN experiment_config c ON r.config_id = c.id
";

/// Durable CRUD over experiment specifications, runs, and configs.
///
/// Timestamps are persisted as integer microseconds since the Unix
/// epoch so window comparisons stay exact in SQL.
pub struct ExperimentStore {
    conn: Mutex<Connection>,
    transformations: TransformationRegistry,
}

impl ExperimentStore {
    /// Open (and migrate) the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self::with_connection(conn)?;
        info!(path = %path.display(), "experiment store opened");
        Ok(store)
    }

    /// Open an in-memory store, used by tests and local tooling.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            transformations: TransformationRegistry::default(),
        })
    }

    /// Register a presentation transformation for one config type.
    /// Must be called during wiring, before the store is shared.
    pub fn register_transformation(
        &mut self,
        transformation: Box<dyn Transformation>,
    ) -> Result<()> {
        self.transformations.register(transformation)
    }

    /// Validate the specification and persist config + run as one
    /// atomic unit.
    pub fn create_experiment(&self, spec: &ExperimentSpecification) -> Result<Experiment> {
        let now = utc_now();
        let start_time = spec.start_time.unwrap_or(now);
        if start_time < now {
            return Err(StoreError::Validation(format!(
                "start time {} is in the past",
                start_time
            )));
        }
        if let Some(end_time) = spec.end_time {
            if end_time <= start_time {
                return Err(StoreError::Validation(format!(
                    "end time {} does not follow start time {}",
                    end_time, start_time
                )));
            }
        }

        let run = ExperimentRun {
            id: spec.run_id_or_generated(),
            start_time,
            end_time: spec.end_time,
            cancellation_time: None,
            creation_time: now,
            termination_reason: None,
        };
        let config = ExperimentConfig {
            id: Uuid::new_v4().to_string(),
            fault: spec.config.clone(),
        };
        let config_json = serde_json::to_string(&config.fault)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO experiment_config (id, config_type, config) VALUES (?1, ?2, ?3)",
            params![config.id, config.fault.type_id(), config_json],
        )?;
        tx.execute(
            "INSERT INTO experiment_run
                 (id, config_id, start_time, end_time, cancellation_time, creation_time,
                  termination_reason)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5, NULL)",
            params![
                run.id,
                config.id,
                to_micros(run.start_time),
                run.end_time.map(to_micros),
                to_micros(run.creation_time),
            ],
        )?;
        tx.commit()?;

        info!(run_id = %run.id, config_type = config.fault.type_id(), "experiment created");
        Ok(Experiment { run, config })
    }

    /// Idempotent creation for callers that may resubmit: an existing
    /// run with the supplied id is returned unchanged.
    pub fn create_or_get_experiment(
        &self,
        spec: &ExperimentSpecification,
    ) -> Result<(Experiment, CreationOrigin)> {
        if let Some(run_id) = &spec.run_id {
            if let Some(existing) = self.get_experiment(run_id)? {
                debug!(run_id = %run_id, "experiment already exists");
                return Ok((existing, CreationOrigin::Existing));
            }
        }
        let created = self.create_experiment(spec)?;
        Ok((created, CreationOrigin::New))
    }

    /// Cancel a run, recording a bounded reason. The update is
    /// conditional: it only lands when the run has not already been
    /// canceled and has not already naturally expired, so concurrent
    /// cancellations collapse to one effective write.
    pub fn cancel_experiment_run(&self, run_id: &str, reason: &str) -> Result<()> {
        let now = to_micros(utc_now());
        let reason: String = reason.chars().take(MAX_TERMINATION_REASON_CHARS).collect();

        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE experiment_run
             SET cancellation_time = ?1, termination_reason = ?2
             WHERE id = ?3
               AND cancellation_time IS NULL
               AND (end_time IS NULL OR end_time > ?1)",
            params![now, reason, run_id],
        )?;
        if updated == 0 {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM experiment_run WHERE id = ?1",
                    params![run_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(run_id.to_owned()));
            }
            debug!(run_id, "cancellation was a no-op");
            return Ok(());
        }
        info!(run_id, reason = %reason, "experiment run canceled");
        Ok(())
    }

    /// Fetch one experiment by run id.
    pub fn get_experiment(&self, run_id: &str) -> Result<Option<Experiment>> {
        let conn = self.conn.lock();
        let query = format!("{SELECT_EXPERIMENT} WHERE r.id = ?1");
        let row = conn
            .query_row(&query, params![run_id], experiment_from_row)
            .optional()?;
        row.transpose()
    }

    /// List experiments, optionally filtered by config type and
    /// restricted to currently-running runs.
    ///
    /// An empty `config_type` matches all types. A status filter of
    /// [`RunStatus::Unspecified`] matches all statuses; any other value
    /// restricts to runs that are running right now (cancellation
    /// unset, now inside the execution window). Rows are ordered by
    /// `(creation_time, id)` so downstream conflict resolution is
    /// deterministic across ticks.
    pub fn get_experiments(
        &self,
        config_type: &str,
        status_filter: RunStatus,
    ) -> Result<Vec<Experiment>> {
        let running_only = status_filter != RunStatus::Unspecified;
        let now = to_micros(utc_now());

        let conn = self.conn.lock();
        let query = format!(
            "{SELECT_EXPERIMENT}
             WHERE (?1 = '' OR c.config_type = ?1)
               AND (?2 = 0 OR (r.cancellation_time IS NULL
                               AND r.start_time <= ?3
                               AND (r.end_time IS NULL OR r.end_time > ?3)))
             ORDER BY r.creation_time, r.id"
        );
        let mut statement = conn.prepare(&query)?;
        let rows = statement.query_map(
            params![config_type, running_only as i64, now],
            experiment_from_row,
        )?;

        let mut experiments = Vec::new();
        for row in rows {
            experiments.push(row??);
        }
        Ok(experiments)
    }

    /// Assemble the detail view for one run: run properties, config
    /// properties, and any registered transformation output.
    pub fn get_experiment_run_details(&self, run_id: &str) -> Result<RunDetails> {
        let experiment = self
            .get_experiment(run_id)?
            .ok_or_else(|| StoreError::NotFound(run_id.to_owned()))?;
        let now = utc_now();

        let mut properties = run_properties(&experiment, now);
        properties.extend(config_properties(&experiment));
        properties.extend(self.transformations.properties_for(&experiment)?);

        Ok(RunDetails {
            run_id: experiment.run.id.clone(),
            status: experiment.run.status(now),
            properties,
        })
    }

    /// Assemble the list view across all experiments.
    pub fn get_list_view(&self) -> Result<Vec<ListViewItem>> {
        let experiments = self.get_experiments("", RunStatus::Unspecified)?;
        let now = utc_now();

        let mut items = Vec::with_capacity(experiments.len());
        for experiment in &experiments {
            let mut properties = run_properties(experiment, now);
            properties.extend(config_properties(experiment));
            properties.extend(self.transformations.properties_for(experiment)?);
            items.push(ListViewItem {
                run_id: experiment.run.id.clone(),
                properties,
            });
        }
        Ok(items)
    }
}

fn to_micros(value: DateTime<Utc>) -> i64 {
    value.timestamp_micros()
}

fn from_micros(value: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(value).ok_or(StoreError::CorruptTimestamp(value))
}

fn experiment_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Experiment>> {
    let id: String = row.get(0)?;
    let start_time: i64 = row.get(1)?;
    let end_time: Option<i64> = row.get(2)?;
    let cancellation_time: Option<i64> = row.get(3)?;
    let creation_time: i64 = row.get(4)?;
    let termination_reason: Option<String> = row.get(5)?;
    let config_id: String = row.get(6)?;
    let config_json: String = row.get(7)?;

    Ok(build_experiment(
        id,
        start_time,
        end_time,
        cancellation_time,
        creation_time,
        termination_reason,
        config_id,
        config_json,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_experiment(
    id: String,
    start_time: i64,
    end_time: Option<i64>,
    cancellation_time: Option<i64>,
    creation_time: i64,
    termination_reason: Option<String>,
    config_id: String,
    config_json: String,
) -> Result<Experiment> {
    let fault: FaultConfig = serde_json::from_str(&config_json)?;
    Ok(Experiment {
        run: ExperimentRun {
            id,
            start_time: from_micros(start_time)?,
            end_time: end_time.map(from_micros).transpose()?,
            cancellation_time: cancellation_time.map(from_micros).transpose()?,
            creation_time: from_micros(creation_time)?,
            termination_reason,
        },
        config: ExperimentConfig {
            id: config_id,
            fault,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use faultline_model::{
        AbortFault, ClusterPairTarget, FaultEnforcement, HttpFault, HttpFaultConfig, Property,
        RedisFault, RedisFaultConfig, HTTP_FAULT_TYPE, REDIS_FAULT_TYPE,
    };

    fn http_spec(run_id: Option<&str>, end_offset: Option<Duration>) -> ExperimentSpecification {
        let now = utc_now();
        ExperimentSpecification {
            run_id: run_id.map(str::to_owned),
            start_time: Some(now + Duration::milliseconds(50)),
            end_time: end_offset.map(|offset| now + offset),
            config: FaultConfig::Http(HttpFaultConfig {
                targeting: ClusterPairTarget {
                    upstream_cluster: "serviceA".to_owned(),
                    downstream_cluster: Some("serviceB".to_owned()),
                    enforcement: FaultEnforcement::Ingress,
                },
                fault: HttpFault::Abort(AbortFault {
                    http_status: 404,
                    percent: 10,
                }),
            }),
        }
    }

    fn redis_spec() -> ExperimentSpecification {
        ExperimentSpecification {
            run_id: None,
            start_time: None,
            end_time: None,
            config: FaultConfig::Redis(RedisFaultConfig {
                downstream_cluster: "client".to_owned(),
                upstream_cluster: "cache".to_owned(),
                fault: RedisFault::Error { percent: 5 },
            }),
        }
    }

    #[test]
    fn create_round_trips_through_sqlite() {
        let store = ExperimentStore::open_in_memory().unwrap();
        let created = store
            .create_experiment(&http_spec(Some("run-1"), Some(Duration::hours(1))))
            .unwrap();
        assert_eq!(created.run.id, "run-1");
        assert_eq!(created.config_type(), HTTP_FAULT_TYPE);

        let fetched = store.get_experiment("run-1").unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn rejects_start_time_in_the_past() {
        let store = ExperimentStore::open_in_memory().unwrap();
        let mut spec = http_spec(None, None);
        spec.start_time = Some(utc_now() - Duration::minutes(1));
        let err = store.create_experiment(&spec).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn rejects_end_before_start() {
        let store = ExperimentStore::open_in_memory().unwrap();
        let mut spec = http_spec(None, None);
        let start = utc_now() + Duration::hours(1);
        spec.start_time = Some(start);
        spec.end_time = Some(start - Duration::minutes(5));
        let err = store.create_experiment(&spec).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn create_or_get_is_idempotent() {
        let store = ExperimentStore::open_in_memory().unwrap();
        let spec = http_spec(Some("run-retry"), Some(Duration::hours(1)));
        let (first, origin) = store.create_or_get_experiment(&spec).unwrap();
        assert_eq!(origin, CreationOrigin::New);

        let (second, origin) = store.create_or_get_experiment(&spec).unwrap();
        assert_eq!(origin, CreationOrigin::Existing);
        assert_eq!(second, first);
    }

    #[test]
    fn cancellation_is_idempotent() {
        let store = ExperimentStore::open_in_memory().unwrap();
        let spec = ExperimentSpecification {
            start_time: None,
            ..http_spec(Some("run-cancel"), Some(Duration::hours(1)))
        };
        store.create_experiment(&spec).unwrap();

        store
            .cancel_experiment_run("run-cancel", "operator requested stop")
            .unwrap();
        let first = store
            .get_experiment("run-cancel")
            .unwrap()
            .unwrap()
            .run
            .cancellation_time
            .unwrap();

        store.cancel_experiment_run("run-cancel", "second call").unwrap();
        let fetched = store.get_experiment("run-cancel").unwrap().unwrap();
        assert_eq!(fetched.run.cancellation_time, Some(first));
        assert_eq!(
            fetched.run.termination_reason.as_deref(),
            Some("operator requested stop")
        );
    }

    #[test]
    fn cancel_unknown_run_is_not_found() {
        let store = ExperimentStore::open_in_memory().unwrap();
        let err = store.cancel_experiment_run("ghost", "reason").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn termination_reason_is_truncated() {
        let store = ExperimentStore::open_in_memory().unwrap();
        let spec = ExperimentSpecification {
            start_time: None,
            ..http_spec(Some("run-long-reason"), None)
        };
        store.create_experiment(&spec).unwrap();

        let reason = "x".repeat(1000);
        store.cancel_experiment_run("run-long-reason", &reason).unwrap();
        let fetched = store.get_experiment("run-long-reason").unwrap().unwrap();
        assert_eq!(fetched.run.termination_reason.unwrap().len(), 255);
    }

    #[test]
    fn running_filter_excludes_scheduled_and_canceled() {
        let store = ExperimentStore::open_in_memory().unwrap();

        // Running immediately.
        let running = ExperimentSpecification {
            start_time: None,
            ..http_spec(Some("run-now"), Some(Duration::hours(1)))
        };
        store.create_experiment(&running).unwrap();

        // Scheduled in the future.
        let mut scheduled = http_spec(Some("run-later"), None);
        scheduled.start_time = Some(utc_now() + Duration::hours(2));
        store.create_experiment(&scheduled).unwrap();

        // Canceled right after creation.
        let canceled = ExperimentSpecification {
            start_time: None,
            ..redis_spec()
        };
        let canceled = store.create_experiment(&canceled).unwrap();
        store.cancel_experiment_run(&canceled.run.id, "abandoned").unwrap();

        let active = store.get_experiments("", RunStatus::Running).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].run.id, "run-now");

        let all = store.get_experiments("", RunStatus::Unspecified).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn config_type_filter_restricts_types() {
        let store = ExperimentStore::open_in_memory().unwrap();
        store
            .create_experiment(&ExperimentSpecification {
                start_time: None,
                ..http_spec(Some("run-http"), None)
            })
            .unwrap();
        store
            .create_experiment(&ExperimentSpecification {
                start_time: None,
                ..redis_spec()
            })
            .unwrap();

        let redis = store
            .get_experiments(REDIS_FAULT_TYPE, RunStatus::Unspecified)
            .unwrap();
        assert_eq!(redis.len(), 1);
        assert_eq!(redis[0].config_type(), REDIS_FAULT_TYPE);
    }

    #[test]
    fn listing_orders_by_creation_time() {
        let store = ExperimentStore::open_in_memory().unwrap();
        for id in ["run-b", "run-a", "run-c"] {
            store
                .create_experiment(&ExperimentSpecification {
                    start_time: None,
                    ..http_spec(Some(id), None)
                })
                .unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let all = store.get_experiments("", RunStatus::Unspecified).unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.run.id.as_str()).collect();
        assert_eq!(ids, vec!["run-b", "run-a", "run-c"]);
    }

    struct TargetLine;

    impl Transformation for TargetLine {
        fn config_type(&self) -> &'static str {
            HTTP_FAULT_TYPE
        }

        fn transform(&self, experiment: &Experiment) -> Result<Vec<Property>> {
            let FaultConfig::Http(config) = &experiment.config.fault else {
                return Ok(Vec::new());
            };
            let downstream = config
                .targeting
                .downstream_cluster
                .as_deref()
                .unwrap_or("all");
            Ok(vec![Property::new(
                "target",
                "Target",
                format!("{} \u{27a1} {}", downstream, config.targeting.upstream_cluster),
            )])
        }
    }

    #[test]
    fn detail_view_merges_transformation_output() {
        let mut store = ExperimentStore::open_in_memory().unwrap();
        store.register_transformation(Box::new(TargetLine)).unwrap();
        store
            .create_experiment(&ExperimentSpecification {
                start_time: None,
                ..http_spec(Some("run-view"), Some(Duration::hours(1)))
            })
            .unwrap();

        let details = store.get_experiment_run_details("run-view").unwrap();
        assert_eq!(details.status, RunStatus::Running);
        let target = details
            .properties
            .iter()
            .find(|p| p.id == "target")
            .expect("transformation property present");
        assert_eq!(target.value, "serviceB \u{27a1} serviceA");
        assert!(details.properties.iter().any(|p| p.id == "config_type"));
    }

    #[test]
    fn list_view_covers_every_run() {
        let store = ExperimentStore::open_in_memory().unwrap();
        for id in ["run-1", "run-2"] {
            store
                .create_experiment(&ExperimentSpecification {
                    start_time: None,
                    ..http_spec(Some(id), None)
                })
                .unwrap();
        }
        let items = store.get_list_view().unwrap();
        assert_eq!(items.len(), 2);
        assert!(items
            .iter()
            .all(|item| item.properties.iter().any(|p| p.id == "status")));
        // Run, config, and transformation properties are all merged
        // into every row, same as the detail view.
        assert!(items.iter().all(|item| {
            item.properties
                .iter()
                .any(|p| p.id == "config_type" && p.value == HTTP_FAULT_TYPE)
        }));
    }
}
