//! ---
//! flt_section: "15-testing-qa-runbook"
//! flt_subsection: "integration-tests"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Integration and validation tests for the Faultline stack."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
//! Monitor convergence: a watcher picks up a running experiment,
//! terminates it once a criterion fires, and is torn down by the outer
//! loop after the run leaves the active set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use faultline_metrics::MonitorMetrics;
use faultline_model::{
    Experiment, ExperimentSpecification, FaultConfig, RedisFault, RedisFaultConfig, RunStatus,
    REDIS_FAULT_TYPE,
};
use faultline_monitor::{Monitor, MonitorOptions, TerminationCriterion};
use faultline_store::ExperimentStore;
use tokio::sync::broadcast;

/// Criterion toggled from the outside, for driving convergence.
#[derive(Debug)]
struct SwitchCriterion {
    fire: Arc<AtomicBool>,
    reason: &'static str,
}

impl TerminationCriterion for SwitchCriterion {
    fn should_terminate(&self, _experiment: &Experiment) -> faultline_monitor::Result<Option<String>> {
        if self.fire.load(Ordering::SeqCst) {
            Ok(Some(self.reason.to_owned()))
        } else {
            Ok(None)
        }
    }
}

fn redis_spec() -> ExperimentSpecification {
    ExperimentSpecification {
        run_id: None,
        start_time: None,
        end_time: Some(Utc::now() + chrono::Duration::hours(1)),
        config: FaultConfig::Redis(RedisFaultConfig {
            downstream_cluster: "checkout".to_owned(),
            upstream_cluster: "session-cache".to_owned(),
            fault: RedisFault::Error { percent: 5 },
        }),
    }
}

async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread")]
async fn criterion_fire_terminates_the_run_and_retires_the_watcher() {
    let store = Arc::new(ExperimentStore::open_in_memory().unwrap());
    let created = store.create_experiment(&redis_spec()).unwrap();

    let fire = Arc::new(AtomicBool::new(false));
    let metrics = MonitorMetrics::unregistered();
    let monitor = Monitor::new(
        store.clone(),
        REDIS_FAULT_TYPE,
        vec![Arc::new(SwitchCriterion {
            fire: fire.clone(),
            reason: "synthetic overload detected",
        })],
        MonitorOptions {
            outer_interval: Duration::from_millis(20),
            check_interval: Duration::from_millis(10),
        },
        metrics.clone(),
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let tasks = monitor.spawn(&shutdown_tx);

    // The watcher appears once the outer loop lists the running
    // experiment.
    assert!(
        wait_until(Duration::from_secs(5), || metrics.watchers() == 1).await,
        "watcher never started"
    );
    assert_eq!(metrics.terminations(REDIS_FAULT_TYPE), 0);

    fire.store(true, Ordering::SeqCst);

    assert!(
        wait_until(Duration::from_secs(5), || {
            metrics.terminations(REDIS_FAULT_TYPE) == 1
        })
        .await,
        "criterion fire never terminated the run"
    );
    let stored = store
        .get_experiment(&created.run.id)
        .unwrap()
        .expect("run still present after termination");
    assert!(stored.run.cancellation_time.is_some());
    assert_eq!(
        stored.run.termination_reason.as_deref(),
        Some("synthetic overload detected")
    );
    assert_ne!(stored.run.status(Utc::now()), RunStatus::Running);

    // The outer loop notices the run left the active set and retires
    // the watcher; the watcher itself never exits on its own.
    assert!(
        wait_until(Duration::from_secs(5), || metrics.watchers() == 0).await,
        "watcher was never torn down"
    );
    // A single termination, even though the watcher kept ticking while
    // retirement was pending.
    assert_eq!(metrics.terminations(REDIS_FAULT_TYPE), 1);

    let _ = shutdown_tx.send(());
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn quiet_criteria_leave_the_run_alone() {
    let store = Arc::new(ExperimentStore::open_in_memory().unwrap());
    let created = store.create_experiment(&redis_spec()).unwrap();

    let metrics = MonitorMetrics::unregistered();
    let monitor = Monitor::new(
        store.clone(),
        REDIS_FAULT_TYPE,
        vec![Arc::new(SwitchCriterion {
            fire: Arc::new(AtomicBool::new(false)),
            reason: "never",
        })],
        MonitorOptions {
            outer_interval: Duration::from_millis(20),
            check_interval: Duration::from_millis(10),
        },
        metrics.clone(),
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let tasks = monitor.spawn(&shutdown_tx);

    assert!(
        wait_until(Duration::from_secs(5), || metrics.watchers() == 1).await,
        "watcher never started"
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stored = store.get_experiment(&created.run.id).unwrap().unwrap();
    assert!(stored.run.cancellation_time.is_none());
    assert_eq!(metrics.terminations(REDIS_FAULT_TYPE), 0);

    let _ = shutdown_tx.send(());
    for task in tasks {
        task.await.unwrap();
    }
}
