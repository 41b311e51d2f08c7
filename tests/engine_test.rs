//! Integration tests for the work distribution engine.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use seqload::config::RunConfig;
use seqload::engine::{Engine, RateController, StopReason, Tick};
use seqload::model::{OperationOutcome, WorkItem};
use seqload::queue::Delivery;
use seqload::scenario::{OperationSequence, PriorResults, Step, StepFailure};
use serde_json::{Value, json};

type CallLog = Arc<Mutex<Vec<(String, String)>>>;

/// Step that logs every call and fails for one chosen key.
struct FakeStep {
    name: String,
    critical: bool,
    fail_for: Option<String>,
    delay: Duration,
    calls: CallLog,
}

impl FakeStep {
    fn new(name: &str, calls: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            critical: true,
            fail_for: None,
            delay: Duration::ZERO,
            calls: Arc::clone(calls),
        }
    }

    fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    fn failing_for(mut self, key: &str) -> Self {
        self.fail_for = Some(key.to_string());
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Step for FakeStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn critical(&self) -> bool {
        self.critical
    }

    async fn execute(&self, item: &WorkItem, _prior: &PriorResults) -> Result<Value, StepFailure> {
        self.calls
            .lock()
            .unwrap()
            .push((self.name.clone(), item.key.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        if self.fail_for.as_deref() == Some(item.key.as_str()) {
            return Err(StepFailure::status(500, format!("{} failed: 500", self.name)));
        }
        Ok(json!({ "id": format!("{}-{}", self.name, item.key) }))
    }
}

/// Second step that needs the id returned by the first.
struct NeedsPrior {
    seen: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Step for NeedsPrior {
    fn name(&self) -> &str {
        "lookup"
    }

    async fn execute(&self, _item: &WorkItem, prior: &PriorResults) -> Result<Value, StepFailure> {
        let id = prior
            .get("create")
            .and_then(|b| b.get("id"))
            .cloned()
            .ok_or_else(|| StepFailure::error("create id missing"))?;
        self.seen.lock().unwrap().push(id.clone());
        Ok(json!({ "owner": id }))
    }

    fn capture(&self, response: &Value) -> Option<Value> {
        response.get("owner").cloned()
    }
}

/// Step with a bug: panics for one key.
struct Panicky {
    key: &'static str,
}

#[async_trait]
impl Step for Panicky {
    fn name(&self) -> &str {
        "panicky"
    }

    async fn execute(&self, item: &WorkItem, _prior: &PriorResults) -> Result<Value, StepFailure> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if item.key == self.key {
            panic!("step bug");
        }
        Ok(Value::Null)
    }
}

fn items(keys: &[&str]) -> Vec<WorkItem> {
    keys.iter().map(|k| WorkItem::new(*k)).collect()
}

fn fast_config(workers: usize) -> RunConfig {
    RunConfig {
        ceiling_workers: workers,
        ramp_rate_per_second: 0,
        tick_interval: Duration::from_millis(10),
        time_budget: Duration::from_secs(30),
        ..RunConfig::default()
    }
}

fn five_steps(calls: &CallLog, fail_first_for: Option<&str>) -> OperationSequence {
    let mut first = FakeStep::new("01_Create_User", calls);
    if let Some(key) = fail_first_for {
        first = first.failing_for(key);
    }
    OperationSequence::new("five")
        .step(first)
        .step(FakeStep::new("02_Get_User", calls).non_critical())
        .step(FakeStep::new("03_Create_Transaction", calls))
        .step(FakeStep::new("04_Update_User", calls).non_critical())
        .step(FakeStep::new("05_Get_Transactions", calls).non_critical())
}

fn calls_for(calls: &CallLog, key: &str) -> Vec<String> {
    calls
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, k)| k == key)
        .map(|(stage, _)| stage.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Completion and uniqueness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_users_two_workers_each_processed_once() {
    let calls = CallLog::default();
    let report = seqload::engine::start(
        items(&["USER001", "USER002", "USER003"]),
        five_steps(&calls, None),
        fast_config(2),
    )
    .await
    .unwrap();

    assert_eq!(report.reason, StopReason::Drained);
    assert_eq!(report.stats.total_processed, 3);
    assert_eq!(report.stats.succeeded, 3);
    assert_eq!(report.stats.total_requests, 15);
    assert!(report.workers.len() <= 2);

    let mut seen = HashSet::new();
    for worker in &report.workers {
        for key in &worker.keys {
            assert!(seen.insert(key.clone()), "{key} processed twice");
        }
    }
    assert_eq!(seen.len(), 3);

    for key in ["USER001", "USER002", "USER003"] {
        assert_eq!(
            calls_for(&calls, key),
            vec![
                "01_Create_User",
                "02_Get_User",
                "03_Create_Transaction",
                "04_Update_User",
                "05_Get_Transactions"
            ],
            "steps for {key} ran out of order or more than once"
        );
    }
}

#[tokio::test]
async fn empty_source_stops_immediately() {
    let calls = CallLog::default();
    let report = seqload::engine::start(Vec::new(), five_steps(&calls, None), fast_config(4))
        .await
        .unwrap();

    assert_eq!(report.reason, StopReason::Drained);
    assert_eq!(report.stats.total_processed, 0);
    assert_eq!(report.stats.total_requests, 0);
    assert!(report.workers.is_empty());
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_are_disjoint() {
    let keys: Vec<String> = (0..1000).map(|i| format!("KEY{i:04}")).collect();
    let calls = CallLog::default();
    let sequence = OperationSequence::new("one").step(FakeStep::new("touch", &calls));

    let engine = Engine::new(
        keys.iter().map(WorkItem::new),
        sequence,
        fast_config(50),
    )
    .unwrap();
    let collector = engine.collector();
    let report = engine.run().await.unwrap();

    let claimed: usize = report.workers.iter().map(|w| w.keys.len()).sum();
    assert_eq!(claimed, 1000);

    let mut union = HashSet::new();
    for worker in &report.workers {
        for key in &worker.keys {
            assert!(union.insert(key.as_str()), "{key} claimed by two workers");
        }
    }
    assert_eq!(union.len(), 1000);
    assert_eq!(report.stats.total_processed, 1000);
    assert!(report.stats.total_processed <= report.stats.total_items);
    assert_eq!(collector.processed_keys().len(), 1000);
    assert_eq!(calls.lock().unwrap().len(), 1000);
}

// ---------------------------------------------------------------------------
// Sequence semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn critical_failure_aborts_rest_of_sequence() {
    let calls = CallLog::default();
    let engine = Engine::new(
        items(&["USER001", "USER002", "USER003"]),
        five_steps(&calls, Some("USER002")),
        fast_config(2),
    )
    .unwrap();
    let collector = engine.collector();
    let report = engine.run().await.unwrap();

    assert_eq!(calls_for(&calls, "USER002"), vec!["01_Create_User"]);
    assert_eq!(calls_for(&calls, "USER001").len(), 5);
    assert_eq!(calls_for(&calls, "USER003").len(), 5);

    match collector.outcome("USER002") {
        Some(OperationOutcome::Failure { stage, reason }) => {
            assert_eq!(stage, "01_Create_User");
            assert!(reason.contains("500"));
        }
        other => panic!("expected failure for USER002, got {other:?}"),
    }
    assert_eq!(collector.outcome("USER001"), Some(OperationOutcome::Success));
    assert_eq!(collector.outcome("USER003"), Some(OperationOutcome::Success));

    let stats = report.stats;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.stages["01_Create_User"].requests, 3);
    assert_eq!(stats.stages["01_Create_User"].failures, 1);
    assert_eq!(stats.stages["02_Get_User"].requests, 2);
    assert_eq!(stats.total_failures, 1);
}

#[tokio::test]
async fn non_critical_failure_keeps_going() {
    let calls = CallLog::default();
    let sequence = OperationSequence::new("mixed")
        .step(FakeStep::new("create", &calls))
        .step(FakeStep::new("read", &calls).non_critical().failing_for("A"))
        .step(FakeStep::new("update", &calls));

    let engine = Engine::new(items(&["A", "B"]), sequence, fast_config(1)).unwrap();
    let collector = engine.collector();
    let report = engine.run().await.unwrap();

    assert_eq!(calls_for(&calls, "A"), vec!["create", "read", "update"]);
    assert_eq!(
        collector.outcome("A"),
        Some(OperationOutcome::Failure {
            stage: "read".to_string(),
            reason: "read failed: 500".to_string(),
        })
    );
    assert_eq!(report.stats.stages["read"].failures, 1);
    assert_eq!(report.stats.stages["update"].requests, 2);
}

#[tokio::test]
async fn later_steps_see_prior_results_and_captures_are_kept() {
    let calls = CallLog::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sequence = OperationSequence::new("chain")
        .step(FakeStep::new("create", &calls))
        .step(NeedsPrior {
            seen: Arc::clone(&seen),
        });

    let source = vec![
        WorkItem::new("X1").with_payload(json!({ "model": "Model_1" })),
        WorkItem::new("X2"),
    ];
    let report = seqload::engine::start(source, sequence, fast_config(2))
        .await
        .unwrap();

    assert_eq!(report.stats.succeeded, 2);
    let mut seen: Vec<Value> = seen.lock().unwrap().clone();
    seen.sort_by_key(|v| v.to_string());
    assert_eq!(seen, vec![json!("create-X1"), json!("create-X2")]);

    let x1 = report.captured.iter().find(|c| c.key == "X1").unwrap();
    assert_eq!(x1.payload, Some(json!({ "model": "Model_1" })));

    let captured: HashMap<String, Value> = report
        .captured
        .into_iter()
        .map(|c| (c.key, c.value))
        .collect();
    assert_eq!(captured["X1"], json!("create-X1"));
    assert_eq!(captured.len(), 2);
}

// ---------------------------------------------------------------------------
// Delivery modes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn at_least_once_source_processes_each_key_once() {
    let calls = CallLog::default();
    let config = RunConfig {
        delivery: Delivery::AtLeastOnce,
        max_redraws: 2,
        ..fast_config(3)
    };
    let engine = Engine::new(
        items(&["A", "B", "A", "C", "B", "A"]),
        OperationSequence::new("one").step(FakeStep::new("touch", &calls)),
        config,
    )
    .unwrap();
    let report = engine.run().await.unwrap();

    assert_eq!(report.stats.total_items, 3);
    assert_eq!(report.stats.total_processed, 3);
    assert_eq!(report.stats.skipped, 3);
    for key in ["A", "B", "C"] {
        assert_eq!(calls_for(&calls, key).len(), 1, "{key} executed more than once");
    }
}

#[tokio::test]
async fn drain_source_drops_duplicates_up_front() {
    let calls = CallLog::default();
    let engine = Engine::new(
        items(&["A", "B", "A", "C"]),
        OperationSequence::new("one").step(FakeStep::new("touch", &calls)),
        fast_config(2),
    )
    .unwrap();
    assert_eq!(engine.queue().len(), 3);
    let report = engine.run().await.unwrap();

    assert_eq!(report.stats.total_processed, 3);
    assert_eq!(report.stats.skipped, 0);
}

// ---------------------------------------------------------------------------
// Termination
// ---------------------------------------------------------------------------

#[tokio::test]
async fn time_budget_lets_in_flight_items_finish() {
    let calls = CallLog::default();
    let keys: Vec<String> = (0..20).map(|i| format!("U{i}")).collect();
    let config = RunConfig {
        time_budget: Duration::from_millis(60),
        ..fast_config(2)
    };
    let sequence = OperationSequence::new("slow")
        .step(FakeStep::new("first", &calls).delayed(Duration::from_millis(40)))
        .step(FakeStep::new("second", &calls).delayed(Duration::from_millis(40)));

    let report = seqload::engine::start(keys.iter().map(WorkItem::new), sequence, config)
        .await
        .unwrap();

    assert_eq!(report.reason, StopReason::TimeBudget);
    assert!(report.stats.total_processed >= 1);
    assert!(report.stats.total_processed < 20);
    assert_eq!(report.stats.claimed, report.stats.total_processed);
    assert_eq!(report.stats.in_flight, 0);
    // No sequence was cut in half.
    assert_eq!(
        report.stats.stages["first"].requests,
        report.stats.stages["second"].requests
    );
}

#[tokio::test]
async fn record_budget_limits_claims() {
    let calls = CallLog::default();
    let keys: Vec<String> = (0..10).map(|i| format!("U{i}")).collect();
    let config = RunConfig {
        max_records: Some(4),
        ..fast_config(3)
    };
    let report = seqload::engine::start(
        keys.iter().map(WorkItem::new),
        OperationSequence::new("one").step(FakeStep::new("touch", &calls)),
        config,
    )
    .await
    .unwrap();

    assert_eq!(report.reason, StopReason::Drained);
    assert_eq!(report.stats.total_processed, 4);
}

#[tokio::test]
async fn stop_handle_cancels_gracefully() {
    let calls = CallLog::default();
    let keys: Vec<String> = (0..50).map(|i| format!("U{i}")).collect();
    let engine = Engine::new(
        keys.iter().map(WorkItem::new),
        OperationSequence::new("slow")
            .step(FakeStep::new("only", &calls).delayed(Duration::from_millis(20))),
        fast_config(2),
    )
    .unwrap();
    let stop = engine.stop_handle();
    let run = tokio::spawn(engine.run());

    tokio::time::sleep(Duration::from_millis(50)).await;
    stop.stop();
    let report = run.await.unwrap().unwrap();

    assert_eq!(report.reason, StopReason::Cancelled);
    assert!(report.stats.total_processed < 50);
    assert_eq!(report.stats.claimed, report.stats.total_processed);
}

#[tokio::test]
async fn think_time_spaces_out_items() {
    let calls = CallLog::default();
    let config = RunConfig {
        wait_min: Duration::from_millis(20),
        wait_max: Duration::from_millis(30),
        ..fast_config(1)
    };
    let started = std::time::Instant::now();
    let report = seqload::engine::start(
        items(&["A", "B", "C"]),
        OperationSequence::new("one").step(FakeStep::new("touch", &calls)),
        config,
    )
    .await
    .unwrap();

    assert_eq!(report.stats.total_processed, 3);
    assert!(started.elapsed() >= Duration::from_millis(40));
}

#[tokio::test]
async fn panicking_step_aborts_run_without_waiting_for_budget() {
    let config = RunConfig {
        time_budget: Duration::from_secs(5),
        ..fast_config(2)
    };
    let started = std::time::Instant::now();
    let result = seqload::engine::start(
        items(&["A", "B", "C", "D"]),
        OperationSequence::new("buggy").step(Panicky { key: "B" }),
        config,
    )
    .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("worker task failed"), "{err}");
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "run took {:?}",
        started.elapsed()
    );
}

#[test]
fn exhausted_queue_stops_on_first_tick_regardless_of_ramp() {
    let controller = RateController::new(10, 2, Duration::from_secs(3600));
    assert_eq!(
        controller.tick(Duration::ZERO, true, 0),
        Tick::Stop(StopReason::Drained)
    );
    assert_eq!(
        controller.tick(Duration::ZERO, false, 0),
        Tick::Run {
            target_workers: 2,
            spawn_rate: 2
        }
    );
}

#[test]
fn engine_rejects_empty_sequence_and_bad_config() {
    let empty = Engine::new(items(&["A"]), OperationSequence::new("none"), fast_config(1));
    assert!(empty.is_err());

    let calls = CallLog::default();
    let zero_workers = Engine::new(
        items(&["A"]),
        OperationSequence::new("one").step(FakeStep::new("touch", &calls)),
        RunConfig {
            ceiling_workers: 0,
            ..RunConfig::default()
        },
    );
    assert!(zero_workers.is_err());
}
