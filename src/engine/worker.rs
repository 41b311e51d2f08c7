//! Worker loop: claim an item, run its sequence, record, repeat.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rand::Rng;
use serde::Serialize;
use tracing::{Instrument, debug, error, warn};

use crate::collector::ResultCollector;
use crate::error::Result;
use crate::model::{OperationOutcome, WorkItem};
use crate::scenario::{OperationSequence, PriorResults};
use crate::telemetry::item::{record_outcome, record_stage, start_item_span};

use super::Shared;

/// Keys a single worker processed, in order.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub index: usize,
    pub keys: Vec<String>,
}

/// Result of one claim attempt.
#[derive(Debug)]
pub(crate) enum Claim {
    Item(WorkItem),
    /// Nothing left to hand out.
    Empty,
    /// The redraw budget went to re-delivered keys; try again.
    Deferred,
}

/// Draw from the queue until a key the tracker has not seen comes up.
///
/// Bounded by `max_redraws`; rejected keys are counted as skipped.
pub(crate) fn claim_next(shared: &Shared) -> Result<Claim> {
    for _ in 0..shared.config.max_redraws {
        let Some(item) = shared.queue.try_claim() else {
            return Ok(Claim::Empty);
        };
        if shared.tracker.mark_if_unclaimed(&item.key) {
            shared.collector.record_claim();
            return Ok(Claim::Item(item));
        }
        debug!(key = %item.key, "re-delivered key skipped");
        shared
            .collector
            .record_outcome(&item.key, &OperationOutcome::Skipped)?;
    }
    Ok(Claim::Deferred)
}

/// Run every step for one item, in order.
///
/// A failing critical step ends the sequence. Non-critical failures are
/// recorded and the sequence continues; the first failure decides the
/// item's outcome.
pub async fn run_sequence(
    sequence: &OperationSequence,
    item: &WorkItem,
    collector: &ResultCollector,
) -> OperationOutcome {
    let span = tracing::Span::current();
    let mut prior = PriorResults::default();
    let mut first_failure: Option<(String, String)> = None;

    for step in sequence.steps() {
        let started = Instant::now();
        let result = step.execute(item, &prior).await;
        let latency = started.elapsed();
        let latency_ms = latency.as_secs_f64() * 1000.0;

        match result {
            Ok(body) => {
                collector.record_request(step.name(), latency, true);
                record_stage(&span, step.name(), true, latency_ms);
                if let Some(value) = step.capture(&body) {
                    collector.capture(item, value);
                }
                prior.insert(step.name(), body);
            }
            Err(failure) => {
                collector.record_request(step.name(), latency, false);
                record_stage(&span, step.name(), false, latency_ms);
                warn!(key = %item.key, stage = step.name(), reason = %failure, "step failed");
                if first_failure.is_none() {
                    first_failure = Some((step.name().to_string(), failure.reason));
                }
                if step.critical() {
                    break;
                }
            }
        }
    }

    match first_failure {
        None => OperationOutcome::Success,
        Some((stage, reason)) => OperationOutcome::Failure { stage, reason },
    }
}

/// Process one claimed item and mark it complete.
async fn process(shared: &Shared, worker: usize, item: WorkItem) -> Result<String> {
    let span = start_item_span(&item.key, worker);
    let outcome = run_sequence(&shared.sequence, &item, &shared.collector)
        .instrument(span.clone())
        .await;
    record_outcome(
        &span,
        match outcome {
            OperationOutcome::Success => "success",
            OperationOutcome::Failure { .. } => "failure",
            OperationOutcome::Skipped => "skipped",
        },
    );

    shared.tracker.mark_completed(&item.key)?;
    shared.collector.record_outcome(&item.key, &outcome)?;
    Ok(item.key)
}

/// Think time between items; cut short by a stop.
async fn pause(shared: &Shared) {
    let (min, max) = (shared.config.wait_min, shared.config.wait_max);
    if max.is_zero() {
        return;
    }
    let wait = if min == max {
        min
    } else {
        rand::thread_rng().gen_range(min..=max)
    };
    tokio::select! {
        _ = tokio::time::sleep(wait) => {}
        _ = shared.stop.wait() => {}
    }
}

/// Give up this worker's slot if the pool is above target.
fn retire_if_over_target(shared: &Shared) -> bool {
    let target = shared.target.load(Ordering::SeqCst);
    shared
        .alive
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |alive| {
            (alive > target).then(|| alive - 1)
        })
        .is_ok()
}

/// Holds one unit of `busy` until dropped.
struct BusyGuard<'a>(&'a AtomicUsize);

impl<'a> BusyGuard<'a> {
    fn enter(busy: &'a AtomicUsize) -> Self {
        busy.fetch_add(1, Ordering::SeqCst);
        Self(busy)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A worker's place in `alive`. Released on drop, also when a step panics
/// and the task is torn down mid-item.
struct PoolSlot<'a> {
    shared: &'a Shared,
    held: bool,
}

impl Drop for PoolSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            self.shared.alive.fetch_sub(1, Ordering::SeqCst);
        }
        // Let the controller re-check completion right away.
        self.shared.wake.notify_one();
    }
}

async fn work(slot: &mut PoolSlot<'_>, report: &mut WorkerReport) -> Result<()> {
    let shared = slot.shared;
    loop {
        if shared.stop.is_triggered() {
            return Ok(());
        }
        if retire_if_over_target(shared) {
            slot.held = false;
            debug!(worker = report.index, "worker retired, pool above target");
            return Ok(());
        }

        let busy = BusyGuard::enter(&shared.busy);
        let item = match claim_next(shared)? {
            Claim::Item(item) => item,
            Claim::Empty => return Ok(()),
            Claim::Deferred => {
                drop(busy);
                tokio::task::yield_now().await;
                continue;
            }
        };

        let key = process(shared, report.index, item).await?;
        drop(busy);
        report.keys.push(key);

        pause(shared).await;
    }
}

/// Worker task body. The worker owns one slot in `alive` until it exits.
pub(crate) async fn run(shared: Arc<Shared>, index: usize) -> Result<WorkerReport> {
    let mut report = WorkerReport {
        index,
        keys: Vec::new(),
    };
    debug!(worker = index, "worker started");

    let mut slot = PoolSlot {
        shared: &shared,
        held: true,
    };
    let result = work(&mut slot, &mut report).await;
    drop(slot);

    match result {
        Ok(()) => {
            debug!(worker = index, processed = report.keys.len(), "worker finished");
            Ok(report)
        }
        Err(e) => {
            error!(worker = index, error = %e, "worker aborted on invariant violation");
            shared.stop.trigger();
            Err(e)
        }
    }
}
