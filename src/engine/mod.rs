//! Work distribution engine: queue draining, worker pool, rate control.
//!
//! Lifecycle is create ([`Engine::new`]) -> start ([`Engine::run`]) -> drain
//! (the run returns once every in-flight item finished) -> dispose (the
//! engine is consumed). There is no ambient state; everything shared lives in
//! one `Arc` owned by the engine and its tasks.

pub mod control;
pub mod rate;
pub mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::Notify;

use crate::collector::ResultCollector;
use crate::config::RunConfig;
use crate::dedup::DedupTracker;
use crate::error::{Error, Result};
use crate::model::{AggregateStats, Captured, WorkItem};
use crate::queue::WorkQueue;
use crate::scenario::OperationSequence;

pub use rate::{RateController, StopReason, Tick};
pub use worker::WorkerReport;

/// One-shot stop flag that wakes every waiter.
#[derive(Debug, Default)]
pub(crate) struct StopSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub(crate) fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once the signal is triggered.
    pub(crate) async fn wait(&self) {
        let notified = self.notify.notified();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

/// State shared by the controller and every worker.
pub(crate) struct Shared {
    pub(crate) queue: WorkQueue,
    pub(crate) tracker: DedupTracker,
    pub(crate) collector: Arc<ResultCollector>,
    pub(crate) sequence: OperationSequence,
    pub(crate) config: RunConfig,
    /// Worker count the controller wants.
    pub(crate) target: AtomicUsize,
    /// Workers currently running.
    pub(crate) alive: AtomicUsize,
    /// Workers between "about to claim" and "outcome recorded".
    pub(crate) busy: AtomicUsize,
    pub(crate) stop: StopSignal,
    /// Workers poke the controller when they find the queue empty.
    pub(crate) wake: Notify,
}

/// Summary returned when a run ends.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub reason: StopReason,
    pub stats: AggregateStats,
    pub workers: Vec<WorkerReport>,
    pub captured: Vec<Captured>,
}

/// Requests a graceful stop from outside the run.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    /// In-flight items finish their sequence; nothing new is claimed.
    pub fn stop(&self) {
        self.shared.stop.trigger();
    }
}

pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    pub fn new(
        items: impl IntoIterator<Item = WorkItem>,
        sequence: OperationSequence,
        config: RunConfig,
    ) -> Result<Self> {
        config.validate()?;
        if sequence.is_empty() {
            return Err(Error::Config(format!(
                "operation sequence {} has no steps",
                sequence.name()
            )));
        }

        let queue = WorkQueue::new(items, config.delivery).with_max_records(config.max_records);
        let collector = Arc::new(ResultCollector::new(queue.distinct()));

        Ok(Self {
            shared: Arc::new(Shared {
                queue,
                tracker: DedupTracker::new(),
                collector,
                sequence,
                config,
                target: AtomicUsize::new(0),
                alive: AtomicUsize::new(0),
                busy: AtomicUsize::new(0),
                stop: StopSignal::default(),
                wake: Notify::new(),
            }),
        })
    }

    /// Live view of the run's counters.
    pub fn collector(&self) -> Arc<ResultCollector> {
        Arc::clone(&self.shared.collector)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.shared.queue
    }

    pub fn tracker(&self) -> &DedupTracker {
        &self.shared.tracker
    }

    /// Drive the run to completion.
    ///
    /// Item failures are part of the report. Only a structural violation
    /// (a key claimed or completed twice) is returned as an error.
    pub async fn run(self) -> Result<RunReport> {
        control::drive(self.shared).await
    }
}

/// Create an engine and run it to completion.
pub async fn start(
    items: impl IntoIterator<Item = WorkItem>,
    sequence: OperationSequence,
    config: RunConfig,
) -> Result<RunReport> {
    Engine::new(items, sequence, config)?.run().await
}
