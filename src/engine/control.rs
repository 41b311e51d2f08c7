//! Control loop: ticks the rate controller, sizes the pool, ends the run.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::AggregateStats;

use super::rate::{RateController, StopReason, Tick};
use super::worker::{self, WorkerReport};
use super::{RunReport, Shared};

/// Collects worker results as tasks finish.
#[derive(Default)]
struct Harvest {
    reports: Vec<WorkerReport>,
    fatal: Option<Error>,
}

impl Harvest {
    fn take(&mut self, joined: std::result::Result<Result<WorkerReport>, JoinError>) {
        match joined {
            Ok(Ok(report)) => self.reports.push(report),
            Ok(Err(e)) => {
                self.fatal.get_or_insert(e);
            }
            Err(e) => {
                self.fatal
                    .get_or_insert(Error::Other(format!("worker task failed: {e}")));
            }
        }
    }
}

/// Logs a progress line each time another `every` items finish.
struct Progress {
    every: u64,
    logged: u64,
}

impl Progress {
    fn observe(&mut self, stats: &AggregateStats) {
        if self.every == 0 {
            return;
        }
        let bucket = stats.total_processed / self.every;
        if bucket > self.logged {
            self.logged = bucket;
            info!(
                completed = stats.total_processed,
                total = stats.total_items,
                items_per_sec = stats.items_per_sec(),
                "progress"
            );
        }
    }
}

pub(crate) async fn drive(shared: Arc<Shared>) -> Result<RunReport> {
    let config = &shared.config;
    let controller = RateController::new(
        config.ceiling_workers,
        config.ramp_rate_per_second,
        config.time_budget,
    );
    let mut progress = Progress {
        every: config.progress_every,
        logged: 0,
    };

    info!(
        sequence = shared.sequence.name(),
        items = shared.queue.distinct(),
        ceiling = config.ceiling_workers,
        ramp_rate = config.ramp_rate_per_second,
        budget_secs = config.time_budget.as_secs_f64(),
        "run started"
    );

    let started = Instant::now();
    let mut ticker = tokio::time::interval(config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut workers = JoinSet::new();
    let mut harvest = Harvest::default();
    let mut next_index = 0usize;

    let reason = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shared.wake.notified() => {}
            _ = shared.stop.wait() => {}
        }

        while let Some(joined) = workers.try_join_next() {
            harvest.take(joined);
        }
        if harvest.fatal.is_some() || shared.stop.is_triggered() {
            break StopReason::Cancelled;
        }

        let tick = controller.tick(
            started.elapsed(),
            shared.queue.is_exhausted(),
            shared.busy.load(Ordering::SeqCst),
        );
        match tick {
            Tick::Stop(reason) => break reason,
            Tick::Run {
                target_workers,
                spawn_rate,
            } => {
                shared.target.store(target_workers, Ordering::SeqCst);
                // `target_workers` already follows the ramp, so the pool is
                // topped up to it in one go.
                while shared.alive.load(Ordering::SeqCst) < target_workers
                    && !shared.queue.is_exhausted()
                {
                    shared.alive.fetch_add(1, Ordering::SeqCst);
                    workers.spawn(worker::run(Arc::clone(&shared), next_index));
                    next_index += 1;
                }
                debug!(
                    target_workers,
                    spawn_rate,
                    alive = shared.alive.load(Ordering::SeqCst),
                    "tick"
                );
            }
        }

        progress.observe(&shared.collector.snapshot());
    };

    shared.stop.trigger();
    info!(
        %reason,
        in_flight = shared.busy.load(Ordering::SeqCst),
        "stopping, draining in-flight items"
    );

    while let Some(joined) = workers.join_next().await {
        harvest.take(joined);
    }

    if let Some(e) = harvest.fatal {
        warn!(error = %e, "run aborted");
        return Err(e);
    }

    let mut reports = harvest.reports;
    reports.sort_by_key(|r| r.index);
    let stats = shared.collector.snapshot();
    info!(
        %reason,
        processed = stats.total_processed,
        failed = stats.failed,
        requests = stats.total_requests,
        "run finished"
    );

    Ok(RunReport {
        reason,
        stats,
        workers: reports,
        captured: shared.collector.captured(),
    })
}
