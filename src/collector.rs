//! Thread-safe aggregation of request and item outcomes.
//!
//! The only writer of [`AggregateStats`]. Every mutation is a short critical
//! section; callers never hold the lock across an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram};

use crate::error::{Error, Result};
use crate::model::{AggregateStats, Captured, OperationOutcome, WorkItem};
use crate::telemetry::metrics;

#[derive(Debug, Default)]
struct Inner {
    stats: AggregateStats,
    outcomes: HashMap<String, OperationOutcome>,
    captured: Vec<Captured>,
}

struct Instruments {
    requests: Counter<u64>,
    duration: Histogram<f64>,
    items: Counter<u64>,
    claims: Counter<u64>,
}

pub struct ResultCollector {
    inner: Mutex<Inner>,
    started: Instant,
    instruments: Instruments,
}

impl std::fmt::Debug for ResultCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCollector")
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl ResultCollector {
    /// Create a collector for a source of `total_items` distinct keys.
    pub fn new(total_items: usize) -> Self {
        let inner = Inner {
            stats: AggregateStats {
                total_items: total_items as u64,
                ..AggregateStats::default()
            },
            ..Inner::default()
        };
        Self {
            inner: Mutex::new(inner),
            started: Instant::now(),
            instruments: Instruments {
                requests: metrics::requests(),
                duration: metrics::request_duration_ms(),
                items: metrics::items(),
                claims: metrics::claims(),
            },
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count an item handed to a worker.
    pub fn record_claim(&self) {
        {
            let mut inner = self.inner();
            inner.stats.claimed += 1;
            inner.stats.in_flight += 1;
        }
        self.instruments.claims.add(1, &[KeyValue::new("result", "claimed")]);
    }

    /// Record one call of a sequence step.
    pub fn record_request(&self, stage: &str, latency: Duration, ok: bool) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        {
            let mut inner = self.inner();
            inner.stats.total_requests += 1;
            if !ok {
                inner.stats.total_failures += 1;
            }
            inner
                .stats
                .stages
                .entry(stage.to_string())
                .or_default()
                .record(latency_ms, ok);
        }

        let result = if ok { "ok" } else { "error" };
        self.instruments.requests.add(
            1,
            &[
                KeyValue::new("stage", stage.to_string()),
                KeyValue::new("result", result),
            ],
        );
        self.instruments
            .duration
            .record(latency_ms, &[KeyValue::new("stage", stage.to_string())]);
    }

    /// Record the outcome of one item.
    ///
    /// A second success or failure for the same key is a
    /// [`Error::ClaimConflict`]; skipped re-deliveries are only counted.
    pub fn record_outcome(&self, key: &str, outcome: &OperationOutcome) -> Result<()> {
        let label = {
            let mut inner = self.inner();
            match outcome {
                OperationOutcome::Skipped => {
                    inner.stats.skipped += 1;
                    "skipped"
                }
                OperationOutcome::Success | OperationOutcome::Failure { .. } => {
                    if inner.outcomes.contains_key(key) {
                        return Err(Error::ClaimConflict {
                            key: key.to_string(),
                            detail: "outcome recorded twice".to_string(),
                        });
                    }
                    inner.outcomes.insert(key.to_string(), outcome.clone());
                    inner.stats.in_flight = inner.stats.in_flight.saturating_sub(1);
                    inner.stats.total_processed += 1;
                    if outcome.is_success() {
                        inner.stats.succeeded += 1;
                        "success"
                    } else {
                        inner.stats.failed += 1;
                        "failure"
                    }
                }
            }
        };
        self.instruments.items.add(1, &[KeyValue::new("result", label)]);
        Ok(())
    }

    /// Keep a value extracted from a response, along with the item's payload.
    pub fn capture(&self, item: &WorkItem, value: serde_json::Value) {
        self.inner().captured.push(Captured {
            key: item.key.clone(),
            value,
            payload: item.payload.clone(),
            captured_at: Utc::now(),
        });
    }

    /// Consistent point-in-time copy of the counters.
    pub fn snapshot(&self) -> AggregateStats {
        let mut stats = self.inner().stats.clone();
        stats.elapsed_ms = self.started.elapsed().as_millis() as u64;
        stats
    }

    /// Every key with a recorded success or failure.
    pub fn processed_keys(&self) -> HashSet<String> {
        self.inner().outcomes.keys().cloned().collect()
    }

    /// Outcome recorded for `key`, if it has finished.
    pub fn outcome(&self, key: &str) -> Option<OperationOutcome> {
        self.inner().outcomes.get(key).cloned()
    }

    pub fn captured(&self) -> Vec<Captured> {
        self.inner().captured.clone()
    }
}
