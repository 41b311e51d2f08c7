//! Core data model.
//!
//! A work item is one row of the work source: an opaque key plus optional
//! payload. Each claimed item yields exactly one outcome, and outcomes roll up
//! into aggregate statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of work handed to exactly one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Identity of the item (e.g. a user ID). Must be unique per run.
    pub key: String,

    /// Arbitrary data for payload templates. The engine doesn't interpret it.
    pub payload: Option<serde_json::Value>,
}

impl WorkItem {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

// ---------------------------------------------------------------------------
// Claim Record
// ---------------------------------------------------------------------------

/// Claim state of a single key.
///
/// `claimed` flips false -> true exactly once; `completed` flips at most once
/// and only after `claimed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claimed: bool,
    pub completed: bool,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of processing one claimed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Every step in the sequence met its expected status.
    Success,
    /// At least one step failed. `stage` is the first failing step.
    Failure { stage: String, reason: String },
    /// The key was re-delivered and rejected by the dedup tracker.
    Skipped,
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success)
    }
}

impl std::fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationOutcome::Success => write!(f, "success"),
            OperationOutcome::Failure { stage, reason } => write!(f, "failure at {stage}: {reason}"),
            OperationOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

// ---------------------------------------------------------------------------
// Captured values
// ---------------------------------------------------------------------------

/// A value extracted from a step response, e.g. the ID of a created record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Captured {
    pub key: String,
    pub value: serde_json::Value,
    /// Payload of the item the value was captured for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub captured_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Request counters and latency for one named stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageStats {
    pub requests: u64,
    pub failures: u64,
    pub total_latency_ms: f64,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
}

impl StageStats {
    pub fn record(&mut self, latency_ms: f64, ok: bool) {
        self.requests += 1;
        if !ok {
            self.failures += 1;
        }
        self.total_latency_ms += latency_ms;
        self.min_latency_ms = Some(self.min_latency_ms.map_or(latency_ms, |m| m.min(latency_ms)));
        self.max_latency_ms = Some(self.max_latency_ms.map_or(latency_ms, |m| m.max(latency_ms)));
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_latency_ms / self.requests as f64
        }
    }
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Distinct keys in the work source.
    pub total_items: u64,
    /// Items handed to a worker.
    pub claimed: u64,
    /// Claimed items whose sequence has not finished yet.
    pub in_flight: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Re-delivered keys rejected by the dedup tracker.
    pub skipped: u64,
    /// Items with a recorded success or failure.
    pub total_processed: u64,
    pub total_requests: u64,
    pub total_failures: u64,
    /// Per-stage request stats, keyed by step name.
    pub stages: BTreeMap<String, StageStats>,
    pub elapsed_ms: u64,
}

impl AggregateStats {
    pub fn avg_latency_ms(&self) -> f64 {
        let (total, count) = self
            .stages
            .values()
            .fold((0.0, 0u64), |(t, c), s| (t + s.total_latency_ms, c + s.requests));
        if count == 0 { 0.0 } else { total / count as f64 }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_processed == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total_processed as f64 * 100.0
        }
    }

    pub fn items_per_sec(&self) -> f64 {
        per_sec(self.total_processed, self.elapsed_ms)
    }

    pub fn requests_per_sec(&self) -> f64 {
        per_sec(self.total_requests, self.elapsed_ms)
    }
}

fn per_sec(count: u64, elapsed_ms: u64) -> f64 {
    if elapsed_ms == 0 {
        0.0
    } else {
        count as f64 / (elapsed_ms as f64 / 1000.0)
    }
}
