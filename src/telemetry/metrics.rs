//! Metric instrument factories.
//!
//! Instruments come from the `"seqload"` meter of the globally registered
//! `MeterProvider`; without one they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("seqload")
}

/// Counter: sequence step calls.
/// Labels: `stage`, `result` ("ok" | "error").
pub fn requests() -> Counter<u64> {
    meter()
        .u64_counter("seqload.requests")
        .with_description("Number of sequence step calls")
        .build()
}

/// Histogram: step latency in milliseconds.
/// Labels: `stage`.
pub fn request_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("seqload.request.duration_ms")
        .with_description("Sequence step latency in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: finished work items.
/// Labels: `result` ("success" | "failure" | "skipped").
pub fn items() -> Counter<u64> {
    meter()
        .u64_counter("seqload.items")
        .with_description("Number of work items by outcome")
        .build()
}

/// Counter: items handed to workers.
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("seqload.claims")
        .with_description("Number of work items claimed by workers")
        .build()
}
