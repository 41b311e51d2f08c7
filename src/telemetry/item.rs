//! Span helpers for work items moving through a worker.

use tracing::Span;

/// Start a span covering one item's operation sequence.
///
/// `item.outcome` is declared empty and filled by [`record_outcome`].
pub fn start_item_span(key: &str, worker: usize) -> Span {
    tracing::info_span!(
        "item.process",
        "item.key" = key,
        "worker.index" = worker,
        "item.outcome" = tracing::field::Empty,
    )
}

/// Emit a stage completion event scoped to the item span.
pub fn record_stage(span: &Span, stage: &str, ok: bool, latency_ms: f64) {
    span.in_scope(|| {
        tracing::debug!(stage, ok, latency_ms, "stage finished");
    });
}

/// Record the final outcome label on the item span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("item.outcome", outcome);
}
