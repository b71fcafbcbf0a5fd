//! Job execution span helpers.
//!
//! Provides span creation and outcome recording for messages flowing
//! through the worker loop.

use tracing::Span;
use uuid::Uuid;

/// Start a span for job execution.
///
/// The `job.outcome` field is declared empty and can be updated via
/// [`record_outcome`].
pub fn start_job_span(queue: &str, message_id: &Uuid) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.queue" = queue,
        "job.message_id" = %message_id,
        "job.outcome" = tracing::field::Empty,
    )
}

/// Record the retirement outcome on the span.
///
/// Emits a tracing `info` event scoped to the given span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("job.outcome", outcome);
    span.in_scope(|| {
        tracing::info!(outcome = outcome, "job retired");
    });
}
