//! Metric instrument factories for taskhost.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"taskhost"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for taskhost instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("taskhost")
}

/// Counter: queue-level operations (enqueue, dequeue, requeue).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("taskhost.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: dequeue claims rejected by a stale concurrency token.
/// Labels: `queue`.
pub fn dequeue_conflicts() -> Counter<u64> {
    meter()
        .u64_counter("taskhost.queue.dequeue_conflicts")
        .with_description("Dequeue claims lost to a concurrent worker")
        .build()
}

/// Counter: messages quarantined past the poison threshold.
/// Labels: `queue`.
pub fn messages_poisoned() -> Counter<u64> {
    meter()
        .u64_counter("taskhost.queue.messages_poisoned")
        .with_description("Messages marked poison after exhausting retries")
        .build()
}

/// Counter: lock acquisition attempts.
/// Labels: `result` ("acquired" | "contended").
pub fn lock_acquisitions() -> Counter<u64> {
    meter()
        .u64_counter("taskhost.lock.acquisitions")
        .with_description("Lock acquisition attempts")
        .build()
}

/// Counter: scheduled task runs.
/// Labels: `status` ("completed" | "faulted").
pub fn task_runs() -> Counter<u64> {
    meter()
        .u64_counter("taskhost.task.runs")
        .with_description("Scheduled task runs")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("taskhost.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
