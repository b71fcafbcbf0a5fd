//! Worker loop: poll the queue, dispatch claimed messages, retire them.
//!
//! Each worker is an independent long-running loop; workers coordinate only
//! through the store. A single message's failure never halts the loop —
//! handler errors requeue or poison the row, and storage errors back off
//! for one poll interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::{Instrument, debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::db::Db;
use crate::dispatch::HandlerRegistry;
use crate::error::Result;
use crate::model::QueueMessage;
use crate::telemetry::job::{record_outcome, start_job_span};
use crate::telemetry::metrics;

/// Worker tuning.
///
/// The poison threshold has no default: how many failed deliveries a
/// message survives before quarantine is the host's policy decision.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when every partition came up empty.
    pub poll_interval: Duration,

    /// A message whose dequeue count has reached this value when its handler
    /// fails is marked poison instead of being requeued.
    pub poison_threshold: i64,

    /// Stop once every registered partition is empty. Batch-host and test
    /// use; daemons keep polling.
    pub shutdown_when_empty: bool,
}

impl WorkerConfig {
    pub fn new(poison_threshold: i64) -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            poison_threshold,
            shutdown_when_empty: false,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn shutdown_when_empty(mut self) -> Self {
        self.shutdown_when_empty = true;
        self
    }
}

/// The queue poll loop.
pub struct Worker<Context> {
    db: Arc<Db>,
    registry: Arc<HandlerRegistry<Context>>,
    context: Context,
    config: WorkerConfig,
    cancel: CancellationToken,
}

impl<Context: Clone + Send + Sync + 'static> Worker<Context> {
    pub fn new(
        db: Arc<Db>,
        registry: Arc<HandlerRegistry<Context>>,
        context: Context,
        config: WorkerConfig,
    ) -> Self {
        Self {
            db,
            registry,
            context,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// A handle for stopping this worker from outside the loop.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled, or until the queue drains if
    /// `shutdown_when_empty` is set.
    pub async fn run(&self) {
        info!(queues = ?self.registry.job_types(), "worker started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.poll_once().await {
                Ok(true) => {} // processed something; look again immediately
                Ok(false) if self.config.shutdown_when_empty => {
                    debug!("queue empty, shutting worker down");
                    break;
                }
                Ok(false) => self.idle().await,
                Err(e) => {
                    error!(error = %e, "worker poll failed");
                    self.idle().await;
                }
            }
        }

        info!("worker stopped");
    }

    /// Try each registered partition once. Returns whether any message was
    /// processed. Only storage and configuration errors propagate; handler
    /// failures are retired in place.
    async fn poll_once(&self) -> Result<bool> {
        let mut processed = false;

        for queue_name in self.registry.job_types() {
            if self.cancel.is_cancelled() {
                break;
            }

            if let Some(msg) = self.db.dequeue_message(&queue_name, &self.cancel).await? {
                self.process_message(msg).await?;
                processed = true;
            }
        }

        Ok(processed)
    }

    async fn process_message(&self, msg: QueueMessage) -> Result<()> {
        let span = start_job_span(&msg.queue_name, &msg.id);

        async {
            let started = Instant::now();
            let payload: anyhow::Result<serde_json::Value> =
                serde_json::from_str(&msg.payload).map_err(Into::into);

            // A payload that does not parse counts as a handler failure and
            // flows into the requeue/poison path.
            let outcome = match payload {
                Ok(value) => {
                    self.registry
                        .dispatch(&msg.queue_name, self.context.clone(), value)
                        .await?
                }
                Err(e) => Err(e),
            };

            metrics::operation_duration_ms().record(
                started.elapsed().as_secs_f64() * 1000.0,
                &[KeyValue::new("operation", "job.execute")],
            );

            match outcome {
                Ok(()) => {
                    record_outcome(&tracing::Span::current(), "completed");
                    self.db.delete_message(msg.id).await?;
                }
                Err(handler_err) => {
                    warn!(id = %msg.id, error = %format!("{handler_err:#}"), "job failed");
                    if msg.dequeue_count >= self.config.poison_threshold {
                        record_outcome(&tracing::Span::current(), "poisoned");
                        self.db.mark_poison(&msg).await?;
                    } else {
                        record_outcome(&tracing::Span::current(), "requeued");
                        self.db.requeue_message(&msg).await?;
                    }
                }
            }

            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }
}
