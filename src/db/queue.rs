//! Work queue operations: enqueue, optimistic dequeue, peek, cleanup.
//!
//! Dequeue never holds a database lock across the read-decide-write window.
//! It reads the oldest candidate, then writes the claim conditioned on the
//! concurrency token observed at read time; a rejected write means another
//! worker won the race and the cycle repeats against the next candidate.

use opentelemetry::KeyValue;
use tracing::trace;
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::dispatch::Job;
use crate::error::{Error, Result};
use crate::model::{MessageState, QueueMessage};
use crate::telemetry::metrics;

use super::millis_to_datetime;

impl super::Db {
    /// Insert a new message into a partition. Single row write; never
    /// blocks other partitions.
    pub async fn enqueue_message(&self, queue_name: &str, payload: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let token = Uuid::new_v4();
        let now = self.now();

        sqlx::query(self.catalog().queue_insert)
            .bind(id.to_string())
            .bind(queue_name)
            .bind(payload)
            .bind(now.timestamp_millis())
            .bind(token.to_string())
            .execute(self.pool())
            .await?;

        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", queue_name.to_string()),
                KeyValue::new("operation", "enqueue"),
            ],
        );
        Ok(id)
    }

    /// Serialize a typed job and enqueue it on the partition named by its
    /// job type.
    pub async fn enqueue_job<J: Job>(&self, job: &J) -> Result<Uuid> {
        let payload = serde_json::to_string(job)?;
        self.enqueue_message(J::JOB_TYPE, &payload).await
    }

    /// Claim the oldest eligible message in a partition.
    ///
    /// Returns `None` once no eligible rows remain, or immediately if the
    /// token is cancelled. A claim conflict is not an error; it re-runs the
    /// read-then-claim cycle against the next candidate, so the loop is
    /// bounded by rows remaining to try rather than by time.
    pub async fn dequeue_message(
        &self,
        queue_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<QueueMessage>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let Some(candidate) = self.fetch_next(queue_name).await? else {
                return Ok(None);
            };

            let new_token = Uuid::new_v4();
            let claimed = sqlx::query(self.catalog().queue_claim)
                .bind(new_token.to_string())
                .bind(candidate.id.to_string())
                .bind(candidate.concurrency_token.to_string())
                .execute(self.pool())
                .await?
                .rows_affected();

            if claimed == 1 {
                metrics::queue_operations().add(
                    1,
                    &[
                        KeyValue::new("queue", queue_name.to_string()),
                        KeyValue::new("operation", "dequeue"),
                    ],
                );
                return Ok(Some(QueueMessage {
                    dequeue_count: candidate.dequeue_count + 1,
                    concurrency_token: new_token,
                    state: MessageState::Dequeued,
                    ..candidate
                }));
            }

            // Lost the race — the token moved under us. Try the next row.
            trace!(queue = queue_name, id = %candidate.id, "dequeue conflict, retrying");
            metrics::dequeue_conflicts().add(1, &[KeyValue::new("queue", queue_name.to_string())]);
        }
    }

    /// Read-only view of the next eligible message. Never mutates state.
    pub async fn peek_message(&self, queue_name: &str) -> Result<Option<QueueMessage>> {
        self.fetch_next(queue_name).await
    }

    /// Number of messages still eligible for dequeue in a partition.
    pub async fn queue_count(&self, queue_name: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(self.catalog().queue_count)
            .bind(queue_name)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// Put a previously dequeued message back into circulation. Conditioned
    /// on the caller's token; the dequeue count is preserved for poison
    /// detection.
    pub async fn requeue_message(&self, msg: &QueueMessage) -> Result<()> {
        self.rewrite_state(msg, self.catalog().queue_requeue).await?;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", msg.queue_name.clone()),
                KeyValue::new("operation", "requeue"),
            ],
        );
        Ok(())
    }

    /// Quarantine a message that exhausted its retries. The row is excluded
    /// from dequeue but retained for inspection.
    pub async fn mark_poison(&self, msg: &QueueMessage) -> Result<()> {
        self.rewrite_state(msg, self.catalog().queue_mark_poison).await?;
        metrics::messages_poisoned().add(1, &[KeyValue::new("queue", msg.queue_name.clone())]);
        Ok(())
    }

    /// Remove a successfully handled message.
    pub async fn delete_message(&self, id: Uuid) -> Result<()> {
        sqlx::query(self.catalog().queue_delete)
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Delete the oldest `batch_size` rows left in terminal dequeued state,
    /// bounding table growth. Returns the number deleted.
    pub async fn cleanup_queue(&self, batch_size: i64) -> Result<u64> {
        let deleted = sqlx::query(self.catalog().queue_cleanup)
            .bind(batch_size)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(deleted)
    }

    async fn fetch_next(&self, queue_name: &str) -> Result<Option<QueueMessage>> {
        let row: Option<MessageRow> = sqlx::query_as(self.catalog().queue_select_next)
            .bind(queue_name)
            .fetch_optional(self.pool())
            .await?;
        row.map(MessageRow::try_into_message).transpose()
    }

    /// Token-conditioned single-row state rewrite with a fresh token.
    async fn rewrite_state(&self, msg: &QueueMessage, sql: &str) -> Result<()> {
        let rows = sqlx::query(sql)
            .bind(Uuid::new_v4().to_string())
            .bind(msg.id.to_string())
            .bind(msg.concurrency_token.to_string())
            .execute(self.pool())
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(Error::NotFound(format!("queue message {}", msg.id)));
        }
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    queue_name: String,
    payload: String,
    enqueued_at: i64,
    dequeue_count: i64,
    concurrency_token: String,
    state: String,
}

impl MessageRow {
    fn try_into_message(self) -> Result<QueueMessage> {
        Ok(QueueMessage {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| Error::Other(format!("bad message id: {e}")))?,
            queue_name: self.queue_name,
            payload: self.payload,
            enqueued_at: millis_to_datetime(self.enqueued_at),
            dequeue_count: self.dequeue_count,
            concurrency_token: Uuid::parse_str(&self.concurrency_token)
                .map_err(|e| Error::Other(format!("bad concurrency token: {e}")))?,
            state: self.state.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::cancel::CancellationToken;
    use crate::db::Db;
    use crate::error::Error;
    use crate::model::MessageState;

    async fn test_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn requeue_rotates_the_concurrency_token() {
        let db = test_db().await;
        let cancel = CancellationToken::new();

        db.enqueue_message("emails", r#"{"to":"a"}"#).await.unwrap();
        let msg = db.dequeue_message("emails", &cancel).await.unwrap().unwrap();

        // First requeue carries the token handed out by the claim.
        db.requeue_message(&msg).await.unwrap();

        // The same (now stale) token must be rejected.
        let err = db.requeue_message(&msg).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn dequeued_message_carries_incremented_count_and_new_token() {
        let db = test_db().await;
        let cancel = CancellationToken::new();

        db.enqueue_message("emails", r#"{"to":"a"}"#).await.unwrap();
        let before = db.peek_message("emails").await.unwrap().unwrap();
        let after = db.dequeue_message("emails", &cancel).await.unwrap().unwrap();

        assert_eq!(after.id, before.id);
        assert_eq!(after.dequeue_count, before.dequeue_count + 1);
        assert_ne!(after.concurrency_token, before.concurrency_token);
        assert_eq!(after.state, MessageState::Dequeued);
    }

    #[tokio::test]
    async fn cancelled_dequeue_leaves_the_row_untouched() {
        let db = test_db().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        db.enqueue_message("emails", r#"{"to":"a"}"#).await.unwrap();
        let got = db.dequeue_message("emails", &cancel).await.unwrap();
        assert!(got.is_none());
        assert_eq!(db.queue_count("emails").await.unwrap(), 1);
    }
}
