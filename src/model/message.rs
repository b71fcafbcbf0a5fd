//! Queue message model.
//!
//! A queue message is one row per enqueued unit of work: an opaque serialized
//! payload plus the metadata the queue needs to claim it safely under
//! concurrency. The payload stays serialized until a consumer asks for it.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Queue Message
// ---------------------------------------------------------------------------

/// One enqueued unit of work.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Unique identifier, generated at enqueue time. Immutable.
    pub id: Uuid,

    /// Logical partition (topic). Derived from the payload type by the typed
    /// enqueue path; no ordering guarantee crosses partitions.
    pub queue_name: String,

    /// Serialized JSON body. Deserialize lazily with [`Self::payload_as`].
    pub payload: String,

    pub enqueued_at: DateTime<Utc>,

    /// Incremented every time a worker successfully claims the row. Drives
    /// poison detection.
    pub dequeue_count: i64,

    /// Rotated on every update. A claim conditioned on a stale token affects
    /// zero rows, which is how a lost race is observed.
    pub concurrency_token: Uuid,

    pub state: MessageState,
}

impl QueueMessage {
    /// Deserialize the payload into its typed form.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageState {
    /// Eligible for dequeue.
    New,
    /// Claimed by a worker; eligible for cleanup once stale.
    Dequeued,
    /// Permanently failed. Excluded from processing, retained for inspection.
    Poison,
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageState::New => "new",
            MessageState::Dequeued => "dequeued",
            MessageState::Poison => "poison",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MessageState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(MessageState::New),
            "dequeued" => Ok(MessageState::Dequeued),
            "poison" => Ok(MessageState::Poison),
            _ => Err(Error::Other(format!("unknown message state: {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_text() {
        for state in [MessageState::New, MessageState::Dequeued, MessageState::Poison] {
            let parsed: MessageState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn unknown_state_is_rejected() {
        assert!("claimed".parse::<MessageState>().is_err());
    }

    #[test]
    fn payload_deserializes_lazily() {
        let msg = QueueMessage {
            id: Uuid::new_v4(),
            queue_name: "greetings".to_string(),
            payload: r#""hello""#.to_string(),
            enqueued_at: Utc::now(),
            dequeue_count: 0,
            concurrency_token: Uuid::new_v4(),
            state: MessageState::New,
        };
        let body: String = msg.payload_as().unwrap();
        assert_eq!(body, "hello");
    }
}
