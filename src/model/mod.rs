//! Persisted record types.
//!
//! Three stores back the hosting core: queue messages, resource locks, and
//! scheduled tasks. All three are owned exclusively by this crate; business
//! modules only ever see the typed payload via dispatch.

pub mod lease;
pub mod message;
pub mod task;

pub use lease::Lease;
pub use message::{MessageState, QueueMessage};
pub use task::{NewScheduledTask, ScheduledTask, TaskStatus};
