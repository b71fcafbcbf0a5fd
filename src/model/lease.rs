//! Lease model.
//!
//! A lease is a time-bounded, uniquely-named ownership claim stored as a
//! database row. The row's existence is the lock; the lease id doubles as
//! the caller's proof of ownership for renew and release.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A held lock on a named resource.
#[derive(Debug, Clone)]
pub struct Lease {
    /// Lease identifier, generated at acquisition. Proof of ownership.
    pub id: Uuid,

    /// The resource being protected. Unique while a live lease exists.
    pub name: String,

    /// Absolute time after which the lease is considered abandoned and
    /// becomes eligible for reclamation by any caller's cleanup pass.
    pub expires_at: DateTime<Utc>,

    /// The renewal window. Each successful renew pushes `expires_at` to
    /// now + duration.
    pub duration: Duration,
}
