//! Relational lock manager: acquire, renew, release, cleanup.
//!
//! A lease is a database row rather than an in-memory mutex, so mutual
//! exclusion works across independent processes with only the store as
//! shared state. The uniqueness constraint on the resource name arbitrates
//! acquisition; the expiration column guarantees forward progress when a
//! holder crashes without releasing.

use std::time::Duration;

use chrono::TimeDelta;
use opentelemetry::KeyValue;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::Lease;
use crate::telemetry::metrics;

/// Lease window applied when the caller does not choose one.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

impl super::Db {
    /// Attempt to take a lease on `name` for `timeout`.
    ///
    /// A uniqueness violation means another live lease holds the name. In
    /// that case a cleanup pass runs (so an expired holder is reclaimed) and
    /// a typed [`Error::LockNotAcquired`] is returned — the acquisition is
    /// not retried here; the caller decides whether to poll again.
    pub async fn acquire_lock(&self, name: &str, timeout: Duration) -> Result<Lease> {
        let id = Uuid::new_v4();
        let now = self.now();
        let expires_at = now + TimeDelta::milliseconds(timeout.as_millis() as i64);

        let inserted = sqlx::query(self.catalog().lock_insert)
            .bind(name)
            .bind(id.to_string())
            .bind(expires_at.timestamp_millis())
            .bind(timeout.as_secs() as i64)
            .execute(self.pool())
            .await;

        match inserted {
            Ok(_) => {
                metrics::lock_acquisitions().add(1, &[KeyValue::new("result", "acquired")]);
                Ok(Lease {
                    id,
                    name: name.to_string(),
                    expires_at,
                    duration: timeout,
                })
            }
            Err(e) if is_unique_violation(&e) => {
                debug!(name, "lock contended");
                if let Err(cleanup_err) = self.cleanup_locks().await {
                    warn!(name, error = %cleanup_err, "lock cleanup after contention failed");
                }
                metrics::lock_acquisitions().add(1, &[KeyValue::new("result", "contended")]);
                Err(Error::LockNotAcquired {
                    name: name.to_string(),
                })
            }
            Err(e) => {
                // Genuine storage failure: best-effort cleanup, then propagate.
                let _ = self.cleanup_locks().await;
                Err(e.into())
            }
        }
    }

    /// Extend a held lease by its duration.
    ///
    /// Zero rows affected means the lease expired and was reclaimed, or was
    /// never held: the caller has lost ownership and must not continue
    /// privileged work. On success the lease's `expires_at` is updated in
    /// place.
    pub async fn renew_lock(&self, lease: &mut Lease) -> Result<()> {
        let expires_at =
            self.now() + TimeDelta::milliseconds(lease.duration.as_millis() as i64);

        let renewed = sqlx::query(self.catalog().lock_renew)
            .bind(expires_at.timestamp_millis())
            .bind(&lease.name)
            .bind(lease.id.to_string())
            .execute(self.pool())
            .await;

        match renewed {
            Ok(result) if result.rows_affected() == 0 => Err(Error::LeaseLost {
                name: lease.name.clone(),
            }),
            Ok(_) => {
                lease.expires_at = expires_at;
                Ok(())
            }
            Err(e) => {
                let _ = self.cleanup_locks().await;
                Err(e.into())
            }
        }
    }

    /// Give up a lease.
    ///
    /// Deletes the row for the name only where this lease still owns it or
    /// the row has already expired — if a new holder acquired the name after
    /// this lease lapsed, their live row is left alone. Zero rows affected
    /// is reported as [`Error::LeaseLost`].
    pub async fn release_lock(&self, lease: &Lease) -> Result<()> {
        let released = sqlx::query(self.catalog().lock_release)
            .bind(&lease.name)
            .bind(lease.id.to_string())
            .bind(self.now().timestamp_millis())
            .execute(self.pool())
            .await?
            .rows_affected();

        if released == 0 {
            return Err(Error::LeaseLost {
                name: lease.name.clone(),
            });
        }
        Ok(())
    }

    /// Delete every lease whose expiration has passed. Safe to call at any
    /// time, by any caller; idempotent. Returns the number reclaimed.
    pub async fn cleanup_locks(&self) -> Result<u64> {
        let reclaimed = sqlx::query(self.catalog().lock_cleanup)
            .bind(self.now().timestamp_millis())
            .execute(self.pool())
            .await?
            .rows_affected();

        if reclaimed > 0 {
            debug!(reclaimed, "reclaimed expired leases");
        }
        Ok(reclaimed)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
