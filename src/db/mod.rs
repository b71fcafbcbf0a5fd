//! Database connection pool, schema bootstrap, and health check.
//!
//! One `Db` handle owns the shared `AnyPool` used by the queue, lock, and
//! scheduled task stores. The dialect is resolved once from the connection
//! URL; all vendor-specific SQL lives in the dialect catalog.

pub mod dialect;
pub mod lock;
pub mod queue;
pub mod tasks;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use dialect::{Dialect, SqlCatalog};

/// Database handle. Owns the connection pool shared across all stores.
pub struct Db {
    pool: AnyPool,
    dialect: Dialect,
    catalog: &'static SqlCatalog,
    clock: Arc<dyn Clock>,
}

impl Db {
    /// Connect with the system clock.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_clock(url, Arc::new(SystemClock)).await
    }

    /// Connect with an injected clock. Lease expiry and enqueue ordering
    /// compare against this clock's notion of now.
    pub async fn connect_with_clock(url: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let dialect = Dialect::from_url(url)?;

        // An in-memory SQLite database exists per connection, so the pool
        // must stay at a single connection to see one database.
        let max_connections = if url.contains(":memory:") { 1 } else { 10 };

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(Self {
            pool,
            dialect,
            catalog: dialect.catalog(),
            clock,
        })
    }

    /// Create the schema if it does not exist. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(self.catalog.schema).execute(&self.pool).await?;
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The current time per the injected clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    pub(crate) fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub(crate) fn catalog(&self) -> &'static SqlCatalog {
        self.catalog
    }
}

/// Unix epoch milliseconds back to a timestamp. Stored values are written
/// by this crate, so out-of-range is unreachable short of row corruption.
pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
