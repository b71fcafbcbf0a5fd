//! Dialect selection and the per-dialect SQL catalog.
//!
//! The coordination algorithms are dialect-agnostic; only literal SQL text
//! differs (placeholder syntax, serial columns, FIFO ordering column). Each
//! dialect supplies a complete catalog of statements, chosen once at
//! construction from the connection URL and never mutated afterward. Bind
//! order is identical across dialects for every statement.

use crate::error::{Error, Result};

/// The configured database backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Resolve the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        match url.split(':').next().unwrap_or_default() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(Error::Config(format!(
                "unsupported database url scheme '{other}' (expected postgres or sqlite)"
            ))),
        }
    }

    pub(crate) fn catalog(self) -> &'static SqlCatalog {
        match self {
            Dialect::Postgres => &POSTGRES,
            Dialect::Sqlite => &SQLITE,
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Vendor-specific SQL text for every operation the core performs.
pub(crate) struct SqlCatalog {
    /// Idempotent DDL batch run by `Db::migrate`.
    pub schema: &'static str,

    // Queue record store
    pub queue_insert: &'static str,
    pub queue_select_next: &'static str,
    pub queue_claim: &'static str,
    pub queue_requeue: &'static str,
    pub queue_mark_poison: &'static str,
    pub queue_delete: &'static str,
    pub queue_count: &'static str,
    pub queue_cleanup: &'static str,

    // Lock store
    pub lock_insert: &'static str,
    pub lock_renew: &'static str,
    pub lock_release: &'static str,
    pub lock_cleanup: &'static str,

    // Scheduled task store
    pub task_insert: &'static str,
    pub task_select: &'static str,
    pub task_select_all: &'static str,
    pub task_select_due: &'static str,
    pub task_begin: &'static str,
    pub task_complete: &'static str,
    pub task_fail: &'static str,
    pub task_progress: &'static str,
}

static POSTGRES: SqlCatalog = SqlCatalog {
    schema: "
        CREATE TABLE IF NOT EXISTS queue_messages (
            id                TEXT PRIMARY KEY,
            seq               BIGSERIAL,
            queue_name        TEXT NOT NULL,
            payload           TEXT NOT NULL,
            enqueued_at       BIGINT NOT NULL,
            dequeue_count     BIGINT NOT NULL DEFAULT 0,
            concurrency_token TEXT NOT NULL,
            state             TEXT NOT NULL DEFAULT 'new'
        );

        CREATE INDEX IF NOT EXISTS idx_queue_messages_new
            ON queue_messages (queue_name, seq) WHERE state = 'new';

        CREATE TABLE IF NOT EXISTS resource_locks (
            name          TEXT PRIMARY KEY,
            id            TEXT NOT NULL,
            expires_at    BIGINT NOT NULL,
            duration_secs BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS scheduled_tasks (
            id              TEXT PRIMARY KEY,
            worker_id       TEXT,
            task_group      TEXT NOT NULL DEFAULT '',
            description     TEXT NOT NULL DEFAULT '',
            task_type       TEXT NOT NULL,
            last_execution  BIGINT,
            next_execution  BIGINT,
            execution_count BIGINT NOT NULL DEFAULT 0,
            status          TEXT NOT NULL DEFAULT 'idle',
            errors          TEXT NOT NULL DEFAULT '',
            payload         TEXT NOT NULL DEFAULT 'null',
            progress        DOUBLE PRECISION NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_due
            ON scheduled_tasks (next_execution) WHERE next_execution IS NOT NULL;
        ",

    queue_insert: "INSERT INTO queue_messages \
         (id, queue_name, payload, enqueued_at, dequeue_count, concurrency_token, state) \
         VALUES ($1, $2, $3, $4, 0, $5, 'new')",
    queue_select_next: "SELECT id, queue_name, payload, enqueued_at, dequeue_count, concurrency_token, state \
         FROM queue_messages WHERE queue_name = $1 AND state = 'new' \
         ORDER BY seq ASC LIMIT 1",
    queue_claim: "UPDATE queue_messages \
         SET state = 'dequeued', dequeue_count = dequeue_count + 1, concurrency_token = $1 \
         WHERE id = $2 AND concurrency_token = $3",
    queue_requeue: "UPDATE queue_messages SET state = 'new', concurrency_token = $1 \
         WHERE id = $2 AND concurrency_token = $3",
    queue_mark_poison: "UPDATE queue_messages SET state = 'poison', concurrency_token = $1 \
         WHERE id = $2 AND concurrency_token = $3",
    queue_delete: "DELETE FROM queue_messages WHERE id = $1",
    queue_count: "SELECT COUNT(*) FROM queue_messages WHERE queue_name = $1 AND state = 'new'",
    queue_cleanup: "DELETE FROM queue_messages WHERE id IN \
         (SELECT id FROM queue_messages WHERE state = 'dequeued' ORDER BY seq ASC LIMIT $1)",

    lock_insert: "INSERT INTO resource_locks (name, id, expires_at, duration_secs) \
         VALUES ($1, $2, $3, $4)",
    lock_renew: "UPDATE resource_locks SET expires_at = $1 WHERE name = $2 AND id = $3",
    lock_release: "DELETE FROM resource_locks WHERE name = $1 AND (id = $2 OR expires_at <= $3)",
    lock_cleanup: "DELETE FROM resource_locks WHERE expires_at <= $1",

    task_insert: "INSERT INTO scheduled_tasks \
         (id, worker_id, task_group, description, task_type, last_execution, next_execution, \
          execution_count, status, errors, payload, progress) \
         VALUES ($1, NULL, $2, $3, $4, NULL, $5, 0, 'idle', '', $6, 0)",
    task_select: "SELECT id, worker_id, task_group, description, task_type, last_execution, \
          next_execution, execution_count, status, errors, payload, progress \
         FROM scheduled_tasks WHERE id = $1",
    task_select_all: "SELECT id, worker_id, task_group, description, task_type, last_execution, \
          next_execution, execution_count, status, errors, payload, progress \
         FROM scheduled_tasks ORDER BY id ASC",
    task_select_due: "SELECT id, worker_id, task_group, description, task_type, last_execution, \
          next_execution, execution_count, status, errors, payload, progress \
         FROM scheduled_tasks \
         WHERE next_execution IS NOT NULL AND next_execution <= $1 \
         ORDER BY next_execution ASC",
    task_begin: "UPDATE scheduled_tasks SET status = 'running', worker_id = $1, progress = 0 \
         WHERE id = $2",
    task_complete: "UPDATE scheduled_tasks SET status = 'completed', worker_id = NULL, \
          last_execution = $1, next_execution = $2, \
          execution_count = execution_count + 1, progress = 1.0 \
         WHERE id = $3",
    task_fail: "UPDATE scheduled_tasks SET status = 'faulted', worker_id = NULL, \
          last_execution = $1, next_execution = $2, \
          execution_count = execution_count + 1, errors = errors || $3 \
         WHERE id = $4",
    task_progress: "UPDATE scheduled_tasks SET progress = $1 WHERE id = $2",
};

// SQLite has no serial column; insertion order is the implicit rowid.
static SQLITE: SqlCatalog = SqlCatalog {
    schema: "
        CREATE TABLE IF NOT EXISTS queue_messages (
            id                TEXT PRIMARY KEY,
            queue_name        TEXT NOT NULL,
            payload           TEXT NOT NULL,
            enqueued_at       BIGINT NOT NULL,
            dequeue_count     BIGINT NOT NULL DEFAULT 0,
            concurrency_token TEXT NOT NULL,
            state             TEXT NOT NULL DEFAULT 'new'
        );

        CREATE INDEX IF NOT EXISTS idx_queue_messages_new
            ON queue_messages (queue_name) WHERE state = 'new';

        CREATE TABLE IF NOT EXISTS resource_locks (
            name          TEXT PRIMARY KEY,
            id            TEXT NOT NULL,
            expires_at    BIGINT NOT NULL,
            duration_secs BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS scheduled_tasks (
            id              TEXT PRIMARY KEY,
            worker_id       TEXT,
            task_group      TEXT NOT NULL DEFAULT '',
            description     TEXT NOT NULL DEFAULT '',
            task_type       TEXT NOT NULL,
            last_execution  BIGINT,
            next_execution  BIGINT,
            execution_count BIGINT NOT NULL DEFAULT 0,
            status          TEXT NOT NULL DEFAULT 'idle',
            errors          TEXT NOT NULL DEFAULT '',
            payload         TEXT NOT NULL DEFAULT 'null',
            progress        REAL NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_due
            ON scheduled_tasks (next_execution) WHERE next_execution IS NOT NULL;
        ",

    queue_insert: "INSERT INTO queue_messages \
         (id, queue_name, payload, enqueued_at, dequeue_count, concurrency_token, state) \
         VALUES (?1, ?2, ?3, ?4, 0, ?5, 'new')",
    queue_select_next: "SELECT id, queue_name, payload, enqueued_at, dequeue_count, concurrency_token, state \
         FROM queue_messages WHERE queue_name = ?1 AND state = 'new' \
         ORDER BY rowid ASC LIMIT 1",
    queue_claim: "UPDATE queue_messages \
         SET state = 'dequeued', dequeue_count = dequeue_count + 1, concurrency_token = ?1 \
         WHERE id = ?2 AND concurrency_token = ?3",
    queue_requeue: "UPDATE queue_messages SET state = 'new', concurrency_token = ?1 \
         WHERE id = ?2 AND concurrency_token = ?3",
    queue_mark_poison: "UPDATE queue_messages SET state = 'poison', concurrency_token = ?1 \
         WHERE id = ?2 AND concurrency_token = ?3",
    queue_delete: "DELETE FROM queue_messages WHERE id = ?1",
    queue_count: "SELECT COUNT(*) FROM queue_messages WHERE queue_name = ?1 AND state = 'new'",
    queue_cleanup: "DELETE FROM queue_messages WHERE id IN \
         (SELECT id FROM queue_messages WHERE state = 'dequeued' ORDER BY rowid ASC LIMIT ?1)",

    lock_insert: "INSERT INTO resource_locks (name, id, expires_at, duration_secs) \
         VALUES (?1, ?2, ?3, ?4)",
    lock_renew: "UPDATE resource_locks SET expires_at = ?1 WHERE name = ?2 AND id = ?3",
    lock_release: "DELETE FROM resource_locks WHERE name = ?1 AND (id = ?2 OR expires_at <= ?3)",
    lock_cleanup: "DELETE FROM resource_locks WHERE expires_at <= ?1",

    task_insert: "INSERT INTO scheduled_tasks \
         (id, worker_id, task_group, description, task_type, last_execution, next_execution, \
          execution_count, status, errors, payload, progress) \
         VALUES (?1, NULL, ?2, ?3, ?4, NULL, ?5, 0, 'idle', '', ?6, 0)",
    task_select: "SELECT id, worker_id, task_group, description, task_type, last_execution, \
          next_execution, execution_count, status, errors, payload, progress \
         FROM scheduled_tasks WHERE id = ?1",
    task_select_all: "SELECT id, worker_id, task_group, description, task_type, last_execution, \
          next_execution, execution_count, status, errors, payload, progress \
         FROM scheduled_tasks ORDER BY id ASC",
    task_select_due: "SELECT id, worker_id, task_group, description, task_type, last_execution, \
          next_execution, execution_count, status, errors, payload, progress \
         FROM scheduled_tasks \
         WHERE next_execution IS NOT NULL AND next_execution <= ?1 \
         ORDER BY next_execution ASC",
    task_begin: "UPDATE scheduled_tasks SET status = 'running', worker_id = ?1, progress = 0 \
         WHERE id = ?2",
    task_complete: "UPDATE scheduled_tasks SET status = 'completed', worker_id = NULL, \
          last_execution = ?1, next_execution = ?2, \
          execution_count = execution_count + 1, progress = 1.0 \
         WHERE id = ?3",
    task_fail: "UPDATE scheduled_tasks SET status = 'faulted', worker_id = NULL, \
          last_execution = ?1, next_execution = ?2, \
          execution_count = execution_count + 1, errors = errors || ?3 \
         WHERE id = ?4",
    task_progress: "UPDATE scheduled_tasks SET progress = ?1 WHERE id = ?2",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_postgres_schemes() {
        assert_eq!(
            Dialect::from_url("postgres://localhost/app").unwrap(),
            Dialect::Postgres
        );
        assert_eq!(
            Dialect::from_url("postgresql://localhost/app").unwrap(),
            Dialect::Postgres
        );
    }

    #[test]
    fn resolves_sqlite_scheme() {
        assert_eq!(
            Dialect::from_url("sqlite::memory:").unwrap(),
            Dialect::Sqlite
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(Dialect::from_url("mysql://localhost/app").is_err());
    }

    #[test]
    fn catalogs_use_their_own_placeholder_style() {
        assert!(Dialect::Postgres.catalog().queue_claim.contains("$1"));
        assert!(Dialect::Sqlite.catalog().queue_claim.contains("?1"));
    }
}
