//! # taskhost
//!
//! Relational task hosting core: durable work queues, distributed named
//! locks, and recurring scheduled tasks, coordinated through nothing but a
//! SQL database (Postgres or SQLite via the sqlx `any` driver).
//!
//! Independent worker processes share a single backlog of background jobs.
//! Dequeue claims rows with an optimistic concurrency token, so no database
//! lock is held across the read-decide-write window; mutual exclusion for
//! named resources rides on a uniqueness constraint plus lease expiry.

pub mod cancel;
pub mod clock;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod telemetry;
pub mod worker;
