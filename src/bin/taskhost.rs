//! taskhost CLI — operator interface to the hosting core's stores.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use taskhost::config::Config;
use taskhost::db::Db;
use taskhost::dispatch::{HandlerRegistry, Job};
use taskhost::error::Error;
use taskhost::model::NewScheduledTask;
use taskhost::scheduler::{FixedInterval, Scheduler, SchedulerConfig};
use taskhost::telemetry::{TelemetryConfig, init_telemetry};
use taskhost::worker::{Worker, WorkerConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "taskhost", about = "Relational task hosting core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the schema if it does not exist
    Migrate,
    /// Run the hosting daemons (queue worker + task scheduler)
    Serve {
        /// Failed deliveries a message survives before it is quarantined
        #[arg(long)]
        poison_threshold: i64,
        /// Seconds between queue polls when the queue is empty
        #[arg(long, default_value_t = 1)]
        poll_interval: u64,
        /// Seconds between scheduled-task due-scans
        #[arg(long, default_value_t = 5)]
        scan_interval: u64,
        /// Seconds between built-in housekeeping runs
        #[arg(long, default_value_t = 300)]
        housekeeping_interval: u64,
        /// Rows purged per housekeeping pass
        #[arg(long, default_value_t = 100)]
        cleanup_batch: i64,
    },
    /// Work queue operations
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Resource lock operations
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },
    /// Scheduled task operations
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Number of messages awaiting dequeue
    Count {
        /// Queue partition name
        queue: String,
    },
    /// Show the next eligible message without claiming it
    Peek {
        /// Queue partition name
        queue: String,
    },
    /// Purge processed messages
    Cleanup {
        /// Maximum rows to delete
        #[arg(long, default_value_t = 100)]
        batch: i64,
    },
}

#[derive(Subcommand)]
enum LockAction {
    /// Reclaim expired leases
    Cleanup,
}

#[derive(Subcommand)]
enum TaskAction {
    /// List registered scheduled tasks
    List,
    /// Show a scheduled task
    Show {
        /// Task id
        id: String,
    },
}

/// Built-in maintenance job: purges processed queue rows and reclaims
/// expired leases. Registered as a scheduled task by `serve`.
#[derive(Debug, Serialize, Deserialize)]
struct Housekeeping {
    batch_size: i64,
}

impl Job for Housekeeping {
    const JOB_TYPE: &'static str = "taskhost.housekeeping";
    type Context = Arc<Db>;

    async fn run(&self, db: Arc<Db>) -> anyhow::Result<()> {
        let purged = db.cleanup_queue(self.batch_size).await?;
        let reclaimed = db.cleanup_locks().await?;
        info!(purged, reclaimed, "housekeeping pass");
        Ok(())
    }
}

const HOUSEKEEPING_TASK_ID: &str = "taskhost-housekeeping";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "taskhost".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);

    match cli.command {
        Command::Migrate => {
            db.migrate().await?;
            println!("Schema ready ({})", db.dialect());
        }
        Command::Serve {
            poison_threshold,
            poll_interval,
            scan_interval,
            housekeeping_interval,
            cleanup_batch,
        } => {
            db.migrate().await?;
            cmd_serve(
                db,
                config.worker_id.clone(),
                poison_threshold,
                Duration::from_secs(poll_interval),
                Duration::from_secs(scan_interval),
                Duration::from_secs(housekeeping_interval),
                cleanup_batch,
            )
            .await?;
        }
        Command::Queue { action } => {
            db.migrate().await?;
            match action {
                QueueAction::Count { queue } => {
                    println!("{}", db.queue_count(&queue).await?);
                }
                QueueAction::Peek { queue } => match db.peek_message(&queue).await? {
                    Some(msg) => {
                        println!("ID:        {}", msg.id);
                        println!("Queue:     {}", msg.queue_name);
                        println!("State:     {}", msg.state);
                        println!("Dequeues:  {}", msg.dequeue_count);
                        println!("Enqueued:  {}", msg.enqueued_at);
                        println!("Payload:   {}", msg.payload);
                    }
                    None => println!("Queue '{queue}' is empty."),
                },
                QueueAction::Cleanup { batch } => {
                    let deleted = db.cleanup_queue(batch).await?;
                    println!("Deleted {deleted} processed message(s)");
                }
            }
        }
        Command::Lock { action } => {
            db.migrate().await?;
            match action {
                LockAction::Cleanup => {
                    let reclaimed = db.cleanup_locks().await?;
                    println!("Reclaimed {reclaimed} expired lease(s)");
                }
            }
        }
        Command::Task { action } => {
            db.migrate().await?;
            match action {
                TaskAction::List => cmd_task_list(&db).await?,
                TaskAction::Show { id } => cmd_task_show(&db, &id).await?,
            }
        }
    }

    Ok(())
}

async fn cmd_serve(
    db: Arc<Db>,
    worker_id: String,
    poison_threshold: i64,
    poll_interval: Duration,
    scan_interval: Duration,
    housekeeping_interval: Duration,
    cleanup_batch: i64,
) -> anyhow::Result<()> {
    let mut registry = HandlerRegistry::new();
    registry.register::<Housekeeping>()?;
    let registry = Arc::new(registry);

    // Register the built-in housekeeping task on first boot; the row is the
    // task's history, so an existing one is left alone.
    match db.get_task(HOUSEKEEPING_TASK_ID).await {
        Ok(_) => {}
        Err(Error::NotFound(_)) => {
            db.insert_task(
                NewScheduledTask::new(HOUSEKEEPING_TASK_ID, Housekeeping::JOB_TYPE)
                    .group("maintenance")
                    .description("Purge processed messages and reclaim expired leases")
                    .payload(&Housekeeping {
                        batch_size: cleanup_batch,
                    })?
                    .next_execution(db.now()),
            )
            .await?;
        }
        Err(e) => return Err(e.into()),
    }

    let worker = Worker::new(
        Arc::clone(&db),
        Arc::clone(&registry),
        Arc::clone(&db),
        WorkerConfig::new(poison_threshold).poll_interval(poll_interval),
    );
    let scheduler = Scheduler::new(
        Arc::clone(&db),
        registry,
        Arc::clone(&db),
        Arc::new(FixedInterval(housekeeping_interval)),
        SchedulerConfig::new(worker_id).scan_interval(scan_interval),
    );

    let worker_cancel = worker.cancellation_token();
    let scheduler_cancel = scheduler.cancellation_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        worker_cancel.cancel();
        scheduler_cancel.cancel();
    });

    let worker_handle = tokio::spawn(async move { worker.run().await });
    let scheduler_handle = tokio::spawn(async move { scheduler.run().await });
    let _ = tokio::join!(worker_handle, scheduler_handle);

    Ok(())
}

async fn cmd_task_list(db: &Db) -> anyhow::Result<()> {
    let tasks = db.list_tasks().await?;

    if tasks.is_empty() {
        println!("No scheduled tasks registered.");
        return Ok(());
    }

    // Header
    println!(
        "{:<24}  {:<16}  {:<10}  {:>5}  NEXT",
        "ID", "TYPE", "STATUS", "RUNS"
    );
    println!("{}", "-".repeat(80));

    for task in &tasks {
        let next = task
            .next_execution
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24}  {:<16}  {:<10}  {:>5}  {}",
            task.id, task.task_type, task.status, task.execution_count, next
        );
    }

    println!("\n{} task(s)", tasks.len());
    Ok(())
}

async fn cmd_task_show(db: &Db, id: &str) -> anyhow::Result<()> {
    let task = db.get_task(id).await?;

    println!("ID:          {}", task.id);
    println!("Type:        {}", task.task_type);
    println!("Group:       {}", task.group);
    println!("Status:      {}", task.status);
    println!("Runs:        {}", task.execution_count);
    println!("Progress:    {:.0}%", task.progress * 100.0);
    if let Some(worker) = &task.worker_id {
        println!("Worker:      {worker}");
    }
    if let Some(last) = task.last_execution {
        println!("Last run:    {last}");
    }
    match task.next_execution {
        Some(next) => println!("Next run:    {next}"),
        None => println!("Next run:    - (not scheduled)"),
    }
    if !task.description.is_empty() {
        println!("Description: {}", task.description);
    }
    if !task.errors.is_empty() {
        println!("---");
        println!("Errors:\n{}", task.errors);
    }

    Ok(())
}
