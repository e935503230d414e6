//! `castpulse-tasks` — durable work queues and the pipeline's task
//! handlers.
//!
//! # Overview
//!
//! Tasks persist to a SQLite `tasks` table partitioned into named
//! queues (`default`, `ingestion`, `ml`, `alerts`) with prefix-based
//! routing. One worker loop per queue claims due tasks, executes them
//! under a wall-clock limit, and retries failures with exponential
//! backoff and jitter (capped, five attempts).
//!
//! The handlers chain the pipeline: ingest/poll emit classification,
//! classification emits linking, linking emits aggregation, and
//! aggregation emits alert evaluation, which emits per-event delivery.
//! Ingest and poll re-enqueue the next poll while their thread stays
//! LIVE, deduplicated per process within the poll interval.

pub mod error;
pub mod handlers;
pub mod queue;
pub mod worker;

pub use error::{Result, TaskError};
pub use handlers::TaskContext;
pub use queue::{QueueName, TaskQueue, TaskRow};
pub use worker::WorkerPool;
