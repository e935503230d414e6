use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, TaskError};

/// Retry backoff never exceeds this many seconds.
const BACKOFF_MAX_SECS: u64 = 600;
/// Jitter fraction applied to each retry delay (±10%).
const JITTER_FRACTION: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueName {
    Default,
    Ingestion,
    Ml,
    Alerts,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::Default,
        QueueName::Ingestion,
        QueueName::Ml,
        QueueName::Alerts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Default => "default",
            QueueName::Ingestion => "ingestion",
            QueueName::Ml => "ml",
            QueueName::Alerts => "alerts",
        }
    }

    /// Routing rules: task-name prefix decides the queue.
    pub fn route(task_name: &str) -> QueueName {
        match task_name {
            name if name.starts_with("ingest_thread") || name.starts_with("poll_thread") => {
                QueueName::Ingestion
            }
            name if name.starts_with("classify_comments")
                || name.starts_with("link_entities")
                || name.starts_with("compute_aggregates") =>
            {
                QueueName::Ml
            }
            name if name.starts_with("check_alerts")
                || name.starts_with("deliver_alert_event") =>
            {
                QueueName::Alerts
            }
            _ => QueueName::Default,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "default" => Ok(QueueName::Default),
            "ingestion" => Ok(QueueName::Ingestion),
            "ml" => Ok(QueueName::Ml),
            "alerts" => Ok(QueueName::Alerts),
            other => Err(format!("unknown queue: {other}")),
        }
    }
}

/// One durable work item: `(task_name, args, queue)` plus retry state.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: String,
    pub name: String,
    pub queue: QueueName,
    pub args: Value,
    pub attempts: u32,
    pub run_at: DateTime<Utc>,
}

/// Durable task queue over SQLite.
///
/// Claiming marks the row running and bumps its attempt counter; a
/// failed run either reschedules with backoff or parks the row as
/// failed once retries are exhausted.
#[derive(Clone)]
pub struct TaskQueue {
    conn: Arc<Mutex<Connection>>,
    max_retries: u32,
    retry_base_secs: u64,
}

impl TaskQueue {
    pub fn open<P: AsRef<Path>>(path: P, max_retries: u32, retry_base_secs: u64) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        // The entity store shares this file through its own connection.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            max_retries,
            retry_base_secs,
        })
    }

    pub fn open_in_memory(max_retries: u32, retry_base_secs: u64) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            max_retries,
            retry_base_secs,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("queue mutex poisoned")
    }

    /// Enqueue `task_name` with a countdown before it becomes due.
    pub fn enqueue(&self, task_name: &str, args: Value, countdown_secs: u64) -> Result<TaskRow> {
        let queue = QueueName::route(task_name);
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let run_at = now + Duration::seconds(countdown_secs as i64);

        let conn = self.lock();
        conn.execute(
            "INSERT INTO tasks
             (id, name, queue, args, state, attempts, run_at, last_error,
              created_at, updated_at)
             VALUES (?1,?2,?3,?4,'pending',0,?5,NULL,?6,?6)",
            params![
                id,
                task_name,
                queue.as_str(),
                serde_json::to_string(&args)?,
                run_at.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;
        info!(task_id = %id, task = task_name, queue = %queue, countdown_secs, "task enqueued");
        Ok(TaskRow {
            id,
            name: task_name.to_string(),
            queue,
            args,
            attempts: 0,
            run_at,
        })
    }

    /// Claim the next due task on a queue, oldest `run_at` first.
    pub fn claim_due(&self, queue: QueueName) -> Result<Option<TaskRow>> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock();

        let row = conn
            .query_row(
                "SELECT id, name, args, attempts, run_at FROM tasks
                 WHERE queue = ?1 AND state = 'pending' AND run_at <= ?2
                 ORDER BY run_at, created_at LIMIT 1",
                params![queue.as_str(), now],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, name, args_raw, attempts, run_at_raw)) = row else {
            return Ok(None);
        };

        let attempts = attempts + 1;
        conn.execute(
            "UPDATE tasks SET state = 'running', attempts = ?1, updated_at = ?2
             WHERE id = ?3",
            params![attempts, now, id],
        )?;

        let args: Value = serde_json::from_str(&args_raw)?;
        let run_at = DateTime::parse_from_rfc3339(&run_at_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(TaskRow {
            id,
            name,
            queue,
            args,
            attempts,
            run_at,
        }))
    }

    pub fn complete(&self, task: &TaskRow) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE tasks SET state = 'completed', updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), task.id],
        )?;
        Ok(())
    }

    /// Reschedule with backoff, or park as failed once retries are
    /// exhausted. Returns true when the task will run again.
    pub fn retry_or_fail(&self, task: &TaskRow, error: &str) -> Result<bool> {
        if task.attempts <= self.max_retries {
            let delay = backoff_delay_secs(self.retry_base_secs, task.attempts);
            let run_at = Utc::now() + Duration::seconds(delay as i64);
            let conn = self.lock();
            conn.execute(
                "UPDATE tasks SET state = 'pending', run_at = ?1, last_error = ?2,
                        updated_at = ?3
                 WHERE id = ?4",
                params![
                    run_at.to_rfc3339(),
                    error,
                    Utc::now().to_rfc3339(),
                    task.id
                ],
            )?;
            warn!(task_id = %task.id, task = %task.name, attempt = task.attempts, delay, "task retrying");
            Ok(true)
        } else {
            let conn = self.lock();
            conn.execute(
                "UPDATE tasks SET state = 'failed', last_error = ?1, updated_at = ?2
                 WHERE id = ?3",
                params![error, Utc::now().to_rfc3339(), task.id],
            )?;
            warn!(task_id = %task.id, task = %task.name, "task failed permanently: {error}");
            Ok(false)
        }
    }

    /// Count of tasks in a given state on a queue (monitoring, tests).
    pub fn count_in_state(&self, queue: QueueName, state: &str) -> Result<i64> {
        let conn = self.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE queue = ?1 AND state = ?2",
            params![queue.as_str(), state],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Pending tasks across all queues, due or not (tests, draining).
    pub fn pending_tasks(&self) -> Result<Vec<(String, QueueName)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT name, queue FROM tasks WHERE state = 'pending' ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(name, queue)| {
                let queue = queue
                    .parse::<QueueName>()
                    .map_err(|e| TaskError::InvalidArgs {
                        task: name.clone(),
                        reason: e,
                    })?;
                Ok((name, queue))
            })
            .collect()
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tasks (
            id         TEXT PRIMARY KEY,
            name       TEXT NOT NULL,
            queue      TEXT NOT NULL,
            args       TEXT NOT NULL,
            state      TEXT NOT NULL DEFAULT 'pending',
            attempts   INTEGER NOT NULL DEFAULT 0,
            run_at     TEXT NOT NULL,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS ix_tasks_queue_state_run_at
            ON tasks(queue, state, run_at);",
    )
}

/// `min(600, base·2^attempt) ± 10% jitter`, as seconds.
pub fn backoff_delay_secs(base_secs: u64, attempt: u32) -> u64 {
    let exponential = base_secs.saturating_mul(2u64.saturating_pow(attempt));
    let capped = exponential.min(BACKOFF_MAX_SECS).max(1);
    let jitter_span = (capped as f64 * JITTER_FRACTION).max(1.0);
    let jitter = rand::rng().random_range(-jitter_span..=jitter_span);
    ((capped as f64 + jitter).max(1.0)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn routing_prefixes() {
        assert_eq!(QueueName::route("ingest_thread"), QueueName::Ingestion);
        assert_eq!(QueueName::route("poll_thread"), QueueName::Ingestion);
        assert_eq!(QueueName::route("classify_comments"), QueueName::Ml);
        assert_eq!(QueueName::route("link_entities"), QueueName::Ml);
        assert_eq!(QueueName::route("compute_aggregates"), QueueName::Ml);
        assert_eq!(QueueName::route("check_alerts"), QueueName::Alerts);
        assert_eq!(QueueName::route("deliver_alert_event"), QueueName::Alerts);
        assert_eq!(QueueName::route("anything_else"), QueueName::Default);
    }

    #[test]
    fn backoff_grows_and_caps() {
        for attempt in 1..=10 {
            let delay = backoff_delay_secs(2, attempt);
            assert!(delay >= 1);
            assert!(delay <= (600.0 * 1.1) as u64 + 1);
        }
        // Attempt 1: 4s ±10%.
        let early = backoff_delay_secs(2, 1);
        assert!((3..=5).contains(&early));
        // Deep attempts sit at the cap.
        let late = backoff_delay_secs(2, 10);
        assert!(late >= 540);
    }

    #[test]
    fn enqueue_claim_complete_flow() {
        let queue = TaskQueue::open_in_memory(5, 2).unwrap();
        queue
            .enqueue("classify_comments", json!({"comment_ids": [1, 2]}), 0)
            .unwrap();

        let task = queue.claim_due(QueueName::Ml).unwrap().unwrap();
        assert_eq!(task.name, "classify_comments");
        assert_eq!(task.attempts, 1);
        assert_eq!(task.args["comment_ids"], json!([1, 2]));

        // Claimed tasks are invisible to other claims.
        assert!(queue.claim_due(QueueName::Ml).unwrap().is_none());

        queue.complete(&task).unwrap();
        assert_eq!(queue.count_in_state(QueueName::Ml, "completed").unwrap(), 1);
    }

    #[test]
    fn countdown_defers_claims() {
        let queue = TaskQueue::open_in_memory(5, 2).unwrap();
        queue
            .enqueue("poll_thread", json!({"thread_id": 1}), 3600)
            .unwrap();
        assert!(queue.claim_due(QueueName::Ingestion).unwrap().is_none());
        assert_eq!(queue.count_in_state(QueueName::Ingestion, "pending").unwrap(), 1);
    }

    #[test]
    fn retries_then_fails_permanently() {
        let queue = TaskQueue::open_in_memory(2, 1).unwrap();
        queue.enqueue("check_alerts", json!({"thread_id": 1}), 0).unwrap();

        let mut task = queue.claim_due(QueueName::Alerts).unwrap().unwrap();
        assert!(queue.retry_or_fail(&task, "boom").unwrap());
        task.attempts = 2;
        assert!(queue.retry_or_fail(&task, "boom").unwrap());
        task.attempts = 3;
        assert!(!queue.retry_or_fail(&task, "boom").unwrap());
        assert_eq!(queue.count_in_state(QueueName::Alerts, "failed").unwrap(), 1);
    }
}
