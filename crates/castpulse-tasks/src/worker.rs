use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, timeout, Duration};
use tracing::{error, info, warn};

use castpulse_core::metrics;

use crate::error::TaskError;
use crate::handlers::{dispatch, TaskContext};
use crate::queue::{QueueName, TaskQueue};

/// How often an idle consumer polls its queue for due tasks.
const POLL_TICK: Duration = Duration::from_secs(1);

/// One consumer loop per named queue.
///
/// Each claimed task runs to completion under the configured
/// wall-clock limit; an expired or failed task goes back through the
/// queue's retry policy.
pub struct WorkerPool {
    queue: TaskQueue,
    ctx: Arc<TaskContext>,
    task_time_limit: Duration,
}

impl WorkerPool {
    pub fn new(queue: TaskQueue, ctx: Arc<TaskContext>, task_time_limit_secs: u64) -> Self {
        Self {
            queue,
            ctx,
            task_time_limit: Duration::from_secs(task_time_limit_secs.max(1)),
        }
    }

    /// Spawn the per-queue consumers and wait for shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!("worker pool starting");
        let mut handles = Vec::new();
        for queue_name in QueueName::ALL {
            let queue = self.queue.clone();
            let ctx = self.ctx.clone();
            let limit = self.task_time_limit;
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                consume_queue(queue, ctx, queue_name, limit, &mut shutdown).await;
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!("worker task panicked: {e}");
            }
        }
        info!("worker pool stopped");
    }
}

async fn consume_queue(
    queue: TaskQueue,
    ctx: Arc<TaskContext>,
    queue_name: QueueName,
    task_time_limit: Duration,
    shutdown: &mut watch::Receiver<bool>,
) {
    info!(queue = %queue_name, "queue consumer started");
    let mut tick = interval(POLL_TICK);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                drain_due(&queue, &ctx, queue_name, task_time_limit).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(queue = %queue_name, "queue consumer shutting down");
                    break;
                }
            }
        }
    }
}

async fn drain_due(
    queue: &TaskQueue,
    ctx: &TaskContext,
    queue_name: QueueName,
    task_time_limit: Duration,
) {
    loop {
        let task = match queue.claim_due(queue_name) {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(e) => {
                error!(queue = %queue_name, "claim failed: {e}");
                return;
            }
        };

        let outcome = timeout(task_time_limit, dispatch(ctx, &task)).await;
        match outcome {
            Ok(Ok(())) => {
                metrics::inc_task(queue_name.as_str(), "ok");
                if let Err(e) = queue.complete(&task) {
                    error!(task_id = %task.id, "failed to mark task complete: {e}");
                }
            }
            Ok(Err(e)) => {
                let retried = retry(queue, &task, &e.to_string());
                metrics::inc_task(queue_name.as_str(), if retried { "retry" } else { "failed" });
            }
            Err(_) => {
                let e = TaskError::Timeout {
                    seconds: task_time_limit.as_secs(),
                };
                warn!(task_id = %task.id, task = %task.name, "{e}");
                let retried = retry(queue, &task, &e.to_string());
                metrics::inc_task(queue_name.as_str(), if retried { "retry" } else { "timeout" });
            }
        }
    }
}

fn retry(queue: &TaskQueue, task: &crate::queue::TaskRow, error: &str) -> bool {
    match queue.retry_or_fail(task, error) {
        Ok(retried) => retried,
        Err(e) => {
            error!(task_id = %task.id, "failed to persist retry state: {e}");
            false
        }
    }
}
