//! Queue manager - the single decision loop.
//!
//! アイドルワーカー数・pending カーソル・ポーリングタイマーを書き換えるのは
//! manager だけ。ワーカーとは 2 本の bounded channel でやり取りする:
//! - dispatch: manager -> workers（claim 済みの Running タスク）
//! - completion: workers -> manager（実行後のタスク）

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{StoreError, Task, TaskState};
use crate::ports::TaskRepository;

/// Floor for the polling interval; `delay = 0` polls at this rate.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub(crate) struct Manager {
    store: Arc<dyn TaskRepository>,
    delay: Duration,
    idle_workers: usize,
    dispatch_tx: mpsc::Sender<Task>,
    completion_rx: mpsc::Receiver<Task>,
}

impl Manager {
    pub(crate) fn new(
        store: Arc<dyn TaskRepository>,
        delay: Duration,
        workers: usize,
        dispatch_tx: mpsc::Sender<Task>,
        completion_rx: mpsc::Receiver<Task>,
    ) -> Self {
        Self {
            store,
            delay,
            idle_workers: workers,
            dispatch_tx,
            completion_rx,
        }
    }

    /// Run until `cancel` fires.
    pub(crate) async fn run(mut self, cancel: CancellationToken) {
        // 同じストアを共有するインスタンスが一斉にポーリングしないよう初回だけ揺らす
        let sleep = tokio::time::sleep(self.initial_delay());
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(task) = self.completion_rx.recv() => {
                    self.complete_task(task).await;
                    let next = self.dispatch_tasks().await;
                    arm(sleep.as_mut(), next);
                }
                () = &mut sleep => {
                    let next = self.dispatch_tasks().await;
                    arm(sleep.as_mut(), next);
                }
            }
        }

        debug!("Queue manager stopped");
    }

    /// Uniform jitter in `[0, delay)`; zero when the delay is zero.
    fn initial_delay(&self) -> Duration {
        if self.delay.is_zero() {
            return Duration::ZERO;
        }
        let millis = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX).max(1);
        Duration::from_millis(rand::thread_rng().gen_range(0..millis))
    }

    /// Delay after a failed cycle.
    // TODO: back off across consecutive iteration failures instead of a flat delay
    fn retry_delay(&self) -> Duration {
        self.delay
    }

    /// One polling cycle: claim due tasks until workers or candidates run out.
    ///
    /// Returns the delay before the next timer-driven cycle. The cursor is
    /// dropped on every return path.
    async fn dispatch_tasks(&mut self) -> Duration {
        if self.idle_workers == 0 {
            return self.delay;
        }

        let mut pending = match self.store.iterate_pending().await {
            Ok(pending) => pending,
            Err(err) => {
                error!(error = %err, "Failure iterating tasks");
                return self.retry_delay();
            }
        };

        while self.idle_workers > 0 {
            match pending.next().await {
                Some(Ok(task)) => self.dispatch_task(task).await,
                Some(Err(err)) => {
                    error!(error = %err, "Failure iterating tasks");
                    return self.retry_delay();
                }
                None => break,
            }
        }

        debug!(idle_workers = self.idle_workers, "Polling cycle finished");
        self.delay
    }

    /// Claim `task` (Pending -> Running) and hand it to an idle worker.
    async fn dispatch_task(&mut self, mut task: Task) {
        let now = Utc::now();
        if !task.is_due(now) {
            warn!(task_id = %task.id, task_name = %task.name, state = %task.state, "Skipping task that is not due");
            return;
        }

        task.state = TaskState::Running;
        task.run_time = Some(now);

        let claimed = match self.store.update_from_state(&task, &TaskState::Pending).await {
            Ok(claimed) => claimed,
            Err(StoreError::AlreadyClaimed) => {
                info!(
                    task_id = %task.id,
                    task_name = %task.name,
                    "Failure to claim task as it is already in progress or is no longer available"
                );
                return;
            }
            Err(err) => {
                error!(task_id = %task.id, error = %err, "Failure to update state during dispatch task");
                return;
            }
        };

        self.idle_workers -= 1;
        if let Err(err) = self.dispatch_tx.send(claimed).await {
            // ワーカーが既に停止している（shutdown 中）。ストア上は Running のまま残る
            error!(task_id = %err.0.id, "Failure to hand claimed task to a worker");
        }
    }

    /// Finalize a task returned by a worker and persist it.
    async fn complete_task(&mut self, mut task: Task) {
        self.idle_workers += 1;

        let now = Utc::now();
        if let Some(run_time) = task.run_time {
            let elapsed_ms = (now - run_time).num_milliseconds().max(0);
            task.duration = Some(elapsed_ms as f64 / 1000.0);
        }
        compute_state(&mut task, now);

        if let Err(err) = self.store.update_from_state(&task, &TaskState::Running).await {
            error!(task_id = %task.id, error = %err, "Failure to update state during complete task");
        }

        if let Some(task_error) = &task.error {
            error!(
                task_id = %task.id,
                task_name = %task.name,
                state = %task.state,
                error = %task_error,
                "Error occurred while running task"
            );
        } else {
            debug!(task_id = %task.id, state = %task.state, duration = ?task.duration, "Task finished");
        }
    }
}

/// Re-arm the polling timer, never below `MIN_POLL_INTERVAL`.
fn arm(sleep: Pin<&mut Sleep>, delay: Duration) {
    sleep.reset(Instant::now() + delay.max(MIN_POLL_INTERVAL));
}

/// Apply the finalize transition to a task returned by a handler.
///
/// - Running: Failed if an error was recorded or the available time is
///   missing / in the future, Completed otherwise
/// - Pending: a reschedule; requires a future available time, else Failed
/// - Completed / Failed: left as the handler set them
/// - Unknown: Failed with "unknown state"
pub(crate) fn compute_state(task: &mut Task, now: DateTime<Utc>) {
    match &task.state {
        TaskState::Pending => {
            if task.available_time.is_none_or(|at| at <= now) {
                task.append_error("pending task requires future available time");
                task.state = TaskState::Failed;
            }
        }
        TaskState::Running => {
            if task.available_time.is_none_or(|at| at > now) {
                task.append_error("running task requires past available time");
            }
            task.state = if task.has_error() {
                TaskState::Failed
            } else {
                TaskState::Completed
            };
        }
        TaskState::Completed | TaskState::Failed => {}
        TaskState::Unknown(raw) => {
            error!(task_id = %task.id, state = %raw, "Task finalized in unknown state");
            task.append_error("unknown state");
            task.state = TaskState::Failed;
        }
    }
}
