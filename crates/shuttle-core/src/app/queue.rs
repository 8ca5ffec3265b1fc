//! Queue - public surface wiring config, store, runners, workers and manager.
//!
//! - `start()` で manager 1 つとワーカー N 個を同じ `CancellationToken` の下に spawn
//! - `stop()` は cancel してから全タスクの終了を待つ（どちらも冪等）
//! - runner の登録は一度でも start した後は受け付けない

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, error, info, info_span};

use super::config::Config;
use super::manager::Manager;
use super::worker_pool::{Runners, WorkerGroup};
use crate::domain::QueueError;
use crate::ports::{Runner, TaskRepository};

/// Polling task queue over a shared `TaskRepository`.
///
/// # Usage
/// ```ignore
/// let mut queue = Queue::new(config, info_span!("queue"), store)?;
/// queue.register_runner(Arc::new(MyRunner))?;
/// queue.start();
/// // ...
/// queue.stop().await;
/// ```
///
/// `start` and `stop` are idempotent. Runners must be registered before the
/// first `start`.
pub struct Queue {
    logger: Span,
    store: Arc<dyn TaskRepository>,
    workers: usize,
    delay: Duration,
    runners: Vec<Arc<dyn Runner>>,
    started: bool,
    running: Option<RunningQueue>,
}

/// Handles owned while the queue runs; one token owns every spawned task.
struct RunningQueue {
    cancel: CancellationToken,
    workers: WorkerGroup,
    manager: JoinHandle<()>,
}

impl Queue {
    /// Build a queue. Fails when `config` is invalid.
    ///
    /// `logger` is the parent span of every event the queue emits.
    pub fn new(config: Config, logger: Span, store: Arc<dyn TaskRepository>) -> Result<Self, QueueError> {
        config.validate()?;

        Ok(Self {
            logger,
            store,
            workers: config.workers,
            delay: config.delay,
            runners: Vec::new(),
            started: false,
            running: None,
        })
    }

    /// Append a runner. Registration order decides which runner wins when
    /// several accept the same task.
    pub fn register_runner(&mut self, runner: Arc<dyn Runner>) -> Result<(), QueueError> {
        if self.started {
            return Err(QueueError::AlreadyStarted);
        }
        self.runners.push(runner);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawn the workers and the manager on the current tokio runtime.
    ///
    /// Does nothing if already running.
    ///
    /// # Panics
    /// When called outside a tokio runtime.
    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }
        self.started = true;

        let cancel = CancellationToken::new();
        let (dispatch_tx, dispatch_rx) = mpsc::channel(self.workers);
        let (completion_tx, completion_rx) = mpsc::channel(self.workers);
        let runners: Runners = self.runners.iter().cloned().collect();

        let workers = WorkerGroup::spawn(
            self.workers,
            runners,
            dispatch_rx,
            completion_tx,
            cancel.clone(),
            &self.logger,
        );

        let manager = Manager::new(
            Arc::clone(&self.store),
            self.delay,
            self.workers,
            dispatch_tx,
            completion_rx,
        );
        let span = info_span!(parent: &self.logger, "queue_manager");
        let manager = tokio::spawn(manager.run(cancel.clone()).instrument(span));

        self.logger.in_scope(|| {
            info!(workers = self.workers, delay_secs = self.delay.as_secs(), "Queue started");
        });

        self.running = Some(RunningQueue {
            cancel,
            workers,
            manager,
        });
    }

    /// Cancel in-flight work and wait for the manager and every worker to exit.
    ///
    /// Does nothing if not running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        if let Err(err) = running.manager.await {
            self.logger.in_scope(|| error!(error = %err, "Queue manager exited abnormally"));
        }
        running.workers.join().instrument(self.logger.clone()).await;

        self.logger.in_scope(|| info!("Queue stopped"));
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        // stop() されずに drop された場合でも spawn したタスクは止める
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}
