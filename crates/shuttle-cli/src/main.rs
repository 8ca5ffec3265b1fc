use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use shuttle_core::{Config, EnvReporter, InMemoryTaskRepository, Queue, Runner, Task, TaskState};
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};

#[derive(Debug, Deserialize)]
struct HelloPayload {
    name: String,
}

/// Greets; fails its first `n` runs by rescheduling itself a little later.
struct HelloRunner {
    remaining_failures: AtomicU32,
}

impl HelloRunner {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Runner for HelloRunner {
    fn can_run_task(&self, task: &Task) -> bool {
        task.name == "hello"
    }

    async fn run(&self, _cancel: CancellationToken, task: &mut Task) {
        let payload: HelloPayload = match serde_json::from_value(task.data.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                task.append_error(format!("json decode: {e}"));
                return;
            }
        };

        // 並行実行されても残り回数を取り合わないよう 1 回の CAS で減らす
        let taken = self
            .remaining_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if let Ok(left) = taken {
            warn!(task_id = %task.id, left = left - 1, "intentional failure, rescheduling");
            task.state = TaskState::Pending;
            task.available_time = Some(Utc::now() + chrono::Duration::seconds(1));
            return;
        }

        info!("Hello, {}!", payload.name);
    }
}

/// Sleeps for `millis` from the payload, honoring shutdown.
struct NapRunner;

#[async_trait]
impl Runner for NapRunner {
    fn can_run_task(&self, task: &Task) -> bool {
        task.name == "nap"
    }

    async fn run(&self, cancel: CancellationToken, task: &mut Task) {
        let millis = task.data["millis"].as_u64().unwrap_or(100);
        tokio::select! {
            _ = cancel.cancelled() => task.append_error("cancelled during nap"),
            _ = sleep(Duration::from_millis(millis)) => {}
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // (A) デモ向けの既定値を環境変数（SHUTTLE_WORKERS / SHUTTLE_DELAY）で上書き
    let mut config = Config {
        workers: 2,
        delay: Duration::from_secs(1),
    };
    config
        .load(&EnvReporter::new("SHUTTLE_"))
        .context("loading queue config")?;

    // (B) ストアにタスクを投入
    let store = InMemoryTaskRepository::new();
    store
        .create(Task::new("hello", serde_json::json!({ "name": "shuttle" })))
        .await?;
    for millis in [200, 400, 600] {
        store
            .create(Task::new("nap", serde_json::json!({ "millis": millis })))
            .await?;
    }
    store
        .create(Task::new("unclaimed", serde_json::json!({})))
        .await?;

    // (C) Queue を組み立てて起動
    let mut queue = Queue::new(config, info_span!("queue"), Arc::new(store.clone()))?;
    queue.register_runner(Arc::new(HelloRunner::new(2)))?;
    queue.register_runner(Arc::new(NapRunner))?;
    queue.start();

    // (D) 全タスクが終端状態になるまでポーリング
    loop {
        let tasks = store.list().await;
        if tasks.iter().all(|t| t.state.is_terminal()) {
            for task in &tasks {
                info!(
                    task_id = %task.id,
                    task_name = %task.name,
                    state = %task.state,
                    duration = ?task.duration,
                    error = ?task.error.as_ref().map(|e| e.to_string()),
                    "final status"
                );
            }
            let counts = store.counts_by_state().await;
            info!(?counts, "done");
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    // (E) graceful shutdown
    queue.stop().await;
    Ok(())
}
