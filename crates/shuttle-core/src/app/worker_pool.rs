//! Worker pool - fixed set of executors fed by the manager.
//!
//! - ワーカーはタスク間で状態を持たない
//! - アイドル数を数えるのは manager だけ（ワーカーは触らない）
//! - runner の panic はここで捕まえ、タスクのエラーとして記録する

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};

use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info_span};

use crate::domain::Task;
use crate::ports::Runner;

/// Ordered runner list, frozen at start.
pub(crate) type Runners = Arc<[Arc<dyn Runner>]>;

thread_local! {
    /// Backtrace of the last panic on this thread, set by the hook below.
    static PANIC_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a panic hook that stashes the backtrace for `run_task` to log.
///
/// hook は panic したスレッド上で unwind 前に呼ばれ、`catch_unwind` も同じ poll の
/// 中で戻るので thread-local で受け渡せる。元の hook もそのまま呼ぶ。
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture().to_string();
            PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            previous(info);
        }));
    });
}

fn take_panic_backtrace() -> Option<String> {
    PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

/// Worker group handle.
/// - token を cancel すると全ワーカーが止まる（実行中の runner にも伝わる）
/// - `join()` で全ワーカーの終了を待てる
pub(crate) struct WorkerGroup {
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing one dispatch receiver.
    pub(crate) fn spawn(
        n: usize,
        runners: Runners,
        dispatch_rx: mpsc::Receiver<Task>,
        completion_tx: mpsc::Sender<Task>,
        cancel: CancellationToken,
        logger: &Span,
    ) -> Self {
        let dispatch_rx = Arc::new(Mutex::new(dispatch_rx));

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker = Worker {
                id: worker_id,
                runners: Arc::clone(&runners),
                dispatch_rx: Arc::clone(&dispatch_rx),
                completion_tx: completion_tx.clone(),
            };
            let span = info_span!(parent: logger, "queue_worker", worker = worker_id);
            let cancel = cancel.clone();

            joins.push(tokio::spawn(worker.run(cancel).instrument(span)));
        }

        Self { joins }
    }

    pub(crate) async fn join(self) {
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "Worker exited abnormally");
            }
        }
    }
}

struct Worker {
    id: usize,
    runners: Runners,
    dispatch_rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    completion_tx: mpsc::Sender<Task>,
}

impl Worker {
    async fn run(self, cancel: CancellationToken) {
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                task = self.next_task() => task,
            };
            let Some(mut task) = received else {
                // manager が先に終了した
                break;
            };

            run_task(&self.runners, &cancel, &mut task).await;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = self.completion_tx.send(task) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(worker = self.id, "Worker stopped");
    }

    async fn next_task(&self) -> Option<Task> {
        self.dispatch_rx.lock().await.recv().await
    }
}

/// Execute `task` with the first matching runner, recording failures on the task.
///
/// Panics inside `can_run_task` or `run` are caught here so the worker keeps
/// serving subsequent tasks.
pub(crate) async fn run_task(runners: &[Arc<dyn Runner>], cancel: &CancellationToken, task: &mut Task) {
    let task_id = task.id;
    let task_name = task.name.clone();

    install_panic_hook();
    // 以前の無関係な panic の backtrace を拾わないよう捨てておく
    take_panic_backtrace();

    let outcome = AssertUnwindSafe(dispatch(runners, cancel, task))
        .catch_unwind()
        .await;

    match outcome {
        Ok(true) => {}
        Ok(false) => {
            error!(task_id = %task_id, task_name = %task_name, "Runner not found for task");
            task.append_error("runner not found for task");
        }
        Err(panic) => {
            let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            let backtrace = take_panic_backtrace().unwrap_or_else(|| "unavailable".to_string());
            error!(
                task_id = %task_id,
                task_name = %task_name,
                panic_msg = %panic_msg,
                backtrace = %backtrace,
                "Unhandled panic"
            );
            task.append_error(format!("unhandled panic: {panic_msg}"));
        }
    }
}

/// Returns false when no runner accepts the task.
async fn dispatch(runners: &[Arc<dyn Runner>], cancel: &CancellationToken, task: &mut Task) -> bool {
    // 登録順に評価し、最初にマッチした runner だけが実行する
    let candidate: &Task = task;
    let Some(runner) = runners.iter().find(|runner| runner.can_run_task(candidate)) else {
        return false;
    };
    runner.run(cancel.clone(), task).await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Runner for Named {
        fn can_run_task(&self, task: &Task) -> bool {
            task.name == self.0
        }

        async fn run(&self, _cancel: CancellationToken, task: &mut Task) {
            task.data = serde_json::json!({ "ran_by": self.0 });
        }
    }

    struct CatchAll;

    #[async_trait]
    impl Runner for CatchAll {
        fn can_run_task(&self, _task: &Task) -> bool {
            true
        }

        async fn run(&self, _cancel: CancellationToken, task: &mut Task) {
            task.data = serde_json::json!({ "ran_by": "catch-all" });
        }
    }

    struct Boom;

    #[async_trait]
    impl Runner for Boom {
        fn can_run_task(&self, _task: &Task) -> bool {
            true
        }

        async fn run(&self, _cancel: CancellationToken, _task: &mut Task) {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn first_matching_runner_wins() {
        let runners: Vec<Arc<dyn Runner>> = vec![
            Arc::new(Named("a")) as Arc<dyn Runner>,
            Arc::new(CatchAll) as Arc<dyn Runner>,
            Arc::new(Named("b")) as Arc<dyn Runner>,
        ];
        let cancel = CancellationToken::new();

        let mut task = Task::new("b", serde_json::Value::Null);
        run_task(&runners, &cancel, &mut task).await;
        assert_eq!(task.data["ran_by"], "catch-all");

        let mut task = Task::new("a", serde_json::Value::Null);
        run_task(&runners, &cancel, &mut task).await;
        assert_eq!(task.data["ran_by"], "a");
        assert!(!task.has_error());
    }

    #[tokio::test]
    async fn missing_runner_is_recorded() {
        let runners: Vec<Arc<dyn Runner>> = vec![Arc::new(Named("a")) as Arc<dyn Runner>];
        let mut task = Task::new("z", serde_json::Value::Null);

        run_task(&runners, &CancellationToken::new(), &mut task).await;

        assert!(task.error.unwrap().contains("runner not found for task"));
    }

    #[tokio::test]
    async fn panic_is_recorded_with_message() {
        let runners: Vec<Arc<dyn Runner>> = vec![Arc::new(Boom) as Arc<dyn Runner>];
        let mut task = Task::new("any", serde_json::Value::Null);

        run_task(&runners, &CancellationToken::new(), &mut task).await;

        let error = task.error.unwrap();
        assert!(error.contains("unhandled panic"));
        assert!(error.contains("boom"));
        // run_task が消費してログに出している
        assert!(take_panic_backtrace().is_none());
    }

    #[test]
    fn panic_hook_captures_backtrace_on_the_panicking_thread() {
        install_panic_hook();
        take_panic_backtrace();

        let caught = std::panic::catch_unwind(|| panic!("captured"));
        assert!(caught.is_err());

        let backtrace = take_panic_backtrace().expect("hook stored a backtrace");
        assert!(!backtrace.is_empty());
        assert!(take_panic_backtrace().is_none());
    }
}
