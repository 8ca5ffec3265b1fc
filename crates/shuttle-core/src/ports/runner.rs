//! Runner port - business handlers plugged into the queue.
//!
//! runner は登録順に `can_run_task` で評価され、最初に true を返したものだけが
//! `run` する。`run` はタスクをその場で書き換える（エラーの追記、または未来の
//! `available_time` 付きで Pending に戻して再スケジュール）。

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::Task;

/// A capability that recognizes and executes a category of tasks.
///
/// Runners are consulted in registration order; the first one whose
/// `can_run_task` returns true executes the task.
///
/// # Recording outcomes
/// `run` reports through the task itself:
/// - return without touching it -> Completed
/// - `task.append_error(..)` -> Failed
/// - set `state = Pending` with a future `available_time` -> rescheduled
///
/// # Example
/// ```ignore
/// struct Hello;
///
/// #[async_trait]
/// impl Runner for Hello {
///     fn can_run_task(&self, task: &Task) -> bool {
///         task.name == "hello"
///     }
///
///     async fn run(&self, _cancel: CancellationToken, task: &mut Task) {
///         println!("Hello, {}!", task.data["name"]);
///     }
/// }
/// ```
#[async_trait]
pub trait Runner: Send + Sync {
    /// Must be side-effect free; it may be called for tasks this runner never runs.
    fn can_run_task(&self, task: &Task) -> bool;

    /// Execute the task. `cancel` fires when the queue is stopping; long
    /// handlers should honor it.
    async fn run(&self, cancel: CancellationToken, task: &mut Task);
}
