//! shuttle-core
//!
//! 共有ストアをポーリングするタスクキュー。
//!
//! `Queue` は `TaskRepository` から実行可能な Pending タスクを取り出し、状態の
//! compare-and-swap で claim してから、最初にマッチした `Runner` でワーカープール
//! 上で実行し、結果をストアに書き戻す。複数のキューインスタンスが同じストアを
//! 共有してよい。条件付き書き込みによって、1 タスクが同時に実行されるのは
//! 高々 1 回に保たれる。
//!
//! # Modules
//! - **domain**: タスク、状態機械、ID、エラー
//! - **ports**: `TaskRepository`, `Runner`
//! - **app**: `Config`, `Queue`（manager + worker pool）
//! - **impls**: `InMemoryTaskRepository`
//! - **observability**: `TaskCounts`

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{Config, ConfigReporter, EnvReporter, Queue};
pub use domain::{ConfigError, QueueError, StoreError, Task, TaskError, TaskId, TaskState};
pub use impls::InMemoryTaskRepository;
pub use observability::TaskCounts;
pub use ports::{PendingTasks, Runner, TaskRepository};
