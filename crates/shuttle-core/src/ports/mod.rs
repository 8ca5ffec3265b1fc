//! Ports - seams to the outside world.
//!
//! - `TaskRepository`: 共有の永続ストア（PostgreSQL, MongoDB, in-memory, ...）
//! - `Runner`: タスクを実行するビジネスロジック

pub mod runner;
pub mod task_repository;

pub use self::runner::Runner;
pub use self::task_repository::{PendingTasks, TaskRepository};
