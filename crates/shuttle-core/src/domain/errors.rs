//! Error types, one enum per concern.
//!
//! - `ConfigError`: 設定の検証エラー（構築時に致命的）
//! - `StoreError`: リポジトリ操作のエラー。`AlreadyClaimed` は通常の競合
//! - `QueueError`: `Queue` の公開 API が返すエラー

use thiserror::Error;

use super::TaskId;

/// Invalid queue configuration. Always fatal at construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("workers is invalid")]
    InvalidWorkers,

    #[error("delay is invalid")]
    InvalidDelay,
}

/// Errors reported by a task repository.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The stored state no longer matches the expected state. Routine under
    /// contention: another instance won the claim, or the task moved on.
    #[error("task is already claimed or no longer in the expected state")]
    AlreadyClaimed,

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task already exists: {0}")]
    Duplicate(TaskId),

    #[error("failure iterating tasks: {0}")]
    Iteration(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Errors returned by the public `Queue` surface.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("config is invalid: {0}")]
    Config(#[from] ConfigError),

    #[error("queue is already started; runners must be registered before start")]
    AlreadyStarted,
}
