//! TaskRepository port - the shared durable store that is the source of truth.
//!
//! 複数のキューインスタンスが同じストアを共有する。インスタンス間の排他は
//! `update_from_state` の compare-and-swap だけで保証される。

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::{StoreError, Task, TaskState};

/// Lazy, finite sequence of claim candidates.
///
/// Dropping the stream releases whatever the backend holds for it (cursor,
/// snapshot, connection), so every exit path of a polling cycle releases it.
pub type PendingTasks = BoxStream<'static, Result<Task, StoreError>>;

/// Repository contract consumed by the queue.
///
/// # Design principles
/// - `iterate_pending` is called fresh every polling cycle; it must not be
///   assumed to survive across cycles.
/// - `update_from_state` is the only cross-process concurrency primitive.
///   When several callers race the same task with the same expected state,
///   exactly one succeeds and the others get `StoreError::AlreadyClaimed`.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Pending tasks whose available time has come, in a stable
    /// implementation-defined order.
    async fn iterate_pending(&self) -> Result<PendingTasks, StoreError>;

    /// Replace the stored task with `task` iff its persisted state equals
    /// `expected`. Returns the task as stored.
    ///
    /// On mismatch nothing is written and `StoreError::AlreadyClaimed` is
    /// returned.
    async fn update_from_state(&self, task: &Task, expected: &TaskState)
    -> Result<Task, StoreError>;
}
