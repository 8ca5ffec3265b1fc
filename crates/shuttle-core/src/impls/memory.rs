//! In-memory task repository.
//!
//! `HashMap` を唯一の真実として持ち、tokio の `Mutex` で守る。clone は同じ
//! ストアを共有するので、複数の `Queue` を「同じ DB」に向けるテストに使える。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use tokio::sync::Mutex;

use crate::domain::{StoreError, Task, TaskId, TaskState};
use crate::observability::TaskCounts;
use crate::ports::{PendingTasks, TaskRepository};

/// Stored task plus its insertion sequence (tie-breaker for ordering).
#[derive(Debug, Clone)]
struct StoredTask {
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct InMemoryState {
    /// All tasks (single source of truth).
    tasks: HashMap<TaskId, StoredTask>,

    /// Next insertion sequence.
    next_seq: u64,
}

impl InMemoryState {
    fn counts_by_state(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for stored in self.tasks.values() {
            match stored.task.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Running => counts.running += 1,
                TaskState::Completed => counts.completed += 1,
                TaskState::Failed => counts.failed += 1,
                TaskState::Unknown(_) => counts.unknown += 1,
            }
        }
        counts
    }

    /// Due Pending tasks ordered by (available_time, insertion order).
    fn due_pending(&self) -> Vec<Task> {
        let now = Utc::now();
        let mut due: Vec<&StoredTask> = self
            .tasks
            .values()
            .filter(|stored| stored.task.is_due(now))
            .collect();
        due.sort_by_key(|stored| (stored.task.available_time, stored.seq));
        due.into_iter().map(|stored| stored.task.clone()).collect()
    }
}

/// Repository backed by a `HashMap` behind a tokio mutex. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryTaskRepository {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new task. Fails if the id is already present.
    pub async fn create(&self, mut task: Task) -> Result<Task, StoreError> {
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate(task.id));
        }

        let now = Utc::now();
        task.created_time = now;
        task.modified_time = Some(now);

        let seq = state.next_seq;
        state.next_seq += 1;
        state.tasks.insert(task.id, StoredTask { seq, task: task.clone() });
        Ok(task)
    }

    pub async fn get(&self, id: TaskId) -> Option<Task> {
        let state = self.state.lock().await;
        state.tasks.get(&id).map(|stored| stored.task.clone())
    }

    /// Every task, in insertion order.
    pub async fn list(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        let mut all: Vec<&StoredTask> = state.tasks.values().collect();
        all.sort_by_key(|stored| stored.seq);
        all.into_iter().map(|stored| stored.task.clone()).collect()
    }

    pub async fn counts_by_state(&self) -> TaskCounts {
        let state = self.state.lock().await;
        state.counts_by_state()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn iterate_pending(&self) -> Result<PendingTasks, StoreError> {
        // snapshot を取ってロックはすぐ解放する（stream を読む間ロックを保持しない）
        let due = {
            let state = self.state.lock().await;
            state.due_pending()
        };
        Ok(stream::iter(due.into_iter().map(Ok)).boxed())
    }

    async fn update_from_state(
        &self,
        task: &Task,
        expected: &TaskState,
    ) -> Result<Task, StoreError> {
        let mut state = self.state.lock().await;
        let stored = state
            .tasks
            .get_mut(&task.id)
            .ok_or(StoreError::NotFound(task.id))?;

        if stored.task.state != *expected {
            return Err(StoreError::AlreadyClaimed);
        }

        let mut updated = task.clone();
        updated.modified_time = Some(Utc::now());
        stored.task = updated.clone();
        Ok(updated)
    }
}
