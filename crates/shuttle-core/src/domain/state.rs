//! Task state machine.
//!
//! 既知の 4 状態以外の文字列は `Unknown(raw)` として読み込む。壊れたレコードも
//! 表現でき、finalize 時に Failed へ落とされる。

use serde::{Deserialize, Serialize};
use std::fmt;

/// TaskState is the lifecycle position of a task.
///
/// State transitions:
/// - Pending -> Running (claim; compare-and-swap in the repository)
/// - Running -> Completed | Failed (finalize by the claiming instance)
/// - Running -> Pending (handler asked for a reschedule with a future available time)
///
/// `Unknown` carries any stored value that is not one of the known states. It is
/// never produced by this crate; finalization turns it into `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskState {
    /// Waiting for its available time and a free worker.
    Pending,

    /// Claimed by exactly one queue instance and executing.
    Running,

    /// Handler returned without recording an error.
    Completed,

    /// Handler recorded an error, panicked, or an invariant failed.
    Failed,

    /// Unrecognized value read from the store.
    Unknown(String),
}

impl TaskState {
    pub fn as_str(&self) -> &str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Unknown(raw) => raw,
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl From<String> for TaskState {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "pending" => TaskState::Pending,
            "running" => TaskState::Running,
            "completed" => TaskState::Completed,
            "failed" => TaskState::Failed,
            _ => TaskState::Unknown(raw),
        }
    }
}

impl From<&str> for TaskState {
    fn from(raw: &str) -> Self {
        TaskState::from(raw.to_string())
    }
}

impl From<TaskState> for String {
    fn from(state: TaskState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Unknown(raw) => write!(f, "unknown({raw})"),
            known => f.write_str(known.as_str()),
        }
    }
}
