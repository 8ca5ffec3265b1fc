use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{TaskId, TaskState};

/// Errors recorded on a task, oldest first.
///
/// A task may collect more than one message (e.g. a handler error followed by a
/// failed invariant at finalize), so they are kept as a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    messages: Vec<String>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Does any recorded message contain `needle`?
    pub fn contains(&self, needle: &str) -> bool {
        self.messages.iter().any(|m| m.contains(needle))
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages.join("; "))
    }
}

impl std::error::Error for TaskError {}

/// A persisted, schedulable unit of work.
///
/// Design:
/// - `name` is the discriminator runners match on.
/// - `data` is opaque to the queue; runners decode it as they like.
/// - The queue only writes `state`, `run_time`, `duration` and `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub data: serde_json::Value,
    pub state: TaskState,

    /// Not eligible for claiming before this instant.
    pub available_time: Option<DateTime<Utc>>,

    /// When the current (or last) run was claimed.
    pub run_time: Option<DateTime<Utc>>,

    /// Seconds spent running, truncated to milliseconds.
    pub duration: Option<f64>,

    pub error: Option<TaskError>,

    pub created_time: DateTime<Utc>,
    pub modified_time: Option<DateTime<Utc>>,
}

impl Task {
    /// New Pending task, available immediately.
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            name: name.into(),
            data,
            state: TaskState::Pending,
            available_time: Some(now),
            run_time: None,
            duration: None,
            error: None,
            created_time: now,
            modified_time: None,
        }
    }

    pub fn with_available_time(mut self, available_time: DateTime<Utc>) -> Self {
        self.available_time = Some(available_time);
        self
    }

    pub fn append_error(&mut self, message: impl Into<String>) {
        match &mut self.error {
            Some(error) => error.push(message),
            None => self.error = Some(TaskError::new(message)),
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Pending and its available time has come.
    ///
    /// A missing available time is treated as "never due".
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Pending && self.available_time.is_some_and(|at| at <= now)
    }
}
