//! Domain model (ids, task, state, errors).

pub mod errors;
pub mod ids;
pub mod state;
pub mod task;

pub use self::errors::{ConfigError, QueueError, StoreError};
pub use self::ids::TaskId;
pub use self::state::TaskState;
pub use self::task::{Task, TaskError};
