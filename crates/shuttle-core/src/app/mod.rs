//! App - configuration, the queue manager and its worker pool.
//!
//! - **config**: `Config` と読み込み元（`ConfigReporter`）
//! - **queue**: 公開 API の `Queue`（new / register_runner / start / stop）
//! - **manager**: 唯一の判断ループ（poll, claim, dispatch, finalize）
//! - **worker_pool**: runner の選択と panic 回復を行う実行器

pub mod config;
pub mod queue;

mod manager;
mod worker_pool;

pub use self::config::{Config, ConfigReporter, EnvReporter};
pub use self::queue::Queue;
