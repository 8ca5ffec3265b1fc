//! Implementations of the ports.
//!
//! - `InMemoryTaskRepository`: 開発・テスト用のストア

pub mod memory;

pub use self::memory::InMemoryTaskRepository;
