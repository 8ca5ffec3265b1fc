//! Queue configuration.
//!
//! 認識するキー:
//! - `workers`: ワーカー数。1 以上の整数（既定 1）
//! - `delay`: ポーリング間隔（秒、整数）。0 以上（既定 60）
//!
//! 未指定のキーは現在の値を保つ。`0` は最小間隔（1ms）でのポーリングになる。

use std::collections::HashMap;
use std::time::Duration;

use crate::domain::ConfigError;

/// Source of raw configuration values.
pub trait ConfigReporter {
    fn get(&self, key: &str) -> Option<String>;
}

impl ConfigReporter for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Reads `<prefix><KEY>` from the process environment.
///
/// `EnvReporter::new("SHUTTLE_")` maps `workers` to `SHUTTLE_WORKERS`.
#[derive(Debug, Clone)]
pub struct EnvReporter {
    prefix: String,
}

impl EnvReporter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl ConfigReporter for EnvReporter {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(format!("{}{}", self.prefix, key.to_uppercase())).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub workers: usize,
    pub delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 1,
            delay: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Overlay values from `reporter`. Absent keys keep their current value.
    pub fn load(&mut self, reporter: &dyn ConfigReporter) -> Result<(), ConfigError> {
        if let Some(raw) = reporter.get("workers") {
            let workers: i64 = raw.trim().parse().map_err(|_| ConfigError::InvalidWorkers)?;
            self.workers = usize::try_from(workers).map_err(|_| ConfigError::InvalidWorkers)?;
        }
        if let Some(raw) = reporter.get("delay") {
            let delay: i64 = raw.trim().parse().map_err(|_| ConfigError::InvalidDelay)?;
            let delay = u64::try_from(delay).map_err(|_| ConfigError::InvalidDelay)?;
            self.delay = Duration::from_secs(delay);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers < 1 {
            return Err(ConfigError::InvalidWorkers);
        }
        // Duration は負にならない。負の入力は `load` の時点で弾いている
        Ok(())
    }
}
