// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;

/// Default number of schedule queues, and thus of delivery threads.
pub const DEFAULT_MAX_THREADS: usize = 10;
/// How long a drained queue keeps its thread parked before handing it back.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_THREAD_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Read once when the coordinator is built; never changes afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchConfig {
    pub max_threads: usize,
    pub idle_timeout: Duration,
    /// Only used when the coordinator builds its own thread pool.
    pub thread_keep_alive: Duration,
    pub thread_name_prefix: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_keep_alive: DEFAULT_THREAD_KEEP_ALIVE,
            thread_name_prefix: "dispatch".to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_thread_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.thread_keep_alive = keep_alive;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::EmptyThreadName);
        }
        Ok(())
    }
}
