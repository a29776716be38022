// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_threads must be at least 1")]
    NoThreads,

    #[error("idle_timeout must be greater than zero")]
    ZeroIdleTimeout,

    #[error("thread_name_prefix must not be empty")]
    EmptyThreadName,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkloadError {
    #[error("producers must be at least 1")]
    NoProducers,

    #[error("workload has no units")]
    NoUnits,
}
