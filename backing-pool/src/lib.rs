// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Executors that lend raw threads to run-loops.
//!
//! The scheduler in `consumer-dispatch` never spawns threads itself. It asks an
//! [`Executor`] for one whenever a schedule queue leaves its idle state and
//! keeps that thread until the queue has been idle for a while. [`ThreadPool`]
//! is the bounded implementation used in production; tests plug in their own
//! executors to simulate rejection.

use std::io;

use thiserror::Error;

pub mod thread_pool;

pub use thread_pool::{PoolConfig, PoolStats, ThreadPool};

/// A unit of work handed to an executor. It may run for a long time.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum ExecuteError {
    /// All threads are busy and the hand-off queue is full.
    #[error("all {max_threads} threads are busy and the hand-off queue is full")]
    Saturated { max_threads: usize },

    #[error("executor has been shut down")]
    ShutDown,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

pub trait Executor: Send + Sync + 'static {
    /// Hands `task` to a thread. Must not run the task inline on the calling thread.
    fn execute(&self, task: Task) -> Result<(), ExecuteError>;
}
