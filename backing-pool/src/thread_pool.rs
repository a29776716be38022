// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};

use crate::{ExecuteError, Executor, Task};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound of OS threads alive at the same time.
    pub max_threads: usize,
    /// Tasks that may wait for a busy thread before `execute` rejects.
    pub queue_capacity: usize,
    /// How long an idle thread is cached before it exits.
    pub keep_alive: Duration,
    pub name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_threads: 10,
            queue_capacity: 10,
            keep_alive: Duration::from_secs(60),
            name_prefix: "backing-pool".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub live_threads: usize,
    pub idle_threads: usize,
    pub queued_tasks: usize,
    pub spawned_total: u64,
}

struct PoolState {
    tasks: VecDeque<Task>,
    live: usize,
    idle: usize,
    spawned: u64,
    shut_down: bool,
}

struct Shared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    work_available: Condvar,
    all_exited: Condvar,
}

/// Bounded executor that caches idle threads for `keep_alive`.
pub struct ThreadPool {
    shared: Arc<Shared>,
}

impl ThreadPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(PoolState {
                    tasks: VecDeque::new(),
                    live: 0,
                    idle: 0,
                    spawned: 0,
                    shut_down: false,
                }),
                work_available: Condvar::new(),
                all_exited: Condvar::new(),
            }),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            live_threads: state.live,
            idle_threads: state.idle,
            queued_tasks: state.tasks.len(),
            spawned_total: state.spawned,
        }
    }

    /// Rejects new tasks, lets queued ones finish and waits for every thread to exit.
    ///
    /// Returns `false` if threads were still alive when `timeout` elapsed. A
    /// `timeout` too large for an `Instant` waits without a deadline.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.shared.state.lock();
        state.shut_down = true;
        self.shared.work_available.notify_all();
        while state.live > 0 {
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .all_exited
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        return state.live == 0;
                    }
                }
                None => self.shared.all_exited.wait(&mut state),
            }
        }
        debug!("{} shut down", self.shared.config.name_prefix);
        true
    }
}

impl Executor for ThreadPool {
    fn execute(&self, task: Task) -> Result<(), ExecuteError> {
        let mut state = self.shared.state.lock();
        if state.shut_down {
            return Err(ExecuteError::ShutDown);
        }

        // an idle thread that is not yet claimed by a queued task picks it up
        if state.idle > state.tasks.len() {
            state.tasks.push_back(task);
            self.shared.work_available.notify_one();
            return Ok(());
        }

        if state.live < self.shared.config.max_threads {
            state.tasks.push_back(task);
            if let Err(e) = spawn_worker(&self.shared, &mut state) {
                state.tasks.pop_back();
                return Err(e);
            }
            return Ok(());
        }

        if state.tasks.len() < self.shared.config.queue_capacity {
            state.tasks.push_back(task);
            return Ok(());
        }

        Err(ExecuteError::Saturated {
            max_threads: self.shared.config.max_threads,
        })
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.shut_down = true;
        self.shared.work_available.notify_all();
    }
}

fn spawn_worker(shared: &Arc<Shared>, state: &mut PoolState) -> Result<(), ExecuteError> {
    let name = format!("{}-{}", shared.config.name_prefix, state.spawned);
    let worker_shared = Arc::clone(shared);
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || worker_loop(worker_shared))
        .map_err(ExecuteError::Spawn)?;
    state.live += 1;
    state.spawned += 1;
    debug!("Spawned {name} ({} live)", state.live);
    Ok(())
}

fn worker_loop(shared: Arc<Shared>) {
    let _exit = WorkerExit { shared: &shared };
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                if let Some(task) = state.tasks.pop_front() {
                    break task;
                }
                if state.shut_down {
                    return;
                }
                state.idle += 1;
                let timed_out = shared
                    .work_available
                    .wait_for(&mut state, shared.config.keep_alive)
                    .timed_out();
                state.idle -= 1;
                if timed_out && state.tasks.is_empty() {
                    return;
                }
            }
        };
        task();
    }
}

/// Keeps the thread count right when a worker leaves, including by unwinding.
struct WorkerExit<'a> {
    shared: &'a Arc<Shared>,
}

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.live -= 1;
        if thread::panicking() {
            warn!(
                "{} terminated by a panicking task",
                thread::current().name().unwrap_or("worker")
            );
            if !state.shut_down && state.tasks.len() > state.idle {
                if let Err(e) = spawn_worker(self.shared, &mut state) {
                    error!("Failed to replace terminated worker: {e}");
                }
            }
        }
        if state.live == 0 {
            self.shared.all_exited.notify_all();
        }
    }
}
