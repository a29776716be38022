// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use backing_pool::{Executor, PoolConfig, ThreadPool};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::config::DispatchConfig;
use crate::diagnostics::{Diagnostics, Incident, IncidentSink};
use crate::error::ConfigError;
use crate::scheduler::idle_stack::IdleStack;
use crate::scheduler::schedule_queue::{QueueSnapshot, ScheduleQueue};
use crate::scheduler::work_unit::{UnitKey, WorkUnit};

/// State shared between the coordinator and the run-loops it lends out.
///
/// Lock order: queue -> affinity -> idle stack. `dispatch` takes affinity and
/// idle stack (or the cursor) and releases them before it touches a queue.
pub(crate) struct Shared {
    pub(crate) queues: Box<[ScheduleQueue]>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) idle_timeout: Duration,
    idle: IdleStack,
    /// Unit -> queue holding its work. Entries only live while their queue
    /// has something pending, so the map is bounded by the queued units.
    affinity: Mutex<HashMap<UnitKey, usize>>,
    cursor: Mutex<usize>,
    sink: Arc<dyn IncidentSink>,
    closing: AtomicBool,
    active: Mutex<usize>,
    quiescent: Condvar,
}

impl Shared {
    /// Affinity first, then a drained queue, then round robin over busy ones.
    fn route(&self, key: UnitKey) -> usize {
        let mut affinity = self.affinity.lock();
        if let Some(&index) = affinity.get(&key) {
            return index;
        }
        if let Some(index) = self.idle.pop() {
            affinity.insert(key, index);
            return index;
        }
        drop(affinity);

        let mut cursor = self.cursor.lock();
        let index = *cursor;
        *cursor = (index + 1) % self.queues.len();
        debug!("overflow dispatch to queue {index}");
        index
    }

    /// A queue ran dry.
    ///
    /// Every binding to it is released together with pushing it on the idle
    /// stack, under the affinity lock, so `dispatch` sees either both or neither.
    /// That covers the unit delivered last as well as units that were bound
    /// earlier and dropped since, whose addresses may be reused.
    pub(crate) fn park_queue(&self, queue: usize) {
        let mut affinity = self.affinity.lock();
        self.idle.push(queue);
        affinity.retain(|_, bound| *bound != queue);
    }

    /// Binds `unit` to `queue` unless it is already bound elsewhere.
    pub(crate) fn bind(&self, unit: UnitKey, queue: usize) {
        self.affinity.lock().entry(unit).or_insert(queue);
    }

    pub(crate) fn return_to_idle_stack(&self, queue: usize) {
        let _affinity = self.affinity.lock();
        self.idle.push(queue);
    }

    pub(crate) fn queue_started(&self) {
        *self.active.lock() += 1;
    }

    pub(crate) fn queue_stopped(&self) {
        let mut active = self.active.lock();
        *active -= 1;
        if *active == 0 {
            self.quiescent.notify_all();
        }
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub(crate) fn record(&self, incident: Incident) {
        self.sink.record(incident);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorSnapshot {
    pub queues: Vec<QueueSnapshot>,
    /// Idle stack, bottom to top.
    pub idle: Vec<usize>,
    pub bindings: usize,
    pub cursor: usize,
    pub active_queues: usize,
    pub closed: bool,
}

/// Multiplexes work units onto a fixed set of schedule queues.
///
/// There is usually one per process; hand it to producers as `Arc<Coordinator>`.
pub struct Coordinator {
    shared: Arc<Shared>,
    config: DispatchConfig,
    owned_pool: Option<Arc<ThreadPool>>,
}

impl Coordinator {
    pub fn new(
        config: DispatchConfig,
        executor: Arc<dyn Executor>,
        sink: Arc<dyn IncidentSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let max_threads = config.max_threads;

        let queues: Box<[ScheduleQueue]> = (0..max_threads).map(ScheduleQueue::new).collect();
        let idle = IdleStack::new(max_threads);
        // queue 0 ends up on top
        for index in (0..max_threads).rev() {
            idle.push(index);
        }

        info!(
            "Starting dispatch coordinator with {} queues, idle timeout {:?}",
            max_threads, config.idle_timeout
        );

        Ok(Self {
            shared: Arc::new(Shared {
                queues,
                executor,
                idle_timeout: config.idle_timeout,
                idle,
                affinity: Mutex::new(HashMap::new()),
                cursor: Mutex::new(0),
                sink,
                closing: AtomicBool::new(false),
                active: Mutex::new(0),
                quiescent: Condvar::new(),
            }),
            config,
            owned_pool: None,
        })
    }

    /// Builds a coordinator backed by its own [`ThreadPool`] with one thread per queue.
    pub fn with_thread_pool(config: DispatchConfig) -> Result<Self, ConfigError> {
        Self::with_thread_pool_and_sink(config, Arc::new(Diagnostics::default()))
    }

    pub fn with_thread_pool_and_sink(
        config: DispatchConfig,
        sink: Arc<dyn IncidentSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = Arc::new(ThreadPool::new(PoolConfig {
            max_threads: config.max_threads,
            // room for a queue that hands over from a panicking worker
            queue_capacity: config.max_threads,
            keep_alive: config.thread_keep_alive,
            name_prefix: config.thread_name_prefix.clone(),
        }));
        let mut coordinator = Self::new(config, pool.clone(), sink)?;
        coordinator.owned_pool = Some(pool);
        Ok(coordinator)
    }

    /// Schedules one call of `unit.deliver_messages()`.
    ///
    /// Never blocks beyond short lock holds and never reports failures; those
    /// go to the incident sink.
    pub fn dispatch(&self, unit: Arc<dyn WorkUnit>) {
        if self.shared.is_closing() {
            warn!("Dispatcher closed, dropping work for {}", unit.desc());
            return;
        }
        let index = self.shared.route(UnitKey::of(&unit));
        self.shared.queues[index].add_work(&self.shared, unit);
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn max_threads(&self) -> usize {
        self.shared.queues.len()
    }

    /// Number of queues that currently own a thread, running or parked.
    pub fn active_queues(&self) -> usize {
        *self.shared.active.lock()
    }

    pub fn thread_pool(&self) -> Option<&Arc<ThreadPool>> {
        self.owned_pool.as_ref()
    }

    /// Blocks until every queue has handed its thread back.
    ///
    /// A `timeout` too large for an `Instant` waits without a deadline.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut active = self.shared.active.lock();
        while *active > 0 {
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .quiescent
                        .wait_until(&mut active, deadline)
                        .timed_out()
                    {
                        return *active == 0;
                    }
                }
                None => self.shared.quiescent.wait(&mut active),
            }
        }
        true
    }

    /// Stops accepting work. Parked threads are released right away, running
    /// queues drain what they already hold first.
    pub fn close(&self) {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Closing dispatch coordinator");
        for queue in self.shared.queues.iter() {
            queue.nudge();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closing()
    }

    /// Closes, waits for the queues to drain and shuts down the owned pool.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        self.close();
        let drained = self.wait_until_idle(timeout);
        if !drained {
            warn!("Dispatch queues still busy after {timeout:?}");
        }
        let released = match &self.owned_pool {
            Some(pool) => pool.shutdown(
                deadline.map_or(timeout, |d| d.saturating_duration_since(Instant::now())),
            ),
            None => true,
        };
        info!("Dispatch coordinator stopped");
        drained && released
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        let queues = self.shared.queues.iter().map(|q| q.snapshot()).collect();
        CoordinatorSnapshot {
            queues,
            idle: self.shared.idle.snapshot(),
            bindings: self.shared.affinity.lock().len(),
            cursor: *self.shared.cursor.lock(),
            active_queues: self.active_queues(),
            closed: self.is_closed(),
        }
    }

    #[cfg(test)]
    pub(crate) fn bound_queue(&self, unit: &Arc<dyn WorkUnit>) -> Option<usize> {
        self.shared.affinity.lock().get(&UnitKey::of(unit)).copied()
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        // parked run-loops hold the shared state; let them go now
        self.close();
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("max_threads", &self.max_threads())
            .field("active_queues", &self.active_queues())
            .field("closed", &self.is_closed())
            .finish()
    }
}
