// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use log::debug;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;

use crate::diagnostics::Incident;
use crate::scheduler::coordinator::Shared;
use crate::scheduler::work_unit::{UnitKey, WorkUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueState {
    /// No thread owns the queue.
    Idle,
    /// A thread is executing the run-loop.
    Running,
    /// A thread is parked with a bounded wait and nothing is pending.
    Waiting,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub index: usize,
    pub state: QueueState,
    pub pending: usize,
    pub deliveries: u64,
    pub failures: u64,
    pub threads_requested: u64,
}

struct QueueInner {
    state: QueueState,
    pending: VecDeque<Arc<dyn WorkUnit>>,
    deliveries: u64,
    failures: u64,
    threads_requested: u64,
}

enum Delivery {
    Done,
    Failed,
    Panicked(Box<dyn Any + Send>),
}

/// A FIFO of work units that runs on at most one borrowed thread at a time.
pub(crate) struct ScheduleQueue {
    index: usize,
    inner: Mutex<QueueInner>,
    wake: Condvar,
}

impl ScheduleQueue {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            inner: Mutex::new(QueueInner {
                state: QueueState::Idle,
                pending: VecDeque::new(),
                deliveries: 0,
                failures: 0,
                threads_requested: 0,
            }),
            wake: Condvar::new(),
        }
    }

    pub(crate) fn add_work(&self, shared: &Arc<Shared>, unit: Arc<dyn WorkUnit>) {
        let mut inner = self.inner.lock();
        inner.pending.push_back(unit);
        match inner.state {
            QueueState::Running => {}
            QueueState::Waiting => {
                inner.state = QueueState::Running;
                self.wake.notify_one();
            }
            QueueState::Idle => {
                debug!("queue {}: idle -> running", self.index);
                inner.state = QueueState::Running;
                shared.queue_started();
                self.request_thread(shared, &mut inner);
            }
        }
    }

    /// Wakes a parked thread so it can notice that the coordinator is closing.
    pub(crate) fn nudge(&self) {
        let _inner = self.inner.lock();
        self.wake.notify_all();
    }

    pub(crate) fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.lock();
        QueueSnapshot {
            index: self.index,
            state: inner.state,
            pending: inner.pending.len(),
            deliveries: inner.deliveries,
            failures: inner.failures,
            threads_requested: inner.threads_requested,
        }
    }

    /// Lends the run-loop to the executor. On rejection the queue falls back to
    /// idle and goes back on the idle stack, keeping its pending units, so the
    /// next dispatch that lands here tries again.
    fn request_thread(&self, shared: &Arc<Shared>, inner: &mut QueueInner) {
        inner.threads_requested += 1;
        let run_shared = Arc::clone(shared);
        let index = self.index;
        let result = shared
            .executor
            .execute(Box::new(move || run_shared.queues[index].run(&run_shared)));

        if let Err(err) = result {
            let unit = inner
                .pending
                .front()
                .map(|u| u.desc().to_string())
                .unwrap_or_default();
            shared.record(Incident::thread_unavailable(index, &unit, &err));
            inner.state = QueueState::Idle;
            shared.queue_stopped();
            shared.return_to_idle_stack(index);
        }
    }

    fn run(&self, shared: &Arc<Shared>) {
        let mut inner = self.inner.lock();
        loop {
            let Some(unit) = inner.pending.pop_front() else {
                // the previous thread already drained everything
                inner.state = QueueState::Idle;
                shared.queue_stopped();
                shared.return_to_idle_stack(self.index);
                return;
            };
            let delivery = MutexGuard::unlocked(&mut inner, || self.deliver(shared, &unit));
            inner.deliveries += 1;
            match delivery {
                Delivery::Done => {}
                Delivery::Failed => inner.failures += 1,
                Delivery::Panicked(payload) => {
                    inner.failures += 1;
                    self.hand_over(shared, &mut inner);
                    drop(inner);
                    panic::resume_unwind(payload);
                }
            }

            if inner.pending.is_empty() {
                shared.park_queue(self.index);
                inner.state = QueueState::Waiting;
                if !self.park(shared, &mut inner) {
                    return;
                }
            }

            if let Some(next) = inner.pending.front() {
                shared.bind(UnitKey::of(next), self.index);
            }
        }
    }

    fn deliver(&self, shared: &Shared, unit: &Arc<dyn WorkUnit>) -> Delivery {
        match panic::catch_unwind(AssertUnwindSafe(|| unit.deliver_messages())) {
            Ok(Ok(())) => Delivery::Done,
            Ok(Err(err)) => {
                shared.record(Incident::delivery_failed(self.index, unit.desc(), &err));
                Delivery::Failed
            }
            Err(payload) => {
                shared.record(Incident::delivery_panicked(
                    self.index,
                    unit.desc(),
                    payload.as_ref(),
                ));
                Delivery::Panicked(payload)
            }
        }
    }

    /// Parks the thread until work arrives or the idle timeout elapses.
    ///
    /// Returns `false` if the queue went idle and the thread must be released.
    fn park(&self, shared: &Shared, inner: &mut MutexGuard<'_, QueueInner>) -> bool {
        // no deadline when the timeout does not fit into an Instant
        let deadline = Instant::now().checked_add(shared.idle_timeout);
        while inner.state == QueueState::Waiting {
            if shared.is_closing() {
                break;
            }
            match deadline {
                Some(deadline) => {
                    if self.wake.wait_until(inner, deadline).timed_out() {
                        break;
                    }
                }
                None => self.wake.wait(inner),
            }
        }

        if inner.state == QueueState::Waiting {
            debug!("queue {}: waiting -> idle, releasing thread", self.index);
            inner.state = QueueState::Idle;
            shared.queue_stopped();
            return false;
        }
        true
    }

    /// Leaves the queue consistent for a thread that is about to unwind.
    fn hand_over(&self, shared: &Arc<Shared>, inner: &mut QueueInner) {
        match inner.pending.front().map(UnitKey::of) {
            None => {
                shared.park_queue(self.index);
                inner.state = QueueState::Idle;
                shared.queue_stopped();
            }
            Some(next) => {
                debug!(
                    "queue {}: worker lost, requesting a replacement thread",
                    self.index
                );
                shared.bind(next, self.index);
                self.request_thread(shared, inner);
            }
        }
    }
}
