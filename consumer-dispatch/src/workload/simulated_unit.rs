// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::bail;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::scheduler::work_unit::WorkUnit;
use crate::workload::workload::UnitSpec;

/// Counts finished deliveries across all units of a run.
#[derive(Default)]
pub struct Progress {
    done: Mutex<u64>,
    cvar: Condvar,
}

impl Progress {
    fn finished_one(&self) {
        *self.done.lock() += 1;
        self.cvar.notify_all();
    }

    pub fn done(&self) -> u64 {
        *self.done.lock()
    }

    /// Returns `false` if fewer than `target` deliveries finished within `timeout`.
    pub fn wait_for(&self, target: u64, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut done = self.done.lock();
        while *done < target {
            match deadline {
                Some(deadline) => {
                    if self.cvar.wait_until(&mut done, deadline).timed_out() {
                        return *done >= target;
                    }
                }
                None => self.cvar.wait(&mut done),
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub name: String,
    pub dispatched: usize,
    pub delivered: u64,
    pub failed: u64,
    /// Deliveries that started while another one of the same unit was still running.
    pub overlaps: u64,
}

/// A work unit that sleeps instead of delivering messages.
pub struct SimulatedUnit {
    spec: UnitSpec,
    progress: Arc<Progress>,
    delivered: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicUsize,
    overlaps: AtomicU64,
}

impl SimulatedUnit {
    pub fn new(spec: UnitSpec, progress: Arc<Progress>) -> Self {
        Self {
            spec,
            progress,
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            overlaps: AtomicU64::new(0),
        }
    }

    pub fn spec(&self) -> &UnitSpec {
        &self.spec
    }

    pub fn report(&self) -> UnitReport {
        UnitReport {
            name: self.spec.name.clone(),
            dispatched: self.spec.dispatches,
            delivered: self.delivered.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            overlaps: self.overlaps.load(Ordering::SeqCst),
        }
    }

    fn deliver(&self) -> anyhow::Result<()> {
        if self.spec.delivery_ms > 0 {
            thread::sleep(Duration::from_millis(self.spec.delivery_ms));
        }
        let n = self.delivered.fetch_add(1, Ordering::SeqCst) + 1;
        if self.spec.fail_every > 0 && n % self.spec.fail_every == 0 {
            self.failed.fetch_add(1, Ordering::SeqCst);
            bail!("simulated failure on delivery {n}");
        }
        Ok(())
    }
}

impl WorkUnit for SimulatedUnit {
    fn desc(&self) -> &str {
        &self.spec.name
    }

    fn deliver_messages(&self) -> anyhow::Result<()> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let result = self.deliver();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.progress.finished_one();
        result
    }
}
