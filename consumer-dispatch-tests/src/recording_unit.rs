// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::bail;
use consumer_dispatch::WorkUnit;
use parking_lot::Mutex;

use crate::delivery_log::{DeliveryLog, LoggedDelivery};
use crate::sync_tools::{ConcurrencyProbe, Gate};

/// Collects the deliveries of all units created from it.
pub struct Recorder {
    epoch: Instant,
    log: Mutex<DeliveryLog>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            epoch: Instant::now(),
            log: Mutex::new(DeliveryLog::default()),
        })
    }

    pub fn unit(self: &Arc<Self>, name: &str) -> RecordingUnit {
        RecordingUnit {
            name: name.to_string(),
            recorder: self.clone(),
            started: AtomicU64::new(0),
            finished: AtomicU64::new(0),
            gate: None,
            delay: Duration::ZERO,
            fail_on: Vec::new(),
            probe: None,
        }
    }

    pub fn log(&self) -> DeliveryLog {
        self.log.lock().clone()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&*self.log.lock()).unwrap_or_default()
    }
}

pub struct RecordingUnit {
    name: String,
    recorder: Arc<Recorder>,
    started: AtomicU64,
    finished: AtomicU64,
    gate: Option<Arc<Gate>>,
    delay: Duration,
    fail_on: Vec<u64>,
    probe: Option<Arc<ConcurrencyProbe>>,
}

impl RecordingUnit {
    /// Every delivery waits for `gate` before it completes.
    pub fn with_gate(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The `seq`-th delivery (starting at 1) returns an error.
    pub fn failing_on(mut self, seq: u64) -> Self {
        self.fail_on.push(seq);
        self
    }

    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> u64 {
        self.finished.load(Ordering::SeqCst)
    }
}

impl WorkUnit for RecordingUnit {
    fn desc(&self) -> &str {
        &self.name
    }

    fn deliver_messages(&self) -> anyhow::Result<()> {
        if let Some(probe) = &self.probe {
            probe.enter();
        }
        let seq = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        let started_nsec = self.recorder.epoch.elapsed().as_nanos();

        if let Some(gate) = &self.gate {
            gate.wait();
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let failed = self.fail_on.contains(&seq);
        let current = thread::current();
        let thread = current
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", current.id()));
        self.recorder.log.lock().deliveries.push(LoggedDelivery {
            unit: self.name.clone(),
            seq,
            thread,
            started_nsec,
            finished_nsec: self.recorder.epoch.elapsed().as_nanos(),
            failed,
        });

        if let Some(probe) = &self.probe {
            probe.leave();
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        if failed {
            bail!("{} failed on delivery {seq}", self.name);
        }
        Ok(())
    }
}
