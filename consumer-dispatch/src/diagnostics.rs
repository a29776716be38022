// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! First-failure data capture for the scheduler.
//!
//! Nothing the scheduler runs into is reported back to the caller of
//! `dispatch`. Failed deliveries, panicking deliveries and threads that could
//! not be obtained end up here as [`Incident`]s instead.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::VecDeque;

use backing_pool::ExecuteError;
use log::{debug, error, warn};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncidentKind {
    /// `deliver_messages` returned an error; the queue kept going.
    DeliveryFailed,
    /// `deliver_messages` panicked; the worker thread was given up.
    DeliveryPanicked,
    /// The executor refused to lend a thread to a queue.
    ThreadUnavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub queue: usize,
    pub unit: String,
    pub kind: IncidentKind,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,
}

impl Incident {
    pub fn delivery_failed(queue: usize, unit: &str, err: &anyhow::Error) -> Self {
        Self {
            queue,
            unit: unit.to_string(),
            kind: IncidentKind::DeliveryFailed,
            detail: format!("{err:#}"),
            backtrace: None,
        }
    }

    pub fn delivery_panicked(queue: usize, unit: &str, payload: &(dyn Any + Send)) -> Self {
        Self {
            queue,
            unit: unit.to_string(),
            kind: IncidentKind::DeliveryPanicked,
            detail: panic_message(payload),
            backtrace: captured_backtrace(),
        }
    }

    pub fn thread_unavailable(queue: usize, unit: &str, err: &ExecuteError) -> Self {
        Self {
            queue,
            unit: unit.to_string(),
            kind: IncidentKind::ThreadUnavailable,
            detail: err.to_string(),
            backtrace: None,
        }
    }

    fn same_as(&self, other: &Incident) -> bool {
        self.queue == other.queue && self.kind == other.kind && self.detail == other.detail
    }
}

pub trait IncidentSink: Send + Sync + 'static {
    fn record(&self, incident: Incident);
}

struct DiagnosticsState {
    recent: VecDeque<Incident>,
    total: u64,
    // consecutive duplicates are only logged at debug level
    repeats: u64,
}

/// Default sink: logs every incident and keeps the most recent ones.
pub struct Diagnostics {
    capacity: usize,
    state: Mutex<DiagnosticsState>,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(DiagnosticsState {
                recent: VecDeque::with_capacity(capacity),
                total: 0,
                repeats: 0,
            }),
        }
    }

    pub fn incidents(&self) -> Vec<Incident> {
        self.state.lock().recent.iter().cloned().collect()
    }

    pub fn total(&self) -> u64 {
        self.state.lock().total
    }

    /// Counts among the retained incidents only; see [`Diagnostics::total`].
    pub fn count(&self, kind: IncidentKind) -> usize {
        self.state
            .lock()
            .recent
            .iter()
            .filter(|i| i.kind == kind)
            .count()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(256)
    }
}

impl IncidentSink for Diagnostics {
    fn record(&self, incident: Incident) {
        let mut state = self.state.lock();
        state.total += 1;

        let repeated = state
            .recent
            .back()
            .map(|last| last.same_as(&incident))
            .unwrap_or(false);
        if repeated {
            state.repeats += 1;
            debug!(
                "queue {}: {:?} for {} repeated ({} times)",
                incident.queue, incident.kind, incident.unit, state.repeats
            );
        } else {
            state.repeats = 0;
            log_incident(&incident);
        }

        if self.capacity == 0 {
            return;
        }
        if state.recent.len() == self.capacity {
            state.recent.pop_front();
        }
        state.recent.push_back(incident);
    }
}

fn log_incident(incident: &Incident) {
    match incident.kind {
        IncidentKind::DeliveryFailed => warn!(
            "queue {}: delivery for {} failed: {}",
            incident.queue, incident.unit, incident.detail
        ),
        IncidentKind::DeliveryPanicked => {
            error!(
                "queue {}: delivery for {} panicked: {}",
                incident.queue, incident.unit, incident.detail
            );
            if let Some(backtrace) = &incident.backtrace {
                debug!("{backtrace}");
            }
        }
        IncidentKind::ThreadUnavailable => error!(
            "queue {}: no thread available for {}: {}",
            incident.queue, incident.unit, incident.detail
        ),
    }
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn captured_backtrace() -> Option<String> {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_only_most_recent_incidents() {
        let diagnostics = Diagnostics::new(2);
        for i in 0..3 {
            diagnostics.record(Incident::delivery_failed(
                i,
                "unit",
                &anyhow::anyhow!("failure {i}"),
            ));
        }
        let incidents = diagnostics.incidents();
        assert_eq!(diagnostics.total(), 3);
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].detail, "failure 1");
        assert_eq!(incidents[1].detail, "failure 2");
    }

    #[test]
    fn test_panic_message_from_payload() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 42)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 42");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(7u32)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_error_chain_is_kept() {
        let err = anyhow::anyhow!("broker unreachable").context("delivering batch");
        let incident = Incident::delivery_failed(0, "orders", &err);
        assert_eq!(incident.detail, "delivering batch: broker unreachable");
        assert_eq!(incident.kind, IncidentKind::DeliveryFailed);
    }
}
