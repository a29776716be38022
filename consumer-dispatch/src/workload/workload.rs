// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use serde::{Deserialize, Serialize};

use crate::error::WorkloadError;

/// Synthetic load for the `consumer-dispatch` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    /// Threads that call `dispatch` concurrently.
    #[serde(default = "default_producers")]
    pub producers: usize,
    pub units: Vec<UnitSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSpec {
    pub name: String,
    pub dispatches: usize,
    /// Simulated time spent in each delivery.
    #[serde(default)]
    pub delivery_ms: u64,
    /// Every n-th delivery fails. 0 means never.
    #[serde(default)]
    pub fail_every: u64,
}

fn default_producers() -> usize {
    1
}

impl Workload {
    pub fn total_dispatches(&self) -> u64 {
        self.units.iter().map(|u| u.dispatches as u64).sum()
    }

    pub fn validate(&self) -> Result<(), WorkloadError> {
        if self.producers == 0 {
            return Err(WorkloadError::NoProducers);
        }
        if self.units.is_empty() {
            return Err(WorkloadError::NoUnits);
        }
        Ok(())
    }
}

impl Default for Workload {
    fn default() -> Self {
        let unit = |name: &str, dispatches, delivery_ms, fail_every| UnitSpec {
            name: name.to_string(),
            dispatches,
            delivery_ms,
            fail_every,
        };
        Self {
            producers: 2,
            units: vec![
                unit("orders", 20, 5, 0),
                unit("payments", 10, 10, 4),
                unit("audit", 30, 1, 0),
                unit("notifications", 15, 2, 0),
            ],
        }
    }
}
