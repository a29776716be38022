// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggedDelivery {
    pub unit: String,

    /// n-th delivery of this unit, starting at 1
    pub seq: u64,

    pub thread: String,

    pub started_nsec: u128,

    pub finished_nsec: u128,

    pub failed: bool,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct DeliveryLog {
    pub deliveries: Vec<LoggedDelivery>,
}

impl DeliveryLog {
    pub fn for_unit(&self, unit: &str) -> Vec<&LoggedDelivery> {
        self.deliveries.iter().filter(|d| d.unit == unit).collect()
    }

    /// True if two deliveries of `unit` were running at the same time.
    pub fn overlaps(&self, unit: &str) -> bool {
        let mut spans: Vec<(u128, u128)> = self
            .for_unit(unit)
            .iter()
            .map(|d| (d.started_nsec, d.finished_nsec))
            .collect();
        spans.sort();
        spans.windows(2).any(|w| w[1].0 < w[0].1)
    }

    pub fn threads(&self, unit: &str) -> Vec<String> {
        let mut threads: Vec<String> = self
            .for_unit(unit)
            .iter()
            .map(|d| d.thread.clone())
            .collect();
        threads.sort();
        threads.dedup();
        threads
    }
}
