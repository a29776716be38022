// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::bail;
use log::{debug, info};
use serde::Serialize;

use crate::config::DispatchConfig;
use crate::scheduler::coordinator::{Coordinator, CoordinatorSnapshot};
use crate::scheduler::work_unit::WorkUnit;
use crate::workload::simulated_unit::{Progress, SimulatedUnit, UnitReport};
use crate::workload::workload::Workload;

#[derive(Debug, Clone, Serialize)]
pub struct WorkloadReport {
    pub config: DispatchConfig,
    pub elapsed_ms: u128,
    pub units: Vec<UnitReport>,
    pub snapshot: CoordinatorSnapshot,
}

/// Feeds `workload` into `coordinator` and waits until every dispatch was delivered.
pub fn run_workload(
    coordinator: &Coordinator,
    workload: &Workload,
    timeout: Duration,
) -> anyhow::Result<WorkloadReport> {
    workload.validate()?;

    let progress = Arc::new(Progress::default());
    let units: Vec<Arc<SimulatedUnit>> = workload
        .units
        .iter()
        .map(|spec| Arc::new(SimulatedUnit::new(spec.clone(), progress.clone())))
        .collect();

    // interleave the units so every producer sees a mix of them
    let rounds = units.iter().map(|u| u.spec().dispatches).max().unwrap_or(0);
    let mut orders: Vec<Arc<dyn WorkUnit>> = Vec::new();
    for round in 0..rounds {
        for unit in units.iter().filter(|u| u.spec().dispatches > round) {
            orders.push(unit.clone());
        }
    }

    let begin = Instant::now();
    let producers = workload.producers;
    thread::scope(|scope| {
        for producer in 0..producers {
            let orders = &orders;
            scope.spawn(move || {
                let mut sent = 0;
                for unit in orders.iter().skip(producer).step_by(producers) {
                    coordinator.dispatch(unit.clone());
                    sent += 1;
                }
                debug!("producer {producer} dispatched {sent} work items");
            });
        }
    });

    let expected = workload.total_dispatches();
    if !progress.wait_for(expected, timeout) {
        bail!(
            "only {} of {} deliveries finished within {:?}",
            progress.done(),
            expected,
            timeout
        );
    }
    let elapsed = begin.elapsed();
    info!("{expected} deliveries finished in {elapsed:?}");

    let report = WorkloadReport {
        config: coordinator.config().clone(),
        elapsed_ms: elapsed.as_millis(),
        units: units.iter().map(|u| u.report()).collect(),
        snapshot: coordinator.snapshot(),
    };
    Ok(report)
}
