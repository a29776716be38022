// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod run_workload;
pub mod simulated_unit;
pub mod workload;
