// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod scheduler;
pub mod workload;

pub use config::DispatchConfig;
pub use diagnostics::{Diagnostics, Incident, IncidentKind, IncidentSink};
pub use error::{ConfigError, WorkloadError};
pub use scheduler::closure_unit::ClosureUnit;
pub use scheduler::coordinator::{Coordinator, CoordinatorSnapshot};
pub use scheduler::idle_stack::IdleStack;
pub use scheduler::schedule_queue::{QueueSnapshot, QueueState};
pub use scheduler::work_unit::WorkUnit;
