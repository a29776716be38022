// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: Affinity-Aware Dispatch onto a Bounded Thread Budget
//!
//! ## Overview
//! Many work units, few threads. Every call of `dispatch` schedules exactly one
//! `deliver_messages` call on one of N schedule queues.
//!
//! - The coordinator picks a queue: the unit's bound queue if it has one, else
//!   a drained queue from the idle stack (and binds the unit to it), else the
//!   next busy queue in round-robin order (without binding).
//! - Each queue owns a FIFO and borrows at most one thread from the executor.
//! - A drained queue parks its thread for the idle timeout before giving it
//!   back, so bursts do not pay for thread hand-offs.
//! - Deliveries of a bound unit run in submission order and never overlap.
//!
//! ## Queue states
//!
//! ```text
//!                add_work                   add_work (wake)
//!         +------+  ------->  +---------+  <------------  +---------+
//!         | Idle |            | Running |                 | Waiting |
//!         +------+  <-------  +---------+  ------------>  +---------+
//!            ^    rejected       |          FIFO drained       |
//!            |                   | panic, nothing pending      |
//!            +-------------------+-----------------------------+
//!                                             idle timeout / close
//!
//!         +--------------------------------------+
//!         |             Coordinator              |
//!         |  affinity map | idle stack | cursor  |
//!         +----+-------------+-------------+-----+
//!              |             |             |
//!         +----v----+   +----v----+   +----v----+
//!         | Queue 0 |   | Queue 1 |   | Queue N |
//!         |  run()  |   |  run()  |   |  run()  |
//!         +----+----+   +----+----+   +----+----+
//!              |             |             |
//!         +----v-------------v-------------v----+
//!         |        Executor (thread pool)       |
//!         +-------------------------------------+
//! ```

pub mod closure_unit;
pub mod coordinator;
pub mod idle_stack;
pub mod schedule_queue;
pub mod work_unit;

#[cfg(test)]
mod tests;
