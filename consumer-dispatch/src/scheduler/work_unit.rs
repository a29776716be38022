// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;

/// One logical consumer with deliverable work.
///
/// The scheduler only ever calls [`WorkUnit::deliver_messages`] and never
/// mutates the unit. Units are told apart by the identity of their `Arc`.
pub trait WorkUnit: Send + Sync + 'static {
    /// Free-form description, used for logging or debugging
    fn desc(&self) -> &str;

    /// Performs one batch of pending work and returns quickly.
    ///
    /// An error is recorded and the queue moves on. A panic is recorded and
    /// ends the worker thread it happened on.
    fn deliver_messages(&self) -> anyhow::Result<()>;
}

impl std::fmt::Debug for dyn WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit")
            .field("desc", &self.desc())
            .finish()
    }
}

/// Identity of a work unit, used as the affinity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitKey(usize);

impl UnitKey {
    pub fn of(unit: &Arc<dyn WorkUnit>) -> Self {
        UnitKey(Arc::as_ptr(unit) as *const () as usize)
    }
}
