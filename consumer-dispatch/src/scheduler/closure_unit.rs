// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use crate::scheduler::work_unit::WorkUnit;

/// Turns a closure into a [`WorkUnit`].
pub struct ClosureUnit {
    desc: String,
    deliver: Box<dyn Fn() -> anyhow::Result<()> + Send + Sync + 'static>,
}

impl ClosureUnit {
    pub fn new<F>(desc: impl Into<String>, deliver: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            desc: desc.into(),
            deliver: Box::new(deliver),
        }
    }
}

impl WorkUnit for ClosureUnit {
    fn desc(&self) -> &str {
        &self.desc
    }

    fn deliver_messages(&self) -> anyhow::Result<()> {
        (self.deliver)()
    }
}
