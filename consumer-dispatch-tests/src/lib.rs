// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod delivery_log;
pub mod recording_unit;
pub mod sync_tools;

use std::sync::Arc;
use std::time::Duration;

use consumer_dispatch::{Coordinator, Diagnostics, DispatchConfig};

/// Coordinator with its own thread pool and an inspectable incident sink.
pub fn coordinator(max_threads: usize, idle_timeout: Duration) -> (Coordinator, Arc<Diagnostics>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let diagnostics = Arc::new(Diagnostics::default());
    let config = DispatchConfig::default()
        .with_max_threads(max_threads)
        .with_idle_timeout(idle_timeout)
        .with_thread_keep_alive(Duration::from_secs(5))
        .with_thread_name_prefix("dispatch-test");
    let coordinator = Coordinator::with_thread_pool_and_sink(config, diagnostics.clone())
        .expect("test configuration is valid");
    (coordinator, diagnostics)
}
