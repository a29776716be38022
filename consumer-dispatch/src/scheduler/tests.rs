use crate::diagnostics::{Diagnostics, IncidentKind};
use crate::scheduler::closure_unit::ClosureUnit;
use crate::scheduler::coordinator::Coordinator;
use crate::scheduler::schedule_queue::QueueState;
use crate::scheduler::work_unit::WorkUnit;
use crate::DispatchConfig;

use backing_pool::{ExecuteError, Executor, Task};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// One-shot gate that blocks deliveries until opened
#[derive(Default)]
struct Latch {
    open: Mutex<bool>,
    cvar: Condvar,
}

impl Latch {
    fn open(&self) {
        *self.open.lock() = true;
        self.cvar.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cvar.wait(&mut open);
        }
    }
}

fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

fn test_coordinator(max_threads: usize, idle_timeout: Duration) -> (Coordinator, Arc<Diagnostics>) {
    let diagnostics = Arc::new(Diagnostics::default());
    let config = DispatchConfig::default()
        .with_max_threads(max_threads)
        .with_idle_timeout(idle_timeout)
        .with_thread_name_prefix("sched-test");
    let coordinator = Coordinator::with_thread_pool_and_sink(config, diagnostics.clone()).unwrap();
    (coordinator, diagnostics)
}

fn counting_unit(desc: &str, counter: Arc<AtomicUsize>) -> Arc<dyn WorkUnit> {
    Arc::new(ClosureUnit::new(desc, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }))
}

fn gated_unit(desc: &str, latch: Arc<Latch>, started: Arc<AtomicUsize>) -> Arc<dyn WorkUnit> {
    Arc::new(ClosureUnit::new(desc, move || {
        started.fetch_add(1, Ordering::SeqCst);
        latch.wait();
        Ok(())
    }))
}

/// Rejects the first `rejections` tasks, then runs each task on a fresh thread
struct FlakyExecutor {
    rejections: AtomicUsize,
}

impl Executor for FlakyExecutor {
    fn execute(&self, task: Task) -> Result<(), ExecuteError> {
        let left = self.rejections.load(Ordering::SeqCst);
        if left > 0 {
            self.rejections.store(left - 1, Ordering::SeqCst);
            return Err(ExecuteError::Saturated { max_threads: 0 });
        }
        thread::spawn(task);
        Ok(())
    }
}

#[test]
fn test_fresh_coordinator_hands_out_queue_zero_first() {
    let (coordinator, _) = test_coordinator(3, Duration::from_secs(10));
    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.idle, vec![2, 1, 0]);
    assert!(snapshot
        .queues
        .iter()
        .all(|q| q.state == QueueState::Idle && q.pending == 0));

    let latch = Arc::new(Latch::default());
    let started = Arc::new(AtomicUsize::new(0));
    let unit = gated_unit("first", latch.clone(), started.clone());
    coordinator.dispatch(unit.clone());

    assert_eq!(coordinator.bound_queue(&unit), Some(0));
    wait_for("first delivery", || started.load(Ordering::SeqCst) == 1);
    assert_eq!(coordinator.snapshot().queues[0].state, QueueState::Running);

    latch.open();
    assert!(coordinator.shutdown(Duration::from_secs(5)));
}

#[test]
fn test_binding_released_when_queue_drains() {
    let (coordinator, _) = test_coordinator(2, Duration::from_secs(10));
    let counter = Arc::new(AtomicUsize::new(0));
    let unit = counting_unit("drain", counter.clone());

    coordinator.dispatch(unit.clone());
    wait_for("queue to park", || {
        coordinator.snapshot().queues[0].state == QueueState::Waiting
    });

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.bound_queue(&unit), None);
    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.idle, vec![1, 0]);
    assert_eq!(snapshot.bindings, 0);
    assert_eq!(snapshot.active_queues, 1);

    // a parked queue is woken instead of asking for another thread
    coordinator.dispatch(unit.clone());
    wait_for("second delivery", || counter.load(Ordering::SeqCst) == 2);
    assert_eq!(coordinator.snapshot().queues[0].threads_requested, 1);

    assert!(coordinator.shutdown(Duration::from_secs(5)));
}

#[test]
fn test_overflow_does_not_bind() {
    let (coordinator, _) = test_coordinator(1, Duration::from_secs(10));
    let latch = Arc::new(Latch::default());
    let started = Arc::new(AtomicUsize::new(0));
    let busy = gated_unit("busy", latch.clone(), started.clone());
    let counter = Arc::new(AtomicUsize::new(0));
    let overflow = counting_unit("overflow", counter.clone());

    coordinator.dispatch(busy);
    wait_for("busy delivery", || started.load(Ordering::SeqCst) == 1);
    coordinator.dispatch(overflow.clone());

    assert_eq!(coordinator.bound_queue(&overflow), None);
    assert_eq!(coordinator.snapshot().queues[0].pending, 1);

    latch.open();
    wait_for("overflow delivery", || counter.load(Ordering::SeqCst) == 1);
    assert!(coordinator.shutdown(Duration::from_secs(5)));
}

#[test]
fn test_idle_stack_push_is_idempotent_under_race() {
    let (coordinator, _) = test_coordinator(2, Duration::from_secs(10));
    let latch = Arc::new(Latch::default());
    let started = Arc::new(AtomicUsize::new(0));
    let unit = gated_unit("racy", latch.clone(), started.clone());

    coordinator.dispatch(unit.clone());
    wait_for("delivery", || started.load(Ordering::SeqCst) == 1);
    assert_eq!(coordinator.snapshot().idle, vec![1]);

    coordinator.shared().park_queue(0);
    coordinator.shared().park_queue(0);
    assert_eq!(coordinator.snapshot().idle, vec![1, 0]);

    latch.open();
    assert!(coordinator.shutdown(Duration::from_secs(5)));
}

#[test]
fn test_rejected_thread_rolls_back_to_idle() {
    let diagnostics = Arc::new(Diagnostics::default());
    let executor = Arc::new(FlakyExecutor {
        rejections: AtomicUsize::new(1),
    });
    let coordinator = Coordinator::new(
        DispatchConfig::default()
            .with_max_threads(1)
            .with_idle_timeout(Duration::from_millis(50)),
        executor,
        diagnostics.clone(),
    )
    .unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let first = counting_unit("first", counter.clone());
    let second = counting_unit("second", counter.clone());

    coordinator.dispatch(first.clone());
    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.queues[0].state, QueueState::Idle);
    assert_eq!(snapshot.queues[0].pending, 1);
    assert_eq!(snapshot.idle, vec![0]);
    assert_eq!(snapshot.active_queues, 0);
    assert_eq!(coordinator.bound_queue(&first), Some(0));
    assert_eq!(diagnostics.count(IncidentKind::ThreadUnavailable), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    // the next dispatch retries and the stranded unit is delivered too
    coordinator.dispatch(second);
    wait_for("both deliveries", || counter.load(Ordering::SeqCst) == 2);
    assert!(coordinator.wait_until_idle(Duration::from_secs(5)));
    assert_eq!(coordinator.snapshot().queues[0].threads_requested, 2);
}

#[test]
fn test_panicking_delivery_hands_queue_to_new_thread() {
    let (coordinator, diagnostics) = test_coordinator(1, Duration::from_millis(50));
    let latch = Arc::new(Latch::default());
    let started = Arc::new(AtomicUsize::new(0));

    let panicking: Arc<dyn WorkUnit> = {
        let latch = latch.clone();
        let started = started.clone();
        Arc::new(ClosureUnit::new("panicking", move || {
            started.fetch_add(1, Ordering::SeqCst);
            latch.wait();
            panic!("intentional test panic");
        }))
    };
    let counter = Arc::new(AtomicUsize::new(0));
    let survivor = counting_unit("survivor", counter.clone());

    coordinator.dispatch(panicking);
    wait_for("panicking delivery", || started.load(Ordering::SeqCst) == 1);
    coordinator.dispatch(survivor);
    latch.open();

    wait_for("survivor delivery", || counter.load(Ordering::SeqCst) == 1);
    assert!(coordinator.wait_until_idle(Duration::from_secs(5)));

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.queues[0].deliveries, 2);
    assert_eq!(snapshot.queues[0].failures, 1);
    assert_eq!(snapshot.queues[0].threads_requested, 2);
    assert_eq!(snapshot.idle, vec![0]);
    assert_eq!(diagnostics.count(IncidentKind::DeliveryPanicked), 1);
    assert_eq!(diagnostics.incidents()[0].detail, "intentional test panic");
}

#[test]
fn test_panic_on_drained_queue_leaves_it_reusable() {
    let (coordinator, diagnostics) = test_coordinator(1, Duration::from_millis(50));
    let panicking: Arc<dyn WorkUnit> = Arc::new(ClosureUnit::new("panicking", || {
        panic!("intentional test panic");
    }));

    coordinator.dispatch(panicking);
    wait_for("queue to go idle after the panic", || {
        let queue = &coordinator.snapshot().queues[0];
        queue.failures == 1 && queue.state == QueueState::Idle
    });
    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.idle, vec![0]);
    assert_eq!(snapshot.active_queues, 0);
    assert_eq!(snapshot.bindings, 0);

    // the same queue gets a fresh thread
    let counter = Arc::new(AtomicUsize::new(0));
    coordinator.dispatch(counting_unit("after", counter.clone()));
    wait_for("delivery after the panic", || counter.load(Ordering::SeqCst) == 1);
    assert!(coordinator.wait_until_idle(Duration::from_secs(5)));

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.idle, vec![0]);
    assert_eq!(snapshot.queues[0].deliveries, 2);
    assert_eq!(snapshot.queues[0].threads_requested, 2);
    assert_eq!(diagnostics.count(IncidentKind::DeliveryPanicked), 1);
    assert!(coordinator.shutdown(Duration::from_secs(5)));
}

#[test]
fn test_parked_queue_releases_every_binding() {
    let (coordinator, _) = test_coordinator(1, Duration::from_secs(10));
    let latch = Arc::new(Latch::default());
    let started = Arc::new(AtomicUsize::new(0));
    let first = gated_unit("first", latch.clone(), started.clone());
    let counter = Arc::new(AtomicUsize::new(0));
    let second = counting_unit("second", counter.clone());

    coordinator.dispatch(first.clone());
    wait_for("first delivery", || started.load(Ordering::SeqCst) == 1);
    coordinator.dispatch(second.clone());
    latch.open();

    wait_for("queue to park", || {
        counter.load(Ordering::SeqCst) == 1
            && coordinator.snapshot().queues[0].state == QueueState::Waiting
    });
    // `first` was not the last unit delivered before the queue ran dry
    assert_eq!(coordinator.bound_queue(&first), None);
    assert_eq!(coordinator.bound_queue(&second), None);
    assert_eq!(coordinator.snapshot().bindings, 0);
    assert!(coordinator.shutdown(Duration::from_secs(5)));
}

#[test]
fn test_unbounded_idle_timeout_parks_without_deadline() {
    let (coordinator, _) = test_coordinator(1, Duration::MAX);
    let counter = Arc::new(AtomicUsize::new(0));
    let unit = counting_unit("parked", counter.clone());

    coordinator.dispatch(unit.clone());
    wait_for("queue to park", || {
        counter.load(Ordering::SeqCst) == 1
            && coordinator.snapshot().queues[0].state == QueueState::Waiting
    });

    coordinator.dispatch(unit);
    wait_for("second delivery", || counter.load(Ordering::SeqCst) == 2);
    assert_eq!(coordinator.snapshot().queues[0].threads_requested, 1);

    // close still releases the thread parked without a deadline
    assert!(coordinator.shutdown(Duration::from_secs(5)));
    assert_eq!(coordinator.active_queues(), 0);
}

#[test]
fn test_close_releases_parked_threads() {
    let (coordinator, _) = test_coordinator(2, Duration::from_secs(60));
    let counter = Arc::new(AtomicUsize::new(0));
    coordinator.dispatch(counting_unit("a", counter.clone()));
    coordinator.dispatch(counting_unit("b", counter.clone()));
    wait_for("deliveries", || counter.load(Ordering::SeqCst) == 2);

    let begin = Instant::now();
    coordinator.close();
    assert!(coordinator.wait_until_idle(Duration::from_secs(5)));
    assert!(begin.elapsed() < Duration::from_secs(5));

    // closed coordinators drop new work
    coordinator.dispatch(counting_unit("late", counter.clone()));
    assert_eq!(coordinator.snapshot().queues.iter().map(|q| q.pending).sum::<usize>(), 0);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert!(coordinator.shutdown(Duration::from_secs(5)));
}
