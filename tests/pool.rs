use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serial_test::serial;
use tracing_test::traced_test;

use ewe_tasks::dispatch::{MessageLoop, SharedDispatch};
use ewe_tasks::drivers::{PoolConfig, PoolListener, TaskPool, POOL_THREADS_ENV};
use ewe_tasks::tasks::{DummyTask, ExecutionScope, FnTask, TaskContext, TaskState};

fn spawned_loop(name: &str) -> (MessageLoop, SharedDispatch) {
    let message_loop = MessageLoop::spawn(name).unwrap();
    let dispatch: SharedDispatch = Arc::new(message_loop.clone());
    (message_loop, dispatch)
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let limit = Instant::now() + deadline;
    while Instant::now() < limit {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[derive(Default)]
struct ChangeCounter {
    calls: AtomicUsize,
    last_len: Mutex<Option<usize>>,
}

impl PoolListener for ChangeCounter {
    fn queue_changed(&self, contexts: &[Arc<TaskContext>]) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_len.lock().unwrap() = Some(contexts.len());
    }
}

#[test]
#[traced_test]
#[serial]
fn concurrency_cap_bounds_running_jobs() {
    let (message_loop, dispatch) = spawned_loop("pool-cap-dispatch");
    let pool = TaskPool::with_config(dispatch, PoolConfig::default().with_max_concurrent(2));

    let changes = Arc::new(ChangeCounter::default());
    pool.add_listener(changes.clone());

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut contexts = Vec::new();
    let started = Instant::now();

    for index in 0..4 {
        let running = running.clone();
        let peak = peak.clone();
        let task = FnTask::new(format!("job-{index}"), move |scope: &ExecutionScope<'_>| {
            let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now_running, Ordering::SeqCst);
            let begun = Instant::now();
            while begun.elapsed() < Duration::from_millis(500) {
                if scope.should_abort() {
                    break;
                }
                thread::sleep(Duration::from_millis(25));
            }
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        });
        contexts.push(pool.submit(Box::new(task)));
    }

    assert!(wait_until(Duration::from_secs(10), || {
        contexts.iter().all(|context| context.has_finished())
    }));
    let elapsed = started.elapsed();

    assert!(contexts
        .iter()
        .all(|context| context.state() == TaskState::Completed));
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert!(
        elapsed < Duration::from_millis(1900),
        "four capped jobs took {elapsed:?}, expected two overlapped batches"
    );

    assert!(wait_until(Duration::from_secs(2), || {
        *changes.last_len.lock().unwrap() == Some(0)
    }));
    assert!(changes.calls.load(Ordering::SeqCst) >= 1);
    assert!(pool.is_empty());

    drop(pool);
    message_loop.shutdown();
}

#[test]
#[serial]
fn jobs_run_in_submission_order() {
    let (message_loop, dispatch) = spawned_loop("pool-fifo-dispatch");
    let pool = TaskPool::new(dispatch);

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut contexts = Vec::new();
    for index in 0..3 {
        let order = order.clone();
        let task = FnTask::new(format!("ordered-{index}"), move |_: &ExecutionScope<'_>| {
            order.lock().unwrap().push(index);
            Ok(())
        });
        contexts.push(pool.submit(Box::new(task)));
    }

    assert!(wait_until(Duration::from_secs(5), || {
        contexts.iter().all(|context| context.has_finished())
    }));
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);

    drop(pool);
    message_loop.shutdown();
}

#[test]
#[serial]
fn cancel_all_interrupts_running_and_discards_queued() {
    let (message_loop, dispatch) = spawned_loop("pool-cancel-dispatch");
    let pool = TaskPool::new(dispatch);

    let first = pool.submit(Box::new(DummyTask::new("first", Duration::from_secs(10))));
    let second = pool.submit(Box::new(DummyTask::new("second", Duration::from_secs(10))));

    assert!(wait_until(Duration::from_secs(5), || {
        first.state() == TaskState::Running
    }));
    assert_eq!(pool.len(), 2);
    assert_eq!(pool.context_at(1).map(|context| context.name().to_owned()), Some("second".to_owned()));

    assert!(pool.cancel_all(true, Duration::from_secs(5)));
    assert!(pool.is_empty());
    assert_eq!(first.state(), TaskState::Aborted);
    // Discarded before it ever ran.
    assert_eq!(second.state(), TaskState::Pending);

    drop(pool);
    message_loop.shutdown();
}

#[test]
#[serial]
fn tagged_cancellation_leaves_other_jobs_alone() {
    let (message_loop, dispatch) = spawned_loop("pool-tag-dispatch");
    let pool = TaskPool::new(dispatch);

    let doomed = pool.submit_tagged(
        Box::new(DummyTask::new("doomed", Duration::from_secs(10))),
        "batch",
    );
    let survivor = pool.submit_tagged(
        Box::new(DummyTask::new("survivor", Duration::from_millis(100))),
        "other",
    );

    assert!(wait_until(Duration::from_secs(5), || {
        doomed.state() == TaskState::Running
    }));

    assert!(pool.cancel_all_tagged("batch", true, Duration::from_secs(5)));
    assert_eq!(doomed.state(), TaskState::Aborted);

    assert!(wait_until(Duration::from_secs(5), || survivor.has_finished()));
    assert_eq!(survivor.state(), TaskState::Completed);

    drop(pool);
    message_loop.shutdown();
}

#[test]
#[serial]
fn pool_config_reads_worker_cap_from_env() {
    std::env::set_var(POOL_THREADS_ENV, "3");
    assert_eq!(PoolConfig::from_env().max_concurrent, 3);

    std::env::set_var(POOL_THREADS_ENV, "not-a-number");
    assert_eq!(PoolConfig::from_env().max_concurrent, 1);

    std::env::remove_var(POOL_THREADS_ENV);
    assert_eq!(PoolConfig::from_env().max_concurrent, 1);
}
