use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serial_test::serial;
use tracing_test::traced_test;

use ewe_tasks::dispatch::{MessageLoop, SharedDispatch};
use ewe_tasks::drivers::TaskThread;
use ewe_tasks::tasks::{DummyTask, TaskContext, TaskResult, TaskState};

fn attached_loop() -> (MessageLoop, SharedDispatch) {
    let message_loop = MessageLoop::new();
    message_loop.attach_current_thread();
    let dispatch: SharedDispatch = Arc::new(message_loop.clone());
    (message_loop, dispatch)
}

#[test]
#[traced_test]
#[serial]
fn aborting_mid_run_finishes_quickly_as_aborted() {
    let (message_loop, dispatch) = attached_loop();
    let context = TaskContext::new(
        Box::new(DummyTask::new("ten-seconds", Duration::from_secs(10))),
        dispatch,
    );

    let outcome: Arc<Mutex<Option<(TaskResult, bool)>>> = Arc::new(Mutex::new(None));
    let seen = outcome.clone();
    context.add_completion_callback(Box::new(move |result: &TaskResult, was_aborted: bool| {
        *seen.lock().unwrap() = Some((result.clone(), was_aborted));
    }));

    let started = Instant::now();
    let thread = TaskThread::launch(context.clone(), "dummy-runner").unwrap();
    std::thread::sleep(Duration::from_millis(200));
    context.abort();

    assert_eq!(thread.join(), Ok(()));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(context.state(), TaskState::Aborted);
    assert!(context.was_aborted());

    message_loop.drain();
    assert_eq!(*outcome.lock().unwrap(), Some((Ok(()), true)));
}

#[test]
#[serial]
fn run_synchronously_pumps_callbacks_before_returning() {
    let (message_loop, dispatch) = attached_loop();
    let context = TaskContext::new(
        Box::new(DummyTask::new("short", Duration::from_millis(300))),
        dispatch,
    );

    let fired = Arc::new(Mutex::new(false));
    let seen = fired.clone();
    context.add_completion_callback(Box::new(move |result: &TaskResult, was_aborted: bool| {
        assert_eq!(result, &Ok(()));
        assert!(!was_aborted);
        *seen.lock().unwrap() = true;
    }));

    let result = TaskThread::run_synchronously(context.clone(), "short-runner", &message_loop);
    assert_eq!(result, Ok(()));
    assert_eq!(context.state(), TaskState::Completed);
    assert!(*fired.lock().unwrap());
}

#[test]
#[serial]
fn interrupting_the_thread_aborts_the_context() {
    let (message_loop, dispatch) = attached_loop();
    let context = TaskContext::new(
        Box::new(DummyTask::new("long", Duration::from_secs(10))),
        dispatch,
    );

    let thread = TaskThread::launch(context.clone(), "interrupted-runner").unwrap();
    std::thread::sleep(Duration::from_millis(100));
    thread.interrupt();

    assert_eq!(thread.join(), Ok(()));
    assert_eq!(context.state(), TaskState::Aborted);
    message_loop.drain();
}

#[test]
#[serial]
fn detached_launch_runs_to_completion() {
    let (message_loop, dispatch) = attached_loop();
    let context = TaskContext::new(
        Box::new(DummyTask::new("quick", Duration::from_millis(100))),
        dispatch,
    );

    TaskThread::launch_detached(context.clone(), "detached-runner").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !context.has_finished() && Instant::now() < deadline {
        message_loop.pump(Duration::from_millis(10));
    }

    assert_eq!(context.state(), TaskState::Completed);
    message_loop.drain();
}
