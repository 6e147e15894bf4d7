use std::thread;
use std::time::{Duration, Instant};

use super::{ExecutionScope, Task, TaskCore, TaskResult};

const DUMMY_TICK: Duration = Duration::from_millis(100);

/// A task that simply waits for a specified amount of time, advancing
/// its progress proportionally and polling for abort every tick.
/// Returns ok both on completion and on abort.
pub struct DummyTask {
    core: TaskCore,
    duration: Duration,
}

impl DummyTask {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            core: TaskCore::new(name),
            duration,
        }
    }
}

impl Task for DummyTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn run(&mut self, scope: &ExecutionScope<'_>) -> TaskResult {
        scope.set_status_message(self.core.name());

        let started = Instant::now();
        let mut elapsed = Duration::ZERO;

        while elapsed < self.duration {
            elapsed = started.elapsed();

            if scope.should_abort() {
                return self.abort_result();
            }

            let progress = elapsed.as_secs_f64() / self.duration.as_secs_f64();
            scope.set_progress(progress.min(1.0));

            thread::sleep(DUMMY_TICK.min(self.duration.saturating_sub(elapsed)));
        }

        Ok(())
    }
}

/// Wraps a closure as a task. The closure receives the execution scope
/// for the invocation, so it can report progress, set status, check for
/// abort and perform its own sub-tasks.
///
/// Captured state replaces the original's fixed-arity parameter
/// variants; anything the body needs rides along in the closure.
pub struct FnTask<F> {
    core: TaskCore,
    body: F,
}

impl<F> FnTask<F>
where
    F: FnMut(&ExecutionScope<'_>) -> TaskResult + Send,
{
    pub fn new(name: impl Into<String>, body: F) -> Self {
        Self {
            core: TaskCore::new(name),
            body,
        }
    }
}

impl<F> Task for FnTask<F>
where
    F: FnMut(&ExecutionScope<'_>) -> TaskResult + Send,
{
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn run(&mut self, scope: &ExecutionScope<'_>) -> TaskResult {
        (self.body)(scope)
    }
}
