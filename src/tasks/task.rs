use std::sync::{Arc, Mutex};

use crate::synca::{AbortSignal, Signal};

use super::{ExecutionScope, TaskError, TaskResult, TaskSequence};

/// One link in the live abort chain. Every task owns a node for its
/// abort signal; while a sub-task runs, the parent's node points at the
/// child's, so an `abort` call can cascade from any task down to the
/// currently active descendant — the safe rendition of the original's
/// scope/sub-task pointer chase. A child pushed after the call is not
/// reached; cancellation touches what was active at that moment.
#[derive(Debug)]
pub(crate) struct AbortNode {
    signal: AbortSignal,
    child: Mutex<Option<Arc<AbortNode>>>,
}

impl AbortNode {
    fn new(signal: AbortSignal) -> Self {
        Self {
            signal,
            child: Mutex::new(None),
        }
    }

    pub(crate) fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Sets this node's signal and recursively the active child's.
    pub(crate) fn cascade(&self) {
        self.signal.set();
        let child = self.child.lock().unwrap().clone();
        if let Some(child) = child {
            child.cascade();
        }
    }

    pub(crate) fn set_child(&self, child: Arc<AbortNode>) {
        *self.child.lock().unwrap() = Some(child);
    }

    pub(crate) fn clear_child(&self) {
        *self.child.lock().unwrap() = None;
    }
}

/// The identity and cross-thread flags every task carries: its display
/// name, its abort signal (as the head of its abort chain), and the
/// run-mark that is raised exactly while the task has a live execution
/// scope.
///
/// Implementors embed one and hand it back from [`Task::core`]; the
/// rest of the [`Task`] surface is provided on top of it.
#[derive(Debug)]
pub struct TaskCore {
    name: String,
    chain: Arc<AbortNode>,
    run_mark: Arc<Signal>,
}

impl TaskCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_signal(name, AbortSignal::new())
    }

    /// Builds a core around an externally held abort handle, for
    /// callers that want to cancel the task from another thread.
    pub fn with_signal(name: impl Into<String>, abort: AbortSignal) -> Self {
        Self {
            name: name.into(),
            chain: Arc::new(AbortNode::new(abort)),
            run_mark: Arc::new(Signal::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn abort_signal(&self) -> &AbortSignal {
        self.chain.signal()
    }

    /// Sets this task's abort signal and recursively aborts the
    /// currently active sub-task. Idempotent.
    pub fn abort(&self) {
        self.chain.cascade();
    }

    /// True while the task has a live execution scope. Volatile: the
    /// worker thread owns the scope's lifetime.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.run_mark.is_raised()
    }

    /// Claims the run-mark for a new invocation; false means the task
    /// is already running somewhere.
    pub(crate) fn begin_run(&self) -> bool {
        self.run_mark.raise()
    }

    pub(crate) fn run_mark(&self) -> Arc<Signal> {
        self.run_mark.clone()
    }

    pub(crate) fn abort_node(&self) -> Arc<AbortNode> {
        self.chain.clone()
    }
}

/// A unit of long-running, cancellable, progress-reporting work.
///
/// Implementors define [`Task::run`], which receives the execution
/// scope for this invocation. All run-time operations — progress,
/// status, abort checks, sub-tasks — are methods on the scope handle,
/// so they simply cannot be reached while the task is not running.
///
/// `run` must poll [`ExecutionScope::should_abort`] at least once per
/// unit of meaningful work and return promptly when it turns true;
/// returning `Ok(())` on abort is the convention (see
/// [`Task::abort_result`]).
pub trait Task: Send {
    /// The task's identity and flags.
    fn core(&self) -> &TaskCore;

    /// Performs the work of this task.
    fn run(&mut self, scope: &ExecutionScope<'_>) -> TaskResult;

    /// Called just before a sub-task of this task starts. `index` and
    /// `count` are zero and one unless the sub-task is part of a
    /// sequence.
    fn sub_task_starting(&mut self, _name: &str, _index: usize, _count: usize) {}

    /// Transforms a sub-task's status message before it becomes this
    /// task's status. The default uses the sub-task's message verbatim;
    /// override to prefix it.
    fn format_sub_task_status(&self, status: &str) -> String {
        status.to_owned()
    }

    /// The result to return when winding down early on abort.
    fn abort_result(&self) -> TaskResult {
        Ok(())
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    /// Sets this task's abort signal and recursively aborts the
    /// currently active sub-task, found through the live child links of
    /// the scope chain. Idempotent.
    fn abort(&self) {
        self.core().abort();
    }

    fn is_running(&self) -> bool {
        self.core().is_running()
    }

    /// Runs `child` immediately as a sub-task of this one, taking up
    /// `proportion` of this task's remaining progress window. Only
    /// callable from within `run`. A child that already has a live
    /// scope is rejected with the "task already running" failure
    /// without touching the scope chain.
    fn perform_sub_task(
        &mut self,
        scope: &ExecutionScope<'_>,
        child: &mut dyn Task,
        proportion: f64,
    ) -> TaskResult
    where
        Self: Sized,
    {
        self.perform_sub_task_indexed(scope, child, proportion, 0, 1)
    }

    /// [`Task::perform_sub_task`] with the child's position in a
    /// sequence of siblings, forwarded to [`Task::sub_task_starting`].
    fn perform_sub_task_indexed(
        &mut self,
        scope: &ExecutionScope<'_>,
        child: &mut dyn Task,
        proportion: f64,
        index: usize,
        count: usize,
    ) -> TaskResult
    where
        Self: Sized,
    {
        if child.is_running() {
            return Err(TaskError::AlreadyRunning);
        }
        self.sub_task_starting(child.name(), index, count);
        let parent: &dyn Task = &*self;
        scope.run_child(Some(parent), child, proportion, index, count)
    }

    /// Runs every task in `sequence` as sub-tasks of this one, the
    /// group as a whole occupying `proportion` of this task's progress.
    /// Each child receives its normalised share. Abort is checked
    /// before each child; a sequence cancelled mid-iteration returns
    /// `Ok(())`, since cancellation is not a failure.
    ///
    /// Child failures accumulate; with `stop_on_error` the remaining
    /// progress jumps to the end of the group and iteration stops. Any
    /// accumulated failures come back as one message joined with
    /// newlines.
    fn perform_sub_task_sequence(
        &mut self,
        scope: &ExecutionScope<'_>,
        sequence: &mut TaskSequence,
        proportion: f64,
        stop_on_error: bool,
    ) -> TaskResult
    where
        Self: Sized,
    {
        let mut failures: Vec<String> = Vec::new();
        let end_progress = scope.progress() + proportion;
        let count = sequence.len();

        for index in 0..count {
            if scope.should_abort() {
                return Ok(());
            }

            let share = sequence.proportion_at(index) * proportion;
            let Some(child) = sequence.task_mut(index) else {
                break;
            };

            match self.perform_sub_task_indexed(scope, child, share, index, count) {
                Ok(()) => {}
                Err(error) => {
                    failures.push(error.message().to_owned());
                    if stop_on_error {
                        scope.set_progress(end_progress);
                        break;
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TaskError::Failed(failures.join("\n")))
        }
    }
}
