use std::cell::{Cell, RefCell};
use std::sync::Arc;

use crate::synca::Signal;

use super::{AbortNode, Task, TaskContext, TaskError, TaskResult};

/// The ephemeral record wrapping one invocation of a task.
///
/// A scope exists exactly while its task's `run` is on the stack; it is
/// created by the context (for the root task) or by the sub-task
/// plumbing (for every nested invocation), and its lifetime is strictly
/// contained in its caller's. The parent link is an ordinary borrow, so
/// the chain can never outlive the invocations it describes.
///
/// Progress is local to the scope, in [0, 1]. A write interpolates
/// upward hop by hop through the chain and surfaces exactly one
/// notification, carrying the root's value, on the context's observers.
/// Status messages walk the same chain, transformed at each hop by the
/// parent task's [`Task::format_sub_task_status`].
///
/// The handle is deliberately not `Sync`: nested sub-tasks run on the
/// same worker thread as their parent.
pub struct ExecutionScope<'a> {
    context: &'a TaskContext,
    node: Arc<AbortNode>,
    run_mark: Arc<Signal>,
    parent: Option<ParentLink<'a>>,
    progress: Cell<f64>,
    status: RefCell<String>,
    progress_at_start: f64,
    progress_at_end: f64,
    index: usize,
    count: usize,
}

struct ParentLink<'a> {
    /// The task whose invocation pushed this scope's child; absent when
    /// the child was pushed through the scope-level sub-task calls
    /// (e.g. from a closure task), in which case status messages pass
    /// this hop unchanged.
    task: Option<&'a dyn Task>,
    scope: &'a ExecutionScope<'a>,
}

impl<'a> ExecutionScope<'a> {
    /// Root scope for a context's own task: the full [0, 1] window.
    pub(crate) fn root(
        context: &'a TaskContext,
        node: Arc<AbortNode>,
        run_mark: Arc<Signal>,
    ) -> Self {
        context.scope_entered();
        Self {
            context,
            node,
            run_mark,
            parent: None,
            progress: Cell::new(0.0),
            status: RefCell::new(String::new()),
            progress_at_start: 0.0,
            progress_at_end: 1.0,
            index: 0,
            count: 1,
        }
    }

    /// Child scope for a sub-task invocation. The child's window starts
    /// at this scope's progress as it stands now and spans `proportion`
    /// of the parent's range, capped at 1. Linking the child into this
    /// scope's abort chain happens here, so an abort cascading through
    /// the chain reaches the child for as long as it runs.
    fn enter_child<'s>(
        &'s self,
        parent_task: Option<&'s dyn Task>,
        node: Arc<AbortNode>,
        run_mark: Arc<Signal>,
        proportion: f64,
        index: usize,
        count: usize,
    ) -> ExecutionScope<'s> {
        self.context.scope_entered();
        self.node.set_child(node.clone());
        let start = self.progress.get();
        ExecutionScope {
            context: self.context,
            node,
            run_mark,
            parent: Some(ParentLink {
                task: parent_task,
                scope: self,
            }),
            progress: Cell::new(0.0),
            status: RefCell::new(String::new()),
            progress_at_start: start,
            progress_at_end: (start + proportion.max(0.0)).min(1.0),
            index,
            count,
        }
    }

    #[must_use]
    pub fn context(&self) -> &TaskContext {
        self.context
    }

    /// This scope's local progress, in [0, 1].
    #[must_use]
    pub fn progress(&self) -> f64 {
        self.progress.get()
    }

    #[must_use]
    pub fn status_message(&self) -> String {
        self.status.borrow().clone()
    }

    /// Position of this invocation among its siblings (zero unless part
    /// of a sequence).
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Sets this scope's progress, clamped to [0, 1], and rolls the
    /// write up the chain. Monotonicity is not enforced; a task may
    /// move its progress backwards and the roll-up follows.
    pub fn set_progress(&self, progress: f64) {
        let mut value = progress.clamp(0.0, 1.0);
        self.progress.set(value);

        let mut current = self;
        while let Some(link) = current.parent.as_ref() {
            value = current.interpolate(value);
            link.scope.progress.set(value);
            current = link.scope;
        }

        self.context.publish_progress(value);
    }

    /// Advances this scope's progress by `amount`.
    pub fn advance_progress(&self, amount: f64) {
        self.set_progress(self.progress.get() + amount);
    }

    /// The amount of progress left up to `target`; handy when a phase
    /// should finish at a known value.
    #[must_use]
    pub fn distance_to_target_progress(&self, target: f64) -> f64 {
        (target - self.progress.get()).max(0.0)
    }

    /// Sets this task's status message and rolls it up the chain, each
    /// parent reformatting it on the way.
    pub fn set_status_message(&self, message: impl Into<String>) {
        let mut message: String = message.into();
        *self.status.borrow_mut() = message.clone();

        let mut current = self;
        while let Some(link) = current.parent.as_ref() {
            if let Some(task) = link.task {
                message = task.format_sub_task_status(&message);
            }
            *link.scope.status.borrow_mut() = message.clone();
            current = link.scope;
        }

        self.context.publish_status(&message);
    }

    /// Runs `child` immediately as a sub-task of this invocation,
    /// taking up `proportion` of this scope's progress window. This is
    /// the scope-level variant used by closure tasks, which have no
    /// task object to hang the hooks of
    /// [`Task::perform_sub_task`](super::Task::perform_sub_task) on; a
    /// child that is already running is rejected with the "task already
    /// running" failure without touching the scope chain.
    pub fn perform_sub_task(&self, child: &mut dyn Task, proportion: f64) -> TaskResult {
        self.perform_sub_task_indexed(child, proportion, 0, 1)
    }

    /// [`ExecutionScope::perform_sub_task`] with the child's position
    /// among its siblings.
    pub fn perform_sub_task_indexed(
        &self,
        child: &mut dyn Task,
        proportion: f64,
        index: usize,
        count: usize,
    ) -> TaskResult {
        self.run_child(None, child, proportion, index, count)
    }

    pub(crate) fn run_child(
        &self,
        parent_task: Option<&dyn Task>,
        child: &mut dyn Task,
        proportion: f64,
        index: usize,
        count: usize,
    ) -> TaskResult {
        if !child.core().begin_run() {
            return Err(TaskError::AlreadyRunning);
        }
        let node = child.core().abort_node();
        let run_mark = child.core().run_mark();
        let child_scope = self.enter_child(parent_task, node, run_mark, proportion, index, count);
        child.run(&child_scope)
    }

    /// True when this task should wind down: its own abort signal is
    /// set, or the driver's interruption flag is. An abort requested on
    /// an ancestor reaches this task through the cascade at the moment
    /// of the call, not through this poll.
    #[must_use]
    pub fn should_abort(&self) -> bool {
        self.context.current_task_should_exit() || self.node.signal().is_set()
    }

    /// Maps this scope's local progress value into its parent's range.
    fn interpolate(&self, progress: f64) -> f64 {
        let span = self.progress_at_end - self.progress_at_start;
        (self.progress_at_start + progress * span).clamp(0.0, 1.0)
    }
}

impl Drop for ExecutionScope<'_> {
    fn drop(&mut self) {
        if let Some(link) = self.parent.as_ref() {
            link.scope.node.clear_child();
        }
        self.run_mark.clear();
        self.context.scope_exited();
    }
}
