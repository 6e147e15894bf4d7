use std::sync::{Arc, Mutex, Weak};

use crate::dispatch::SharedDispatch;
use crate::drivers::{ExitProbe, WorkerDriver};

use super::{AbortNode, ExecutionScope, Task, TaskError, TaskResult};

/// Execution state of a [`TaskContext`]. `Completed` and `Aborted` are
/// terminal: a context that reaches one never leaves it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// The task is inactive and has not yet been started.
    Pending,
    /// A driver has picked the context up and is about to run it.
    Starting,
    /// The task is currently running.
    Running,
    /// The task's `run` has returned and the context is winding down.
    Stopping,
    /// The task completed.
    Completed,
    /// The task was aborted.
    Aborted,
}

impl TaskState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Aborted)
    }
}

impl core::fmt::Display for TaskState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            TaskState::Pending => "pending",
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::Stopping => "stopping",
            TaskState::Completed => "completed",
            TaskState::Aborted => "aborted",
        };
        write!(f, "{label}")
    }
}

/// Observer callbacks delivered on the worker thread driving the
/// context. Take care communicating with the message thread from these;
/// the context's snapshot accessors are safe to read.
pub trait ContextObserver: Send + Sync {
    /// Fires on every state transition.
    fn state_changed(&self, _context: &TaskContext) {}

    /// Fires on every progress write while the context is running.
    fn progress_changed(&self, _context: &TaskContext) {}

    /// Fires on every status-message write while the context is
    /// running.
    fn status_message_changed(&self, _context: &TaskContext) {}
}

/// Observer callbacks delivered on the message thread, bracketing the
/// completion-callback dispatch after the context reaches a terminal
/// state.
pub trait CompletionObserver: Send + Sync {
    fn about_to_dispatch_completion_callbacks(&self, _context: &TaskContext) {}

    fn completion_callbacks_dispatched(&self, _context: &TaskContext) {}
}

/// One-shot callback fired exactly once on the message thread after the
/// context enters a terminal state. Owned by the context and dropped
/// after firing.
pub trait CompletionCallback: Send {
    fn finished(self: Box<Self>, result: &TaskResult, was_aborted: bool);
}

impl<F> CompletionCallback for F
where
    F: FnOnce(&TaskResult, bool) + Send,
{
    fn finished(self: Box<Self>, result: &TaskResult, was_aborted: bool) {
        (*self)(result, was_aborted)
    }
}

struct ContextInner {
    state: TaskState,
    result: TaskResult,
    progress: f64,
    status: String,
    was_aborted: bool,
    exit_probe: Option<ExitProbe>,
    live_scopes: usize,
}

struct CallbackQueue {
    fifo: Vec<Box<dyn CompletionCallback>>,
    dispatched: bool,
}

/// The shared run record around a root task.
///
/// Owns the task, its final result, the execution state machine, the
/// observer lists and the completion-callback FIFO. A driver runs the
/// context to a terminal state on its own thread via
/// [`TaskContext::run_on`]; terminal entry posts the completion
/// dispatch to the message thread.
///
/// Contexts are handed around as `Arc<TaskContext>`. The final handle
/// should be released on the message thread; an off-thread drop is
/// detected and logged.
pub struct TaskContext {
    name: String,
    dispatch: SharedDispatch,
    root_node: Arc<AbortNode>,
    root: Mutex<Option<Box<dyn Task>>>,
    inner: Mutex<ContextInner>,
    observers: Mutex<Vec<Arc<dyn ContextObserver>>>,
    completion_observers: Mutex<Vec<Arc<dyn CompletionObserver>>>,
    callbacks: Mutex<CallbackQueue>,
    self_ref: Weak<TaskContext>,
}

impl TaskContext {
    pub fn new(root: Box<dyn Task>, dispatch: SharedDispatch) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            name: root.name().to_owned(),
            root_node: root.core().abort_node(),
            root: Mutex::new(Some(root)),
            dispatch,
            inner: Mutex::new(ContextInner {
                state: TaskState::Pending,
                result: Ok(()),
                progress: 0.0,
                status: String::new(),
                was_aborted: false,
                exit_probe: None,
                live_scopes: 0,
            }),
            observers: Mutex::new(Vec::new()),
            completion_observers: Mutex::new(Vec::new()),
            callbacks: Mutex::new(CallbackQueue {
                fifo: Vec::new(),
                dispatched: false,
            }),
            self_ref: weak.clone(),
        })
    }

    /// The root task's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        self.inner.lock().unwrap().state
    }

    /// Latest rolled-up root progress snapshot.
    #[must_use]
    pub fn progress(&self) -> f64 {
        self.inner.lock().unwrap().progress
    }

    /// Latest root status-message snapshot.
    #[must_use]
    pub fn status_message(&self) -> String {
        self.inner.lock().unwrap().status.clone()
    }

    /// The task's result; meaningful once the context has finished.
    #[must_use]
    pub fn result(&self) -> TaskResult {
        self.inner.lock().unwrap().result.clone()
    }

    #[must_use]
    pub fn was_aborted(&self) -> bool {
        self.inner.lock().unwrap().was_aborted
    }

    #[must_use]
    pub fn has_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Canonical display string derived from state and result.
    #[must_use]
    pub fn state_description(&self) -> String {
        let inner = self.inner.lock().unwrap();
        match inner.state {
            TaskState::Pending => "Waiting to start...".to_owned(),
            TaskState::Starting => "Starting...".to_owned(),
            TaskState::Running => "Running...".to_owned(),
            TaskState::Stopping => "Stopping...".to_owned(),
            TaskState::Aborted => "Cancelled".to_owned(),
            TaskState::Completed => match &inner.result {
                Ok(()) => "Finished".to_owned(),
                Err(error) => format!("Failed: {}", error.message()),
            },
        }
    }

    /// Aborts the root task: sets its signal, then walks the live scope
    /// chain to abort the currently active descendant. Idempotent; safe
    /// from any thread, before or during the run. A sub-task pushed
    /// after this call is not cancelled automatically.
    pub fn abort(&self) {
        tracing::debug!(task = %self.name, "abort requested");
        self.root_node.cascade();
    }

    /// True when the driver currently running this context wants its
    /// thread back. False while no driver is attached.
    #[must_use]
    pub fn current_task_should_exit(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .exit_probe
            .as_ref()
            .map(ExitProbe::should_exit)
            .unwrap_or(false)
    }

    /// The dispatch seam this context posts its message-thread work to.
    #[must_use]
    pub fn dispatcher(&self) -> &SharedDispatch {
        &self.dispatch
    }

    pub fn add_observer(&self, observer: Arc<dyn ContextObserver>) {
        self.observers.lock().unwrap().push(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn ContextObserver>) {
        self.observers
            .lock()
            .unwrap()
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    pub fn add_completion_observer(&self, observer: Arc<dyn CompletionObserver>) {
        self.completion_observers.lock().unwrap().push(observer);
    }

    pub fn remove_completion_observer(&self, observer: &Arc<dyn CompletionObserver>) {
        self.completion_observers
            .lock()
            .unwrap()
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    /// Queues a one-shot callback for the completion dispatch. A
    /// callback added after the dispatch has already run is posted
    /// individually, so it still fires exactly once on the message
    /// thread.
    pub fn add_completion_callback(&self, callback: Box<dyn CompletionCallback>) {
        let mut queue = self.callbacks.lock().unwrap();
        if queue.dispatched {
            drop(queue);
            let Some(context) = self.self_ref.upgrade() else {
                return;
            };
            self.dispatch.post(Box::new(move || {
                let (result, was_aborted) = context.outcome();
                callback.finished(&result, was_aborted);
            }));
            return;
        }
        queue.fifo.push(callback);
    }

    /// Drives this context to a terminal state on the calling thread.
    ///
    /// Called by a driver from its own thread. Walks the state machine
    /// pending → starting → running, runs the root task inside a fresh
    /// root execution scope, then running → stopping → completed or
    /// aborted, and returns the root's result. Driving a context that
    /// is not pending yields the "task already running" failure.
    pub fn run_on(&self, driver: &dyn WorkerDriver) -> TaskResult {
        let mut task = {
            let mut slot = self.root.lock().unwrap();
            match slot.take() {
                Some(task) => task,
                None => return Err(TaskError::AlreadyRunning),
            }
        };

        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != TaskState::Pending {
                drop(inner);
                *self.root.lock().unwrap() = Some(task);
                return Err(TaskError::AlreadyRunning);
            }
            inner.exit_probe = Some(driver.exit_probe());
        }

        if !task.core().begin_run() {
            self.inner.lock().unwrap().exit_probe = None;
            *self.root.lock().unwrap() = Some(task);
            return Err(TaskError::AlreadyRunning);
        }

        tracing::debug!(task = %self.name, "task starting");
        self.set_state(TaskState::Starting);
        self.set_state(TaskState::Running);

        let result = {
            let scope =
                ExecutionScope::root(self, task.core().abort_node(), task.core().run_mark());
            task.run(&scope)
        };

        self.set_state(TaskState::Stopping);

        let aborted = driver.current_thread_should_exit() || self.root_node.signal().is_set();

        {
            let mut inner = self.inner.lock().unwrap();
            inner.result = result.clone();
            inner.was_aborted = aborted;
            inner.exit_probe = None;
        }

        *self.root.lock().unwrap() = Some(task);

        self.set_state(if aborted {
            TaskState::Aborted
        } else {
            TaskState::Completed
        });
        tracing::debug!(task = %self.name, aborted, "task finished");

        if let Some(context) = self.self_ref.upgrade() {
            self.dispatch
                .post(Box::new(move || context.dispatch_completion()));
        }

        result
    }

    fn outcome(&self) -> (TaskResult, bool) {
        let inner = self.inner.lock().unwrap();
        (inner.result.clone(), inner.was_aborted)
    }

    fn set_state(&self, state: TaskState) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.state = state;
        }
        tracing::debug!(task = %self.name, %state, "state changed");
        for observer in self.observer_snapshot() {
            observer.state_changed(self);
        }
    }

    /// Message-thread tail of the context's life: the pre-dispatch
    /// hook, the callback FIFO, then the post-dispatch hook.
    fn dispatch_completion(&self) {
        if !self.dispatch.is_dispatch_thread() {
            tracing::warn!(task = %self.name, "completion dispatch ran off the message thread");
        }

        let completion_observers = self.completion_snapshot();
        for observer in &completion_observers {
            observer.about_to_dispatch_completion_callbacks(self);
        }

        let drained = {
            let mut queue = self.callbacks.lock().unwrap();
            queue.dispatched = true;
            std::mem::take(&mut queue.fifo)
        };

        let (result, was_aborted) = self.outcome();
        for callback in drained {
            callback.finished(&result, was_aborted);
        }

        for observer in &completion_observers {
            observer.completion_callbacks_dispatched(self);
        }
    }

    pub(crate) fn publish_progress(&self, value: f64) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != TaskState::Running {
                return;
            }
            inner.progress = value;
        }
        for observer in self.observer_snapshot() {
            observer.progress_changed(self);
        }
    }

    pub(crate) fn publish_status(&self, message: &str) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != TaskState::Running {
                return;
            }
            inner.status = message.to_owned();
        }
        for observer in self.observer_snapshot() {
            observer.status_message_changed(self);
        }
    }

    pub(crate) fn scope_entered(&self) {
        self.inner.lock().unwrap().live_scopes += 1;
    }

    pub(crate) fn scope_exited(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.live_scopes = inner.live_scopes.saturating_sub(1);
    }

    fn observer_snapshot(&self) -> Vec<Arc<dyn ContextObserver>> {
        self.observers.lock().unwrap().clone()
    }

    fn completion_snapshot(&self) -> Vec<Arc<dyn CompletionObserver>> {
        self.completion_observers.lock().unwrap().clone()
    }
}

impl Drop for TaskContext {
    fn drop(&mut self) {
        let live_scopes = self.inner.lock().unwrap().live_scopes;
        if live_scopes != 0 {
            tracing::error!(task = %self.name, live_scopes, "context dropped with live scopes");
        }
        if !self.dispatch.is_dispatch_thread() {
            tracing::error!(task = %self.name, "TaskContext dropped off the message thread");
        }
    }
}
