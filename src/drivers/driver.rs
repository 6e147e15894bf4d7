use std::sync::Arc;

use crate::tasks::{TaskContext, TaskResult};

/// Cloneable probe the context polls while a task runs, answering "does
/// the driving thread want out". Captures whatever flags the driver
/// bases that decision on.
#[derive(Clone)]
pub struct ExitProbe(Arc<dyn Fn() -> bool + Send + Sync>);

impl ExitProbe {
    pub fn new(probe: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(probe))
    }

    #[must_use]
    pub fn should_exit(&self) -> bool {
        (self.0)()
    }
}

impl core::fmt::Debug for ExitProbe {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ExitProbe")
    }
}

/// Contract a worker implementation fulfils to drive a [`TaskContext`]
/// to completion on its own thread.
pub trait WorkerDriver: Send + Sync {
    /// True when the driver needs the running task to wind down; tasks
    /// observe it through `should_abort`.
    fn current_thread_should_exit(&self) -> bool;

    /// True only when called from the thread this driver runs contexts
    /// on.
    fn is_on_driver_thread(&self) -> bool;

    /// The probe the context installs for the duration of a run.
    fn exit_probe(&self) -> ExitProbe;

    /// Blocks the calling thread, drives `context` to a terminal state
    /// and returns the root task's result. Must be called from the
    /// driver's own thread.
    fn run_context(&self, context: &Arc<TaskContext>) -> TaskResult
    where
        Self: Sized,
    {
        context.run_on(self)
    }
}
