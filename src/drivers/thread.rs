use std::io;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::dispatch::MessageLoop;
use crate::synca::Signal;
use crate::tasks::{TaskContext, TaskError, TaskResult};

use super::{ExitProbe, WorkerDriver};

const SYNC_PUMP_SLICE: Duration = Duration::from_millis(5);

struct ThreadDriver {
    interrupt: Arc<Signal>,
    thread_id: OnceLock<ThreadId>,
}

impl WorkerDriver for ThreadDriver {
    fn current_thread_should_exit(&self) -> bool {
        self.interrupt.is_raised()
    }

    fn is_on_driver_thread(&self) -> bool {
        self.thread_id.get().copied() == Some(thread::current().id())
    }

    fn exit_probe(&self) -> ExitProbe {
        let interrupt = self.interrupt.clone();
        ExitProbe::new(move || interrupt.is_raised())
    }
}

/// One-shot worker thread driving a single [`TaskContext`].
///
/// Dropping the handle detaches the thread; the run continues and the
/// completion dispatch still happens. Use [`TaskThread::join`] to wait
/// for the result, or [`TaskThread::interrupt`] to ask the task to wind
/// down.
pub struct TaskThread {
    title: String,
    context: Arc<TaskContext>,
    driver: Arc<ThreadDriver>,
    handle: Option<JoinHandle<()>>,
}

impl TaskThread {
    /// Starts a named worker thread that runs `context` to completion.
    pub fn launch(context: Arc<TaskContext>, title: impl Into<String>) -> io::Result<Self> {
        let title = title.into();
        let driver = Arc::new(ThreadDriver {
            interrupt: Arc::new(Signal::new()),
            thread_id: OnceLock::new(),
        });

        let worker_driver = driver.clone();
        let worker_context = context.clone();
        let handle = thread::Builder::new().name(title.clone()).spawn(move || {
            let _ = worker_driver.thread_id.set(thread::current().id());
            tracing::debug!(task = %worker_context.name(), "task thread running");
            let _ = worker_context.run_on(&*worker_driver);
        })?;

        Ok(Self {
            title,
            context,
            driver,
            handle: Some(handle),
        })
    }

    /// Fire-and-forget variant: the worker thread runs the context,
    /// hands its context reference back to the message thread for
    /// release, and exits. Nothing to join or store.
    pub fn launch_detached(context: Arc<TaskContext>, title: impl Into<String>) -> io::Result<()> {
        let title = title.into();
        let driver = Arc::new(ThreadDriver {
            interrupt: Arc::new(Signal::new()),
            thread_id: OnceLock::new(),
        });

        thread::Builder::new().name(title).spawn(move || {
            let _ = driver.thread_id.set(thread::current().id());
            let _ = context.run_on(&*driver);
            let dispatch = context.dispatcher().clone();
            dispatch.post(Box::new(move || drop(context)));
        })?;

        Ok(())
    }

    /// Blocks the calling thread — pumping `message_loop` so completion
    /// callbacks still fire — until the context finishes, and returns
    /// its result. The calling thread must be the message thread (or
    /// about to claim the loop as such).
    pub fn run_synchronously(
        context: Arc<TaskContext>,
        title: impl Into<String>,
        message_loop: &MessageLoop,
    ) -> TaskResult {
        let thread = Self::launch(context, title)
            .map_err(|error| TaskError::failed(format!("failed to start worker thread: {error}")))?;

        while !thread.context.has_finished() {
            if !thread.is_running() {
                break;
            }
            message_loop.pump(SYNC_PUMP_SLICE);
        }

        let result = thread.join();
        message_loop.drain();
        result
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn context(&self) -> &Arc<TaskContext> {
        &self.context
    }

    /// Raises the driver's interruption flag; the task observes it on
    /// its next `should_abort` poll and the context ends aborted.
    pub fn interrupt(&self) {
        self.driver.interrupt.raise();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Waits for the worker thread to finish and returns the context's
    /// result.
    pub fn join(mut self) -> TaskResult {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                return Err(TaskError::failed("worker thread panicked"));
            }
        }
        self.context.result()
    }
}
