use std::env;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crate::dispatch::SharedDispatch;
use crate::synca::{Notify, Signal};
use crate::tasks::{Task, TaskContext};

use super::{ExitProbe, WorkerDriver};

/// Environment variable overriding [`PoolConfig::max_concurrent`].
pub const POOL_THREADS_ENV: &str = "EWE_TASK_POOL_THREADS";

/// Construction-time knobs for a [`TaskPool`].
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Maximum number of tasks running at once.
    pub max_concurrent: usize,

    /// How long the pool's drop waits for in-flight jobs after
    /// interrupting them.
    pub shutdown_timeout: Duration,

    /// Worker threads are named `{thread_name}-{index}`.
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            shutdown_timeout: Duration::from_millis(5000),
            thread_name: "task-pool".to_owned(),
        }
    }
}

impl PoolConfig {
    /// Default configuration with the worker cap taken from
    /// [`POOL_THREADS_ENV`] when it holds a positive number.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = env::var(POOL_THREADS_ENV) {
            match value.parse::<usize>() {
                Ok(count) if count > 0 => config.max_concurrent = count,
                _ => {
                    tracing::warn!(%value, "ignoring unusable {POOL_THREADS_ENV}")
                }
            }
        }
        config
    }

    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }
}

/// Listener for pool queue changes. Called on the message thread;
/// bursts of mutations coalesce into a single call carrying the latest
/// queue snapshot.
pub trait PoolListener: Send + Sync {
    fn queue_changed(&self, contexts: &[Arc<TaskContext>]);
}

struct PoolJob {
    context: Arc<TaskContext>,
    tag: Option<String>,
    interrupt: Arc<Signal>,
    claimed: Signal,
    thread_id: OnceLock<ThreadId>,
}

struct JobDriver {
    job: Arc<PoolJob>,
    kill: Arc<Signal>,
}

impl WorkerDriver for JobDriver {
    fn current_thread_should_exit(&self) -> bool {
        self.job.interrupt.is_raised() || self.kill.is_raised()
    }

    fn is_on_driver_thread(&self) -> bool {
        self.job.thread_id.get().copied() == Some(thread::current().id())
    }

    fn exit_probe(&self) -> ExitProbe {
        let interrupt = self.job.interrupt.clone();
        let kill = self.kill.clone();
        ExitProbe::new(move || interrupt.is_raised() || kill.is_raised())
    }
}

struct PoolShared {
    dispatch: SharedDispatch,
    jobs: Mutex<Vec<Arc<PoolJob>>>,
    notify: Notify,
    kill: Arc<Signal>,
    listeners: Mutex<Vec<Arc<dyn PoolListener>>>,
    change_pending: Signal,
}

impl PoolShared {
    fn next_job(&self) -> Option<Arc<PoolJob>> {
        let jobs = self.jobs.lock().unwrap();
        jobs.iter().find(|job| job.claimed.raise()).cloned()
    }

    fn remove_job(&self, job: &Arc<PoolJob>) {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.retain(|existing| !Arc::ptr_eq(existing, job));
    }

    fn queue_mutated(shared: &Arc<Self>) {
        if !shared.change_pending.raise() {
            return;
        }
        let pool = Arc::clone(shared);
        shared.dispatch.post(Box::new(move || {
            pool.change_pending.clear();
            let snapshot: Vec<Arc<TaskContext>> = pool
                .jobs
                .lock()
                .unwrap()
                .iter()
                .map(|job| job.context.clone())
                .collect();
            let listeners = pool.listeners.lock().unwrap().clone();
            for listener in listeners {
                listener.queue_changed(&snapshot);
            }
        }));
    }
}

/// Multi-slot pooled driver with a fixed concurrency cap.
///
/// Submissions queue FIFO; at most [`PoolConfig::max_concurrent`] jobs
/// run at once, each on one of the pool's named worker threads against
/// its own interruption flag. A job's tag is an opaque label used only
/// for bulk cancellation; it does not affect scheduling.
///
/// Dropping the pool interrupts in-flight jobs, waits up to the
/// configured shutdown timeout for them to stop and joins its workers.
pub struct TaskPool {
    shared: Arc<PoolShared>,
    config: PoolConfig,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    pub fn new(dispatch: SharedDispatch) -> Self {
        Self::with_config(dispatch, PoolConfig::default())
    }

    pub fn with_config(dispatch: SharedDispatch, config: PoolConfig) -> Self {
        let shared = Arc::new(PoolShared {
            dispatch,
            jobs: Mutex::new(Vec::new()),
            notify: Notify::new(),
            kill: Arc::new(Signal::new()),
            listeners: Mutex::new(Vec::new()),
            change_pending: Signal::new(),
        });

        let workers = (0..config.max_concurrent.max(1))
            .map(|index| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("{}-{index}", config.thread_name))
                    .spawn(move || Self::worker_loop(&shared))
                    .expect("failed to spawn pool worker thread")
            })
            .collect();

        Self {
            shared,
            config,
            workers,
        }
    }

    fn worker_loop(shared: &Arc<PoolShared>) {
        tracing::debug!("pool worker started");
        loop {
            // Epoch first: a kill or submission after this read bumps
            // the epoch, so the park below cannot miss it.
            let seen = shared.notify.epoch();
            if shared.kill.is_raised() {
                break;
            }
            match shared.next_job() {
                Some(job) => {
                    let _ = job.thread_id.set(thread::current().id());
                    tracing::debug!(task = %job.context.name(), "pool worker picked up job");
                    let driver = JobDriver {
                        job: job.clone(),
                        kill: shared.kill.clone(),
                    };
                    let _ = job.context.run_on(&driver);
                    shared.remove_job(&job);
                    PoolShared::queue_mutated(shared);
                    shared.notify.notify_all();
                }
                None => shared.notify.wait_past(seen),
            }
        }
        tracing::debug!("pool worker stopped");
    }

    /// Wraps `task` in a fresh context, queues it and returns the
    /// context.
    pub fn submit(&self, task: Box<dyn Task>) -> Arc<TaskContext> {
        let context = TaskContext::new(task, self.shared.dispatch.clone());
        self.enqueue(context.clone(), None);
        context
    }

    /// [`TaskPool::submit`] with a tag for later bulk cancellation.
    pub fn submit_tagged(&self, task: Box<dyn Task>, tag: impl Into<String>) -> Arc<TaskContext> {
        let context = TaskContext::new(task, self.shared.dispatch.clone());
        self.enqueue(context.clone(), Some(tag.into()));
        context
    }

    /// Queues a job for an externally owned context.
    pub fn submit_context(&self, context: Arc<TaskContext>) {
        self.enqueue(context, None);
    }

    fn enqueue(&self, context: Arc<TaskContext>, tag: Option<String>) {
        let job = Arc::new(PoolJob {
            context,
            tag,
            interrupt: Arc::new(Signal::new()),
            claimed: Signal::new(),
            thread_id: OnceLock::new(),
        });
        self.shared.jobs.lock().unwrap().push(job);
        PoolShared::queue_mutated(&self.shared);
        self.shared.notify.notify_all();
    }

    /// Number of jobs currently queued or running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.jobs.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.jobs.lock().unwrap().is_empty()
    }

    #[must_use]
    pub fn context_at(&self, index: usize) -> Option<Arc<TaskContext>> {
        self.shared
            .jobs
            .lock()
            .unwrap()
            .get(index)
            .map(|job| job.context.clone())
    }

    pub fn add_listener(&self, listener: Arc<dyn PoolListener>) {
        self.shared.listeners.lock().unwrap().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn PoolListener>) {
        self.shared
            .listeners
            .lock()
            .unwrap()
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    /// Discards every queued job and — with `interrupt` — flags every
    /// running job to stop, then waits up to `timeout` for the pool to
    /// empty. Returns false if jobs were still running when the time
    /// ran out.
    pub fn cancel_all(&self, interrupt: bool, timeout: Duration) -> bool {
        self.cancel_where(|_| true, interrupt, timeout)
    }

    /// [`TaskPool::cancel_all`] restricted to jobs submitted with `tag`.
    pub fn cancel_all_tagged(&self, tag: &str, interrupt: bool, timeout: Duration) -> bool {
        self.cancel_where(|job| job.tag.as_deref() == Some(tag), interrupt, timeout)
    }

    fn cancel_where(
        &self,
        matches: impl Fn(&PoolJob) -> bool,
        interrupt: bool,
        timeout: Duration,
    ) -> bool {
        {
            let mut jobs = self.shared.jobs.lock().unwrap();
            jobs.retain(|job| {
                if !matches(job) {
                    return true;
                }
                if job.claimed.raise() {
                    // A successful claim means the job never started;
                    // it is removed without running.
                    return false;
                }
                if interrupt {
                    job.interrupt.raise();
                }
                true
            });
        }
        PoolShared::queue_mutated(&self.shared);
        self.shared.notify.notify_all();

        let deadline = Instant::now() + timeout;
        loop {
            let seen = self.shared.notify.epoch();
            let still_running = {
                let jobs = self.shared.jobs.lock().unwrap();
                jobs.iter().any(|job| matches(job))
            };
            if !still_running {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("cancel timed out with jobs still running");
                return false;
            }
            self.shared.notify.wait_past_timeout(seen, deadline - now);
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.cancel_all(true, self.config.shutdown_timeout);
        self.shared.kill.raise();
        self.shared.notify.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        tracing::debug!("task pool shut down");
    }
}
