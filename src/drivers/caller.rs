use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::synca::Signal;

use super::{ExitProbe, WorkerDriver};

/// The simplest driver: runs a context synchronously on whatever thread
/// created it. Useful when the caller already owns a background thread,
/// and in tests that want deterministic single-threaded execution.
pub struct CallerDriver {
    interrupt: Arc<Signal>,
    home: ThreadId,
}

impl Default for CallerDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl CallerDriver {
    pub fn new() -> Self {
        Self {
            interrupt: Arc::new(Signal::new()),
            home: thread::current().id(),
        }
    }

    /// Asks the running task to wind down.
    pub fn interrupt(&self) {
        self.interrupt.raise();
    }
}

impl WorkerDriver for CallerDriver {
    fn current_thread_should_exit(&self) -> bool {
        self.interrupt.is_raised()
    }

    fn is_on_driver_thread(&self) -> bool {
        thread::current().id() == self.home
    }

    fn exit_probe(&self) -> ExitProbe {
        let interrupt = self.interrupt.clone();
        ExitProbe::new(move || interrupt.is_raised())
    }
}
