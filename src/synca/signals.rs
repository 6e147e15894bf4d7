use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A one-bit latch shared between threads.
///
/// Used for the abort and interruption flags tasks poll, for the
/// run-mark a task carries while it has a live execution scope, and
/// for the coalescing flags behind async notifications.
#[derive(Debug, Default)]
pub struct Signal {
    state: AtomicBool,
}

impl Signal {
    pub fn new() -> Self {
        Self {
            state: AtomicBool::new(false),
        }
    }

    /// `raise` flips the signal from cleared to raised, returning
    /// false when it was already raised.
    #[inline]
    pub fn raise(&self) -> bool {
        self.state
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    /// `clear` flips the signal from raised back to cleared, returning
    /// false when it was already cleared.
    #[inline]
    pub fn clear(&self) -> bool {
        self.state
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    /// `is_raised` returns true while the signal is raised.
    #[inline]
    pub fn is_raised(&self) -> bool {
        self.state.load(Ordering::Acquire)
    }
}

/// Cloneable handle over a shared [`Signal`], carried by every task as
/// its abort flag. Setting it is idempotent; a task observes it through
/// `should_abort` on its execution scope.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal(Arc<Signal>);

impl AbortSignal {
    pub fn new() -> Self {
        Self(Arc::new(Signal::new()))
    }

    /// Requests the owning task to abort.
    #[inline]
    pub fn set(&self) {
        self.0.raise();
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.is_raised()
    }

    /// Re-arms the signal so the owning task can be run again.
    #[inline]
    pub fn reset(&self) {
        self.0.clear();
    }
}

#[cfg(test)]
mod test_signals {
    use super::*;

    #[test]
    fn signal_raise_and_clear_are_edge_triggered() {
        let signal = Signal::new();
        assert!(!signal.is_raised());
        assert!(signal.raise());
        assert!(!signal.raise());
        assert!(signal.is_raised());
        assert!(signal.clear());
        assert!(!signal.clear());
        assert!(!signal.is_raised());
    }

    #[test]
    fn abort_signal_is_shared_between_clones() {
        let signal = AbortSignal::new();
        let other = signal.clone();
        other.set();
        assert!(signal.is_set());
        signal.reset();
        assert!(!other.is_set());
    }
}
