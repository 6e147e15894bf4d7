use std::sync::Arc;

/// A deferred action posted to the message thread.
pub type DispatchAction = Box<dyn FnOnce() + Send>;

/// The two queries the host environment must answer for the runtime:
/// whether the caller is already on the message-dispatch thread, and
/// how to hand an action to that thread.
///
/// Everything the runtime promises about the message thread (completion
/// callbacks, queue-changed notifications, monitor refreshes) is
/// expressed against this trait, so the host's UI toolkit stays out of
/// the picture. [`MessageLoop`](crate::dispatch::MessageLoop) is a
/// ready-made implementation for hosts without one.
pub trait MessageDispatch: Send + Sync {
    /// True only when called from the message-dispatch thread.
    fn is_dispatch_thread(&self) -> bool;

    /// Enqueues `action` to run on the message-dispatch thread.
    fn post(&self, action: DispatchAction);
}

/// Shared handle to the host's dispatch seam.
pub type SharedDispatch = Arc<dyn MessageDispatch>;
