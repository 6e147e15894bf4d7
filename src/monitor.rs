use std::sync::{Arc, Mutex, Weak};

use crate::dispatch::SharedDispatch;
use crate::synca::Signal;
use crate::tasks::{CompletionObserver, ContextObserver, TaskContext};

/// Passive adapter between a context's observer callbacks and a UI
/// component.
///
/// Holds at most one context, subscribes to both observer roles and
/// re-publishes everything as a single `refresh(context)` call that
/// always runs on the message thread. Rapid bursts of callbacks from
/// the worker thread coalesce into one refresh.
///
/// The monitor keeps its context alive; dropping the monitor (or
/// calling [`TaskMonitor::set_context`] with `None`) unsubscribes and
/// releases it.
pub struct TaskMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    dispatch: SharedDispatch,
    context: Mutex<Option<Arc<TaskContext>>>,
    refresh_pending: Signal,
    refresh: Box<dyn Fn(&TaskContext) + Send + Sync>,
    self_ref: Weak<MonitorInner>,
}

impl MonitorInner {
    fn trigger(&self) {
        if !self.refresh_pending.raise() {
            return;
        }
        let weak = self.self_ref.clone();
        self.dispatch.post(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.refresh_pending.clear();
            let context = inner.context.lock().unwrap().clone();
            if let Some(context) = context {
                tracing::trace!(task = %context.name(), "monitor refresh");
                (inner.refresh)(&context);
            }
        }));
    }
}

impl ContextObserver for MonitorInner {
    fn state_changed(&self, _context: &TaskContext) {
        self.trigger();
    }
}

impl CompletionObserver for MonitorInner {
    fn about_to_dispatch_completion_callbacks(&self, _context: &TaskContext) {
        self.trigger();
    }

    fn completion_callbacks_dispatched(&self, _context: &TaskContext) {
        self.trigger();
    }
}

impl TaskMonitor {
    pub fn new(
        dispatch: SharedDispatch,
        refresh: impl Fn(&TaskContext) + Send + Sync + 'static,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak| MonitorInner {
            dispatch,
            context: Mutex::new(None),
            refresh_pending: Signal::new(),
            refresh: Box::new(refresh),
            self_ref: weak.clone(),
        });
        Self { inner }
    }

    /// Assigns the context to observe, unsubscribing from the previous
    /// one, and triggers a refresh either way.
    pub fn set_context(&self, context: Option<Arc<TaskContext>>) {
        let unchanged = {
            let slot = self.inner.context.lock().unwrap();
            matches!(
                (slot.as_ref(), context.as_ref()),
                (Some(old), Some(new)) if Arc::ptr_eq(old, new)
            )
        };
        if unchanged {
            self.trigger_refresh();
            return;
        }

        let previous = {
            let mut slot = self.inner.context.lock().unwrap();
            std::mem::replace(&mut *slot, context.clone())
        };

        let observer: Arc<dyn ContextObserver> = self.inner.clone();
        let completion_observer: Arc<dyn CompletionObserver> = self.inner.clone();

        if let Some(previous) = previous {
            previous.remove_observer(&observer);
            previous.remove_completion_observer(&completion_observer);
        }
        if let Some(new) = context {
            new.add_observer(observer);
            new.add_completion_observer(completion_observer);
        }

        self.trigger_refresh();
    }

    #[must_use]
    pub fn context(&self) -> Option<Arc<TaskContext>> {
        self.inner.context.lock().unwrap().clone()
    }

    /// Schedules a `refresh` on the message thread; any number of
    /// pending triggers collapse into one call.
    pub fn trigger_refresh(&self) {
        self.inner.trigger();
    }
}

impl Drop for TaskMonitor {
    fn drop(&mut self) {
        self.set_context(None);
    }
}

#[cfg(test)]
mod test_monitor {
    use super::*;
    use crate::dispatch::{MessageLoop, SharedDispatch};
    use crate::drivers::CallerDriver;
    use crate::tasks::{ExecutionScope, FnTask, TaskContext};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn attached_loop() -> (MessageLoop, SharedDispatch) {
        let message_loop = MessageLoop::new();
        message_loop.attach_current_thread();
        let dispatch: SharedDispatch = Arc::new(message_loop.clone());
        (message_loop, dispatch)
    }

    #[test]
    fn bursts_of_events_coalesce_into_single_refreshes() {
        let (message_loop, dispatch) = attached_loop();
        let refreshes = Arc::new(AtomicUsize::new(0));
        let counter = refreshes.clone();
        let monitor = TaskMonitor::new(dispatch.clone(), move |_context| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let context = TaskContext::new(
            Box::new(FnTask::new("noop", |_: &ExecutionScope<'_>| Ok(()))),
            dispatch,
        );
        monitor.set_context(Some(context.clone()));

        let driver = CallerDriver::new();
        assert_eq!(context.run_on(&driver), Ok(()));

        // One refresh for the assignment plus every state change (they
        // all landed before the drain), one more re-armed by the
        // completion hooks.
        message_loop.drain();
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
        assert!(context.has_finished());
    }

    #[test]
    fn clearing_the_context_stops_refreshes() {
        let (message_loop, dispatch) = attached_loop();
        let refreshes = Arc::new(AtomicUsize::new(0));
        let counter = refreshes.clone();
        let monitor = TaskMonitor::new(dispatch.clone(), move |_context| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let context = TaskContext::new(
            Box::new(FnTask::new("noop", |_: &ExecutionScope<'_>| Ok(()))),
            dispatch,
        );
        monitor.set_context(Some(context.clone()));
        monitor.set_context(None);
        assert!(monitor.context().is_none());

        message_loop.drain();
        let after_clear = refreshes.load(Ordering::SeqCst);

        let driver = CallerDriver::new();
        assert_eq!(context.run_on(&driver), Ok(()));
        message_loop.drain();
        assert_eq!(refreshes.load(Ordering::SeqCst), after_clear);
    }
}
