use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use concurrent_queue::ConcurrentQueue;

use crate::synca::{Notify, Signal};

use super::{DispatchAction, MessageDispatch};

/// Channel-backed message-dispatch loop.
///
/// Two modes of use:
///
/// 1. Dedicated: [`MessageLoop::spawn`] starts a named thread that owns
///    the loop and runs posted actions until [`MessageLoop::shutdown`].
///
/// 2. Pumped: create with [`MessageLoop::new`], then call
///    [`MessageLoop::pump`] or [`MessageLoop::drain`] from the thread
///    that should act as the message thread. The first thread to pump
///    claims the loop as its home thread.
///
/// Clones share the same queue and home thread.
#[derive(Clone)]
pub struct MessageLoop {
    inner: Arc<LoopInner>,
}

struct LoopInner {
    queue: ConcurrentQueue<DispatchAction>,
    notify: Notify,
    stop: Signal,
    home: Mutex<Option<ThreadId>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for MessageLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLoop {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LoopInner {
                queue: ConcurrentQueue::unbounded(),
                notify: Notify::new(),
                stop: Signal::new(),
                home: Mutex::new(None),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Starts a dedicated message thread running this loop.
    pub fn spawn(name: &str) -> io::Result<Self> {
        let message_loop = Self::new();
        let runner = message_loop.clone();
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || runner.run())?;
        *message_loop.inner.handle.lock().unwrap() = Some(handle);
        Ok(message_loop)
    }

    /// Claims the calling thread as the message thread.
    pub fn attach_current_thread(&self) {
        let mut home = self.inner.home.lock().unwrap();
        *home = Some(thread::current().id());
    }

    /// Runs actions on the calling thread until [`MessageLoop::shutdown`],
    /// claiming it as the message thread first.
    pub fn run(&self) {
        self.attach_current_thread();
        loop {
            let seen = self.inner.notify.epoch();
            let ran = self.run_pending();
            if self.inner.stop.is_raised() {
                self.run_pending();
                break;
            }
            if ran == 0 {
                self.inner.notify.wait_past(seen);
            }
        }
        tracing::debug!("message loop stopped");
    }

    /// Runs every action currently queued, returning how many ran. The
    /// calling thread becomes the message thread if none was claimed.
    pub fn drain(&self) -> usize {
        self.claim_if_unclaimed();
        self.run_pending()
    }

    /// Like [`MessageLoop::drain`], but parks up to `timeout` for the
    /// first action when the queue is empty.
    pub fn pump(&self, timeout: Duration) -> usize {
        self.claim_if_unclaimed();
        let seen = self.inner.notify.epoch();
        let ran = self.run_pending();
        if ran > 0 || timeout.is_zero() {
            return ran;
        }
        self.inner.notify.wait_past_timeout(seen, timeout);
        self.run_pending()
    }

    /// Stops a dedicated loop after its queue empties and joins the
    /// thread when called from elsewhere.
    pub fn shutdown(&self) {
        self.inner.stop.raise();
        self.inner.notify.notify_all();
        let handle = self.inner.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    fn claim_if_unclaimed(&self) {
        let mut home = self.inner.home.lock().unwrap();
        if home.is_none() {
            *home = Some(thread::current().id());
        }
    }

    fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(action) = self.inner.queue.pop() {
            action();
            ran += 1;
        }
        ran
    }
}

impl MessageDispatch for MessageLoop {
    fn is_dispatch_thread(&self) -> bool {
        *self.inner.home.lock().unwrap() == Some(thread::current().id())
    }

    fn post(&self, action: DispatchAction) {
        if self.inner.stop.is_raised() {
            tracing::warn!("action posted to a stopped message loop; dropping it");
            return;
        }
        if self.inner.queue.push(action).is_err() {
            tracing::warn!("message loop queue rejected an action; dropping it");
            return;
        }
        self.inner.notify.notify_all();
    }
}

#[cfg(test)]
mod test_message_loop {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn drain_runs_posted_actions_in_order() {
        let message_loop = MessageLoop::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for value in 0..3 {
            let seen = seen.clone();
            message_loop.post(Box::new(move || seen.lock().unwrap().push(value)));
        }

        assert_eq!(message_loop.drain(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert!(message_loop.is_dispatch_thread());
    }

    #[test]
    fn pump_waits_for_late_action() {
        let message_loop = MessageLoop::new();
        message_loop.attach_current_thread();
        let hits = Arc::new(AtomicUsize::new(0));

        let poster = message_loop.clone();
        let remote_hits = hits.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            poster.post(Box::new(move || {
                remote_hits.fetch_add(1, Ordering::SeqCst);
            }));
        });

        let ran = message_loop.pump(Duration::from_millis(500));
        handle.join().unwrap();
        assert_eq!(ran, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dedicated_loop_runs_actions_on_its_own_thread() {
        let message_loop = MessageLoop::spawn("test-dispatch").unwrap();
        let (done, observed) = {
            let done = Arc::new(Notify::new());
            (done.clone(), done)
        };
        let seen = done.epoch();

        let probe = message_loop.clone();
        let was_dispatch_thread = Arc::new(Mutex::new(None));
        let record = was_dispatch_thread.clone();
        message_loop.post(Box::new(move || {
            *record.lock().unwrap() = Some(probe.is_dispatch_thread());
            observed.notify_all();
        }));

        done.wait_past(seen);
        assert_eq!(*was_dispatch_thread.lock().unwrap(), Some(true));
        assert!(!message_loop.is_dispatch_thread());
        message_loop.shutdown();
    }
}
