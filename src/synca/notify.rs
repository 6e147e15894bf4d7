use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Epoch-counting Condvar wakeup.
///
/// Waiters snapshot the epoch, re-check whatever state they guard
/// themselves, then park until the epoch moves past the snapshot. Since
/// every mutation bumps the epoch before notifying, a wakeup that lands
/// between the snapshot and the park is never lost.
pub struct Notify {
    epoch: Mutex<u64>,
    cond: Condvar,
}

impl Default for Notify {
    fn default() -> Self {
        Self::new()
    }
}

impl Notify {
    pub fn new() -> Self {
        Self {
            epoch: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Current epoch; pass this to one of the wait calls.
    pub fn epoch(&self) -> u64 {
        *self.epoch.lock().unwrap()
    }

    /// Bumps the epoch and wakes every waiter.
    pub fn notify_all(&self) {
        let mut epoch = self.epoch.lock().unwrap();
        *epoch = epoch.wrapping_add(1);
        drop(epoch);
        self.cond.notify_all();
    }

    /// Parks the caller until the epoch moves past `seen`.
    pub fn wait_past(&self, seen: u64) {
        let mut epoch = self.epoch.lock().unwrap();
        while *epoch == seen {
            epoch = self.cond.wait(epoch).unwrap();
        }
    }

    /// Parks the caller until the epoch moves past `seen` or `timeout`
    /// elapses, returning true when the epoch moved.
    pub fn wait_past_timeout(&self, seen: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut epoch = self.epoch.lock().unwrap();
        while *epoch == seen {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, result) = self.cond.wait_timeout(epoch, deadline - now).unwrap();
            epoch = next;
            if result.timed_out() && *epoch == seen {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod test_notify {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn notify_wakes_parked_waiter() {
        let notify = Arc::new(Notify::new());
        let seen = notify.epoch();

        let remote = notify.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.notify_all();
        });

        notify.wait_past(seen);
        assert_ne!(notify.epoch(), seen);
        handle.join().unwrap();
    }

    #[test]
    fn wait_past_timeout_expires_without_notification() {
        let notify = Notify::new();
        let seen = notify.epoch();
        assert!(!notify.wait_past_timeout(seen, Duration::from_millis(10)));
    }

    #[test]
    fn wait_past_returns_immediately_on_stale_epoch() {
        let notify = Notify::new();
        let seen = notify.epoch();
        notify.notify_all();
        notify.wait_past(seen);
    }
}
