//! Shutdown drain tracking.
//!
//! Every spawned listener or reconnect task holds an [`InflightGuard`] for
//! its lifetime. Shutdown waits for the count to reach zero instead of
//! sleeping a fixed grace period, with a timeout as the safety net for a
//! transport that fails to release its event senders.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Counts in-flight asynchronous work.
pub struct CallbackTracker {
    inflight: Mutex<usize>,
    drained: Condvar,
}

impl CallbackTracker {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    /// Register a unit of in-flight work. The returned guard must live for
    /// the whole task; dropping it is what marks the work finished.
    pub fn register(self: Arc<Self>) -> InflightGuard {
        *self.inflight.lock() += 1;
        InflightGuard { tracker: self }
    }

    /// Current number of in-flight tasks.
    pub fn inflight(&self) -> usize {
        *self.inflight.lock()
    }

    /// Block until all in-flight work has finished, or `timeout` elapses.
    /// Returns `true` when fully drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.inflight.lock();
        while *count > 0 {
            if self.drained.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

impl Default for CallbackTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle for one unit of in-flight work.
pub struct InflightGuard {
    tracker: Arc<CallbackTracker>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let mut count = self.tracker.inflight.lock();
        *count -= 1;
        if *count == 0 {
            self.tracker.drained.notify_all();
        }
    }
}
