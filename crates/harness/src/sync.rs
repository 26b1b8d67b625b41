//! Countdown latch used as the worker start barrier
//!
//! Every worker signals arrival with [`CountDownLatch::count_down`] after
//! finishing its per-thread setup, then blocks in [`CountDownLatch::wait`]
//! until all peers have signaled. The parent polls
//! [`CountDownLatch::count`] to detect startup failures without joining.

use parking_lot::{Condvar, Mutex};

/// A one-shot countdown latch
pub struct CountDownLatch {
    count: Mutex<usize>,
    zeroed: Condvar,
}

impl CountDownLatch {
    /// Create a latch that opens after `count` signals
    pub fn new(count: usize) -> Self {
        CountDownLatch {
            count: Mutex::new(count),
            zeroed: Condvar::new(),
        }
    }

    /// Signal arrival; saturates at zero
    pub fn count_down(&self) {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            if *count == 0 {
                self.zeroed.notify_all();
            }
        }
    }

    /// Block until the count reaches zero
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.zeroed.wait(&mut count);
        }
    }

    /// Current count (signals still outstanding)
    pub fn count(&self) -> usize {
        *self.count.lock()
    }
}
