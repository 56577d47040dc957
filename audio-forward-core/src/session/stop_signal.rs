use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// One-shot stop flag that also interrupts timed waits.
///
/// Raised by `SessionController::stop`; polled by accept loops and used as an
/// interruptible sleep between connection retries.
#[derive(Debug, Default)]
pub struct StopSignal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        *self.raised.lock() = true;
        self.cond.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        *self.raised.lock()
    }

    /// Sleep up to `timeout`; returns true if the signal was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.raised.lock();
        while !*raised {
            if self.cond.wait_until(&mut raised, deadline).timed_out() {
                break;
            }
        }
        *raised
    }
}
