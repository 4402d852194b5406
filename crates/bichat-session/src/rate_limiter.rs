//! Fixed-window send gate.
//!
//! Gates how frequently the controller may invoke `send_message`. Exhaustion
//! surfaces a user-visible throttling error; it never queues (the outbound
//! queue is for "busy", not "over limit").

use std::time::{Duration, Instant};

/// Fixed-window counter limiting sends per window.
#[derive(Debug)]
pub struct RateLimiter {
    max_sends: u32,
    window: Duration,
    window_start: Instant,
    used: u32,
}

impl RateLimiter {
    /// Creates a limiter allowing `max_sends` acquisitions per `window`.
    pub fn new(max_sends: u32, window: Duration) -> Self {
        Self {
            max_sends,
            window,
            window_start: Instant::now(),
            used: 0,
        }
    }

    /// Attempts to consume one send slot.
    ///
    /// Returns `false` when the current window is exhausted.
    pub fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.used = 0;
        }
        if self.used >= self.max_sends {
            return false;
        }
        self.used += 1;
        true
    }
}

impl Default for RateLimiter {
    /// 10 sends per 10 seconds, matching the widget's input throttle.
    fn default() -> Self {
        Self::new(10, Duration::from_secs(10))
    }
}
