use std::time::Duration;

/// Fixed-window request counter.
///
/// Callers check `is_full` before each request, pause for `pause()` and
/// `reset` when it is, then `record` the request once it is sent.
#[derive(Debug, Clone)]
pub struct RequestWindow {
    limit: u32,
    pause: Duration,
    count: u32,
}

impl RequestWindow {
    pub fn new(limit: u32, pause: Duration) -> Self {
        Self {
            limit: limit.max(1),
            pause,
            count: 0,
        }
    }

    pub fn record(&mut self) {
        self.count += 1;
    }

    /// True once `limit` requests were recorded since the last reset.
    pub fn is_full(&self) -> bool {
        self.count >= self.limit
    }

    /// Start a new window.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn pause(&self) -> Duration {
        self.pause
    }
}
