use std::time::Duration;

/// Capped exponential backoff.
///
/// Each layer carries its own discipline: RPC rotation 500 ms x2 capped at
/// 5 s, push reconnects 1 s x2 capped at 60 s, catalog retries 1 s x2 capped
/// at 10 s or 30 s depending on the loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            current: base,
        }
    }

    /// Current delay, then double for the next failure.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        delay
    }

    /// Peek without advancing.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
