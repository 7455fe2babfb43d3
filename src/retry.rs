use std::time::Duration;

// ============================================================================
// Bounded Backoff Schedules
// ============================================================================
//
// Delay sequences for retrying transient failures. The caller owns the loop
// and the error classification; `Backoff` only answers "how long until the
// next attempt, if any". Exponential doubles up to a cap (fetch retries),
// linear grows by the base each attempt (offset commits).
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Schedule {
    Exponential { cap: Duration },
    Linear,
}

#[derive(Debug, Clone)]
pub struct Backoff {
    schedule: Schedule,
    base: Duration,
    next: Duration,
    attempt: u32,
    max_retries: u32,
}

impl Backoff {
    /// Delays of `base, 2*base, 4*base, …` capped at `cap`, at most
    /// `max_retries` of them.
    pub fn exponential(base: Duration, cap: Duration, max_retries: u32) -> Self {
        Self {
            schedule: Schedule::Exponential { cap },
            base,
            next: base,
            attempt: 0,
            max_retries,
        }
    }

    /// Delays of `base, 2*base, 3*base, …`, at most `max_retries` of them.
    pub fn linear(base: Duration, max_retries: u32) -> Self {
        Self {
            schedule: Schedule::Linear,
            base,
            next: base,
            attempt: 0,
            max_retries,
        }
    }

    /// The delay before the next attempt, or `None` once retries are spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        self.attempt += 1;
        match self.schedule {
            Schedule::Exponential { cap } => {
                let delay = self.next;
                self.next = (self.next * 2).min(cap);
                Some(delay)
            }
            Schedule::Linear => Some(self.base * self.attempt),
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forget accumulated failures after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next = self.base;
    }
}
