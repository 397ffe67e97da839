//! Safety guards: per-ticker rate-limit circuit breaker and run-level
//! wall-clock deadline. Both stop work cleanly, flushing whatever has
//! already been assembled; neither counts as a hard failure.

use std::time::{Duration, Instant};

/// Trips after N consecutive rate-limited responses for one ticker.
/// Any successful call resets the streak.
#[derive(Debug)]
pub struct RateLimitBreaker {
    limit: u32,
    consecutive: u32,
}

impl RateLimitBreaker {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            consecutive: 0,
        }
    }

    /// Record one rate-limited response. Returns true when the breaker
    /// has tripped.
    pub fn record_rate_limit(&mut self) -> bool {
        self.consecutive += 1;
        self.tripped()
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn tripped(&self) -> bool {
        self.consecutive >= self.limit
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Pause before retrying a throttled call: grows linearly with the
    /// streak, capped at one minute.
    pub fn backoff(&self) -> Duration {
        let secs = (2 * self.consecutive as u64).min(60);
        Duration::from_secs(secs)
    }
}

/// Wall-clock budget for the whole run. A zero budget disables the check.
#[derive(Debug, Clone, Copy)]
pub struct RunDeadline {
    deadline: Option<Instant>,
}

impl RunDeadline {
    pub fn from_minutes(minutes: f64) -> Self {
        let deadline = if minutes > 0.0 {
            Some(Instant::now() + Duration::from_secs_f64(minutes * 60.0))
        } else {
            None
        };
        Self { deadline }
    }

    pub fn unlimited() -> Self {
        Self { deadline: None }
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Sleep seam so tests can run backoff logic without waiting.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Production sleeper: blocks the current thread.
#[derive(Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}
