use std::time::{Duration, Instant};

/// Lets a call through at most once per `period`.
///
/// The window starts when a call is admitted, regardless of how that call
/// turns out.
#[derive(Debug, Clone)]
pub struct Throttle {
    period: Duration,
    last_admitted: Option<Instant>,
}

impl Throttle {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_admitted: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Returns true and opens a new window if the previous one has elapsed.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_admitted {
            if now.saturating_duration_since(last) < self.period {
                return false;
            }
        }
        self.last_admitted = Some(now);
        true
    }
}
