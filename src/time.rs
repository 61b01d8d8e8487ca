use std::time;

/// Source of millisecond timestamps for retransmission and connection timers.
pub trait Clock {
    /// Milliseconds elapsed since some fixed reference point.
    fn now_ms(&self) -> u64;
}

/// Wall clock. Timestamps are computed relative to the instant the clock was created.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    time_ref: time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            time_ref: time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        (time::Instant::now() - self.time_ref).as_millis() as u64
    }
}

impl<C> Clock for &C
where
    C: Clock + ?Sized,
{
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// A single deadline on a [`Clock`], armed and disarmed explicitly.
#[derive(Clone, Copy, Debug, Default)]
pub struct Timer {
    timeout_ms: Option<u64>,
}

impl Timer {
    pub fn set(&mut self, time_ms: u64) {
        self.timeout_ms = Some(time_ms);
    }

    pub fn unset(&mut self) {
        self.timeout_ms = None;
    }

    pub fn is_set(&self) -> bool {
        self.timeout_ms.is_some()
    }

    /// Returns true if the timer is set and has expired.
    pub fn expired(&self, now_ms: u64) -> bool {
        matches!(self.timeout_ms, Some(t_ms) if now_ms >= t_ms)
    }

    /// Returns the time remaining until the timer expires, or `None` if it is not set.
    pub fn remaining(&self, now_ms: u64) -> Option<time::Duration> {
        self.timeout_ms
            .map(|t_ms| time::Duration::from_millis(t_ms.saturating_sub(now_ms)))
    }
}
