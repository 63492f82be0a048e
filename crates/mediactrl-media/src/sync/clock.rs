use std::time::{Duration, Instant};

/// A monotonic, drift-compensating elapsed-time source.
///
/// Every tick-driven loop in this stack (the mixer's 20 ms conference tick,
/// the IVR playback/record tick, the transaction extended-transaction timer,
/// the Client keepalive timer) needs the same property: each deadline is
/// computed from the *previous* deadline plus the tick period, not from
/// `Instant::now()` plus the period, so that scheduling jitter on one tick
/// does not accumulate into permanent drift.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed since this clock was created.
    pub fn elapsed_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// A drift-compensating periodic deadline: `next = previous + period`,
/// never `now + period`. Used directly by the mixer and IVR 20 ms ticks.
#[derive(Debug, Clone, Copy)]
pub struct TickSchedule {
    period: Duration,
    next_deadline: Instant,
}

impl TickSchedule {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next_deadline: Instant::now() + period,
        }
    }

    /// The standard 20 ms media tick used by the mixer and IVR playback
    /// loops.
    pub fn media_tick() -> Self {
        Self::new(Duration::from_millis(20))
    }

    /// The deadline the caller should sleep until for the next tick.
    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    /// Advance the schedule by exactly one period, regardless of how late
    /// (or early) `now` actually ran. Call this once per tick after the
    /// sleep completes.
    pub fn advance(&mut self) {
        self.next_deadline += self.period;
    }

    /// How many periods behind the schedule currently is, for logging.
    pub fn lag(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.next_deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_schedule_advances_by_exact_period_not_wall_clock() {
        let mut sched = TickSchedule::new(Duration::from_millis(20));
        let first = sched.next_deadline();
        sched.advance();
        let second = sched.next_deadline();
        assert_eq!(second - first, Duration::from_millis(20));
    }

    #[test]
    fn elapsed_ms_is_monotonic() {
        let clock = MonotonicClock::new();
        let a = clock.elapsed_ms();
        std::thread::sleep(Duration::from_millis(5));
        let b = clock.elapsed_ms();
        assert!(b >= a);
    }
}
