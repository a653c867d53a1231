use super::{PollMeter, WorkMetrics};
use std::time::{Duration, Instant};

enum Phase {
    Fresh,
    Polling(Instant),
    Waiting(Instant),
    Done,
}

/// Splits a future's lifetime into time spent inside `poll` and time spent
/// waiting to be woken.
pub struct WallClockMeter {
    phase: Phase,
    wake_time: Duration,
    idle_time: Duration,
}

impl WallClockMeter {
    pub fn wake_time(&self) -> Duration {
        self.wake_time
    }

    pub fn idle_time(&self) -> Duration {
        self.idle_time
    }
}

impl PollMeter for WallClockMeter {
    fn new() -> Self {
        Self {
            phase: Phase::Fresh,
            wake_time: Duration::ZERO,
            idle_time: Duration::ZERO,
        }
    }

    fn prepare(&mut self) {
        if let Phase::Waiting(since) = self.phase {
            self.idle_time += since.elapsed();
        }
        self.phase = Phase::Polling(Instant::now());
    }

    fn update(&mut self, is_ready: bool) {
        let now = Instant::now();
        if let Phase::Polling(since) = self.phase {
            self.wake_time += now - since;
        }
        self.phase = if is_ready {
            Phase::Done
        } else {
            Phase::Waiting(now)
        };
    }

    fn metrics(&self) -> WorkMetrics {
        WorkMetrics {
            wake_time: self.wake_time,
            idle_time: self.idle_time,
            ..WorkMetrics::default()
        }
    }
}
