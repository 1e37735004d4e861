use std::time::Duration;

/// Accumulates loop time and signals when a report is due.
///
/// Callers must `reset` after acting on a due signal whether or not the send
/// succeeded; a failing collector is retried at the next interval, not sooner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportScheduler {
    interval: Duration,
    elapsed: Duration,
}

impl ReportScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            elapsed: Duration::ZERO,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn tick(&mut self, elapsed: Duration) -> bool {
        self.elapsed = self.elapsed.saturating_add(elapsed);
        self.elapsed >= self.interval
    }

    pub fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
    }
}
