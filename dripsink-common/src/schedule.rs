//! Due-time tracking shared by sources and the sink heartbeat.

use std::time::{Duration, Instant};

/// Tracks when a periodic piece of work is next due.
///
/// A fresh schedule is immediately due. Committing via [`Schedule::advance`]
/// always moves the due time forward, to exactly `now + interval` measured
/// from the moment of the commit — never from the previous due time. Callers
/// commit *before* doing the gated work, so a slow or failing run cannot cause
/// tight re-firing within the same interval.
#[derive(Debug, Clone)]
pub struct Schedule {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Schedule {
    /// Create a schedule that fires every `interval`, starting immediately.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    /// The configured period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the work is due at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due.is_none_or(|due| now >= due)
    }

    /// Commit the next due time to `now + interval`.
    pub fn advance(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
    }

    /// Check-and-commit in one step.
    ///
    /// Returns `true` (and advances the due time) if the work was due at
    /// `now`; returns `false` with no side effect otherwise.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.advance(now);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_fresh_schedule_is_due() {
        let schedule = Schedule::new(secs(60));
        assert!(schedule.is_due(Instant::now()));
    }

    #[test]
    fn test_tick_commits_exactly_one_interval_from_poll_time() {
        let mut schedule = Schedule::new(secs(60));
        let start = Instant::now();

        assert!(schedule.tick(start));
        assert!(!schedule.is_due(start + secs(59)));
        assert!(schedule.is_due(start + secs(60)));
    }

    #[test]
    fn test_not_due_tick_has_no_side_effect() {
        let mut schedule = Schedule::new(secs(60));
        let start = Instant::now();

        assert!(schedule.tick(start));
        assert!(!schedule.tick(start + secs(30)));
        // Still due at the originally committed time.
        assert!(schedule.is_due(start + secs(60)));
    }

    #[test]
    fn test_late_tick_advances_from_poll_time_not_due_time() {
        let mut schedule = Schedule::new(secs(60));
        let start = Instant::now();

        assert!(schedule.tick(start));
        // Fire 100s late; the next due time is measured from the late poll.
        assert!(schedule.tick(start + secs(160)));
        assert!(!schedule.is_due(start + secs(219)));
        assert!(schedule.is_due(start + secs(220)));
    }
}
