//! Decides when the next sync request goes out.
//!
//! The scheduler holds no timers itself. Every transition takes the current
//! time as an argument, and the provider's event loop sleeps until
//! [`SyncScheduler::next_deadline`]. Tests drive it with fabricated instants.

use std::time::Duration;

use tokio::time::Instant;

/// Minimum spacing between the start of two requests.
pub const MIN_INTERVAL_BETWEEN_SYNCS: Duration = Duration::from_millis(500);

/// Longest time between two requests while connected. Keeps our presence
/// entry fresh for peers and pulls remote changes; must stay at or below half
/// of the presence offline timeout.
pub const MAX_INTERVAL_BETWEEN_SYNCS: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    TimerArmed { deadline: Instant },
    RequestInFlight,
}

/// Why a request is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fire {
    /// Local changes are waiting.
    Changes,
    /// Nothing was sent for `MAX_INTERVAL`; send even without changes.
    Periodic,
}

#[derive(Debug)]
pub struct SyncScheduler {
    state: SchedulerState,
    min_interval: Duration,
    max_interval: Duration,
    last_request_start: Option<Instant>,
    /// A trigger arrived while a request was in flight.
    deferred: bool,
}

impl SyncScheduler {
    pub fn new(min_interval: Duration, max_interval: Duration) -> Self {
        Self {
            state: SchedulerState::Idle,
            min_interval,
            max_interval,
            last_request_start: None,
            deferred: false,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Record a local change.
    pub fn trigger(&mut self, now: Instant) {
        match self.state {
            SchedulerState::Idle => self.arm(now),
            // The delta is computed when the timer fires, so it already
            // covers this change.
            SchedulerState::TimerArmed { .. } => {}
            SchedulerState::RequestInFlight => self.deferred = true,
        }
    }

    fn arm(&mut self, now: Instant) {
        let deadline = match self.last_request_start {
            Some(start) => (start + self.min_interval).max(now),
            None => now,
        };
        self.state = SchedulerState::TimerArmed { deadline };
    }

    /// When the event loop has to wake up next. The periodic deadline only
    /// counts while `periodic` (i.e. connected).
    pub fn next_deadline(&self, periodic: bool) -> Option<Instant> {
        match self.state {
            SchedulerState::TimerArmed { deadline } => Some(deadline),
            SchedulerState::Idle if periodic => self.periodic_deadline(),
            _ => None,
        }
    }

    fn periodic_deadline(&self) -> Option<Instant> {
        self.last_request_start.map(|start| start + self.max_interval)
    }

    /// Whether a request is due at `now`.
    pub fn poll(&self, now: Instant, periodic: bool) -> Option<Fire> {
        match self.state {
            SchedulerState::TimerArmed { deadline } if now >= deadline => {
                if periodic && self.periodic_deadline().is_some_and(|p| now >= p) {
                    Some(Fire::Periodic)
                } else {
                    Some(Fire::Changes)
                }
            }
            SchedulerState::Idle if periodic => self
                .periodic_deadline()
                .filter(|p| now >= *p)
                .map(|_| Fire::Periodic),
            _ => None,
        }
    }

    pub fn request_started(&mut self, now: Instant) {
        self.state = SchedulerState::RequestInFlight;
        self.last_request_start = Some(now);
        self.deferred = false;
    }

    /// A due request turned out to have nothing to send.
    pub fn request_skipped(&mut self) {
        if self.state != SchedulerState::RequestInFlight {
            self.state = SchedulerState::Idle;
        }
    }

    /// A due request could not be built. Counts as an attempt, so neither
    /// the periodic nor the change deadline is due again before its interval.
    pub fn request_abandoned(&mut self, now: Instant) {
        self.state = SchedulerState::Idle;
        self.last_request_start = Some(now);
        self.deferred = false;
    }

    /// The in-flight request completed, successfully or not.
    pub fn request_finished(&mut self, now: Instant) {
        self.state = SchedulerState::Idle;
        if std::mem::take(&mut self.deferred) {
            self.arm(now);
        }
    }
}

impl Default for SyncScheduler {
    fn default() -> Self {
        Self::new(MIN_INTERVAL_BETWEEN_SYNCS, MAX_INTERVAL_BETWEEN_SYNCS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = MIN_INTERVAL_BETWEEN_SYNCS;
    const MAX: Duration = MAX_INTERVAL_BETWEEN_SYNCS;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_first_trigger_fires_immediately() {
        let t0 = Instant::now();
        let mut scheduler = SyncScheduler::default();
        scheduler.trigger(t0);
        assert_eq!(scheduler.next_deadline(true), Some(t0));
        assert_eq!(scheduler.poll(t0, true), Some(Fire::Changes));
    }

    #[test]
    fn test_burst_within_min_interval_coalesces() {
        let t0 = Instant::now();
        let mut scheduler = SyncScheduler::default();
        scheduler.request_started(t0);
        scheduler.request_finished(t0 + ms(50));

        scheduler.trigger(t0 + ms(100));
        scheduler.trigger(t0 + ms(200));
        scheduler.trigger(t0 + ms(300));

        assert_eq!(
            scheduler.state(),
            SchedulerState::TimerArmed { deadline: t0 + MIN }
        );
        assert_eq!(scheduler.poll(t0 + ms(400), true), None);
        assert_eq!(scheduler.poll(t0 + MIN, true), Some(Fire::Changes));
    }

    #[test]
    fn test_trigger_after_min_interval_fires_immediately() {
        let t0 = Instant::now();
        let mut scheduler = SyncScheduler::default();
        scheduler.request_started(t0);
        scheduler.request_finished(t0 + ms(10));

        let later = t0 + MIN + ms(1);
        scheduler.trigger(later);
        assert_eq!(scheduler.poll(later, true), Some(Fire::Changes));
    }

    #[test]
    fn test_trigger_in_flight_is_deferred() {
        let t0 = Instant::now();
        let mut scheduler = SyncScheduler::default();
        scheduler.request_started(t0);
        scheduler.trigger(t0 + ms(10));

        assert_eq!(scheduler.state(), SchedulerState::RequestInFlight);
        assert_eq!(scheduler.poll(t0 + ms(10), true), None);
        assert_eq!(scheduler.next_deadline(true), None);

        scheduler.request_finished(t0 + ms(100));
        assert_eq!(
            scheduler.state(),
            SchedulerState::TimerArmed { deadline: t0 + MIN }
        );
    }

    #[test]
    fn test_finish_without_triggers_goes_idle() {
        let t0 = Instant::now();
        let mut scheduler = SyncScheduler::default();
        scheduler.request_started(t0);
        scheduler.request_finished(t0 + ms(100));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_periodic_trigger_only_while_enabled() {
        let t0 = Instant::now();
        let mut scheduler = SyncScheduler::default();
        assert_eq!(scheduler.next_deadline(true), None);

        scheduler.request_started(t0);
        scheduler.request_finished(t0 + ms(20));

        assert_eq!(scheduler.next_deadline(true), Some(t0 + MAX));
        assert_eq!(scheduler.next_deadline(false), None);
        assert_eq!(scheduler.poll(t0 + MAX - ms(1), true), None);
        assert_eq!(scheduler.poll(t0 + MAX, true), Some(Fire::Periodic));
        assert_eq!(scheduler.poll(t0 + MAX, false), None);
    }

    #[test]
    fn test_overdue_armed_timer_reports_periodic() {
        let t0 = Instant::now();
        let mut scheduler = SyncScheduler::default();
        scheduler.request_started(t0);
        scheduler.request_finished(t0);
        scheduler.trigger(t0 + MAX);
        assert_eq!(scheduler.poll(t0 + MAX, true), Some(Fire::Periodic));
        assert_eq!(scheduler.poll(t0 + MAX, false), Some(Fire::Changes));
    }

    #[test]
    fn test_abandoned_request_pushes_deadlines_forward() {
        let t0 = Instant::now();
        let mut scheduler = SyncScheduler::default();
        scheduler.request_started(t0);
        scheduler.request_finished(t0);

        let due = t0 + MAX;
        assert_eq!(scheduler.poll(due, true), Some(Fire::Periodic));
        scheduler.request_abandoned(due);

        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.poll(due, true), None);
        assert_eq!(scheduler.next_deadline(true), Some(due + MAX));

        scheduler.trigger(due + ms(10));
        assert_eq!(scheduler.next_deadline(true), Some(due + MIN));
    }

    #[test]
    fn test_skipped_request_returns_to_idle() {
        let t0 = Instant::now();
        let mut scheduler = SyncScheduler::default();
        scheduler.trigger(t0);
        scheduler.request_skipped();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }
}
