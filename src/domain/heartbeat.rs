//! Backbone liveness tracking.
//!
//! The backbone subscription can die silently when the pub/sub server
//! restarts. An external producer publishes a heartbeat on the same channel
//! at a fixed interval; [`HeartbeatState`] records when the last one was
//! seen and [`HeartbeatMonitor`] decides when the silence is long enough to
//! restart the process.
//!
//! All functions take `now` explicitly so the policy is testable without a
//! clock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Process-wide heartbeat bookkeeping. One instance, lives as long as the
/// broker.
#[derive(Debug, Clone)]
pub struct HeartbeatState {
    startup_time: Instant,
    started_at: DateTime<Utc>,
    last_backbone_heartbeat: Instant,
}

impl HeartbeatState {
    /// Starts tracking at `now`; the first deadline counts from startup.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            startup_time: now,
            started_at: Utc::now(),
            last_backbone_heartbeat: now,
        }
    }

    /// Records a heartbeat. The timestamp never moves backwards.
    pub fn record_heartbeat(&mut self, now: Instant) {
        if now > self.last_backbone_heartbeat {
            self.last_backbone_heartbeat = now;
        }
    }

    /// Instant of the most recent heartbeat (or startup).
    #[must_use]
    pub const fn last_heartbeat(&self) -> Instant {
        self.last_backbone_heartbeat
    }

    /// `now - last_backbone_heartbeat`, saturating at zero.
    #[must_use]
    pub fn time_since_heartbeat(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_backbone_heartbeat)
    }

    /// Time elapsed since startup.
    #[must_use]
    pub fn uptime(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.startup_time)
    }

    /// Wall-clock startup time.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Outcome of one monitor check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// Heartbeats are arriving within the deadline.
    Healthy {
        /// Time since the last heartbeat.
        silent_for: Duration,
    },
    /// Deadline missed, but restarts are disabled (development mode).
    OverdueSuppressed {
        /// Time since the last heartbeat.
        silent_for: Duration,
    },
    /// Deadline missed; the process must restart.
    Restart {
        /// Time since the last heartbeat.
        silent_for: Duration,
    },
}

/// Monitor state. `Restarting` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    /// No missed deadline observed.
    Healthy,
    /// A restart has been decided.
    Restarting,
}

/// Periodic self-check against the heartbeat deadline.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    grace: Duration,
    development_mode: bool,
    status: MonitorStatus,
}

impl HeartbeatMonitor {
    /// Creates a monitor for a nominal heartbeat `interval`.
    ///
    /// The process restarts after two missed heartbeats plus `grace`.
    #[must_use]
    pub const fn new(interval: Duration, grace: Duration, development_mode: bool) -> Self {
        Self {
            interval,
            grace,
            development_mode,
            status: MonitorStatus::Healthy,
        }
    }

    /// Maximum tolerated silence: `2 * interval + grace`.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.interval.saturating_mul(2).saturating_add(self.grace)
    }

    /// Current state.
    #[must_use]
    pub const fn status(&self) -> MonitorStatus {
        self.status
    }

    /// Checks the heartbeat state at `now`.
    ///
    /// Once a restart has been decided every later check also returns
    /// [`HeartbeatVerdict::Restart`].
    pub fn check(&mut self, state: &HeartbeatState, now: Instant) -> HeartbeatVerdict {
        let silent_for = state.time_since_heartbeat(now);
        if self.status == MonitorStatus::Restarting {
            return HeartbeatVerdict::Restart { silent_for };
        }
        if silent_for <= self.deadline() {
            return HeartbeatVerdict::Healthy { silent_for };
        }
        if self.development_mode {
            return HeartbeatVerdict::OverdueSuppressed { silent_for };
        }
        self.status = MonitorStatus::Restarting;
        HeartbeatVerdict::Restart { silent_for }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(120);
    const GRACE: Duration = Duration::from_secs(5);

    #[test]
    fn deadline_is_two_intervals_plus_grace() {
        let monitor = HeartbeatMonitor::new(INTERVAL, GRACE, false);
        assert_eq!(monitor.deadline(), Duration::from_secs(245));
    }

    #[test]
    fn restarts_only_after_deadline() {
        let t0 = Instant::now();
        let state = HeartbeatState::new(t0);
        let mut monitor = HeartbeatMonitor::new(INTERVAL, GRACE, false);

        let at_244 = monitor.check(&state, t0 + Duration::from_secs(244));
        assert!(matches!(at_244, HeartbeatVerdict::Healthy { .. }));
        let at_245 = monitor.check(&state, t0 + Duration::from_secs(245));
        assert!(matches!(at_245, HeartbeatVerdict::Healthy { .. }));
        assert_eq!(monitor.status(), MonitorStatus::Healthy);

        let at_246 = monitor.check(&state, t0 + Duration::from_secs(246));
        assert_eq!(
            at_246,
            HeartbeatVerdict::Restart {
                silent_for: Duration::from_secs(246)
            }
        );
        assert_eq!(monitor.status(), MonitorStatus::Restarting);
    }

    #[test]
    fn heartbeat_resets_the_deadline() {
        let t0 = Instant::now();
        let mut state = HeartbeatState::new(t0);
        let mut monitor = HeartbeatMonitor::new(INTERVAL, GRACE, false);

        state.record_heartbeat(t0 + Duration::from_secs(200));
        let verdict = monitor.check(&state, t0 + Duration::from_secs(400));
        assert_eq!(
            verdict,
            HeartbeatVerdict::Healthy {
                silent_for: Duration::from_secs(200)
            }
        );
    }

    #[test]
    fn heartbeat_never_moves_backwards() {
        let t0 = Instant::now();
        let mut state = HeartbeatState::new(t0);
        state.record_heartbeat(t0 + Duration::from_secs(10));
        state.record_heartbeat(t0 + Duration::from_secs(5));
        assert_eq!(state.last_heartbeat(), t0 + Duration::from_secs(10));
        assert_eq!(
            state.time_since_heartbeat(t0 + Duration::from_secs(15)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn development_mode_suppresses_restart() {
        let t0 = Instant::now();
        let state = HeartbeatState::new(t0);
        let mut monitor = HeartbeatMonitor::new(INTERVAL, GRACE, true);

        let verdict = monitor.check(&state, t0 + Duration::from_secs(1000));
        assert!(matches!(verdict, HeartbeatVerdict::OverdueSuppressed { .. }));
        assert_eq!(monitor.status(), MonitorStatus::Healthy);
    }

    #[test]
    fn restarting_is_terminal() {
        let t0 = Instant::now();
        let mut state = HeartbeatState::new(t0);
        let mut monitor = HeartbeatMonitor::new(INTERVAL, GRACE, false);

        let _ = monitor.check(&state, t0 + Duration::from_secs(300));
        state.record_heartbeat(t0 + Duration::from_secs(301));
        let verdict = monitor.check(&state, t0 + Duration::from_secs(302));
        assert!(matches!(verdict, HeartbeatVerdict::Restart { .. }));
    }

    #[test]
    fn uptime_counts_from_startup() {
        let t0 = Instant::now();
        let state = HeartbeatState::new(t0);
        assert_eq!(state.uptime(t0 + Duration::from_secs(42)), Duration::from_secs(42));
    }
}
