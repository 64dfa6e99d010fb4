//! Shared cooldown state for throttling responses from the recognition service.
//!
//! One coordinator is shared by every worker. A rate-limited response puts the
//! whole pool into a cooldown window whose length grows with each consecutive
//! rate-limited response; once the schedule is exhausted the run is halted.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Progressive backoff schedule, indexed by consecutive rate-limit count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    schedule: Vec<Duration>,
}

impl BackoffPolicy {
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self { schedule }
    }

    /// Cooldown for the given 1-based attempt, or `None` once the schedule is exhausted
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        let index = usize::try_from(attempt).ok()?.checked_sub(1)?;
        self.schedule.get(index).copied()
    }

    pub fn max_attempts(&self) -> u32 {
        u32::try_from(self.schedule.len()).unwrap_or(u32::MAX)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(30),
            Duration::from_secs(60),
            Duration::from_secs(120),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPhase {
    Normal,
    Cooling { until: Instant, attempt: u32 },
    /// Terminal for the run
    Halted,
}

/// Answer to "may this worker contact the service now?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    CoolingDown { remaining: Duration },
    Halted,
}

/// What the coordinator decided after a rate-limited response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    Cooldown { delay: Duration, attempt: u32 },
    Halt { attempts: u32 },
}

#[derive(Debug)]
struct RateLimitState {
    phase: RateLimitPhase,
    consecutive: u32,
}

pub struct RateLimitCoordinator {
    policy: BackoffPolicy,
    state: Mutex<RateLimitState>,
}

impl RateLimitCoordinator {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(RateLimitState {
                phase: RateLimitPhase::Normal,
                consecutive: 0,
            }),
        }
    }

    /// Check the cooldown window, leaving it if it has expired
    pub fn admit(&self, now: Instant) -> Admission {
        let mut state = self.lock();
        match state.phase {
            RateLimitPhase::Normal => Admission::Proceed,
            RateLimitPhase::Halted => Admission::Halted,
            RateLimitPhase::Cooling { until, .. } if now >= until => {
                info!("✅ Rate-limit cooldown expired, resuming requests");
                state.phase = RateLimitPhase::Normal;
                Admission::Proceed
            }
            RateLimitPhase::Cooling { until, .. } => Admission::CoolingDown {
                remaining: until - now,
            },
        }
    }

    /// A recognition succeeded: the consecutive count starts over
    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.phase == RateLimitPhase::Halted {
            return;
        }
        state.phase = RateLimitPhase::Normal;
        state.consecutive = 0;
    }

    /// A rate-limited response arrived and no proxy rotation is configured
    pub fn record_rate_limited(&self, now: Instant) -> Escalation {
        let mut state = self.lock();
        if state.phase == RateLimitPhase::Halted {
            return Escalation::Halt {
                attempts: state.consecutive,
            };
        }

        state.consecutive += 1;
        let attempt = state.consecutive;
        match self.policy.delay_for(attempt) {
            Some(delay) => {
                warn!(
                    "⏳ Rate limited ({}/{}), pausing requests for {}s",
                    attempt,
                    self.policy.max_attempts(),
                    delay.as_secs()
                );
                state.phase = RateLimitPhase::Cooling {
                    until: now + delay,
                    attempt,
                };
                Escalation::Cooldown { delay, attempt }
            }
            None => {
                warn!(
                    "🛑 Rate limited {} times in a row, halting the run",
                    attempt
                );
                state.phase = RateLimitPhase::Halted;
                Escalation::Halt { attempts: attempt }
            }
        }
    }

    pub fn phase(&self) -> RateLimitPhase {
        self.lock().phase
    }

    pub fn consecutive(&self) -> u32 {
        self.lock().consecutive
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RateLimitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RateLimitCoordinator {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(0), None);
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(30)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(60)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(120)));
        assert_eq!(policy.delay_for(4), None);
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn test_consecutive_rate_limits_escalate_then_halt() {
        let coordinator = RateLimitCoordinator::default();
        let mut now = Instant::now();

        let mut delays = Vec::new();
        for _ in 0..3 {
            match coordinator.record_rate_limited(now) {
                Escalation::Cooldown { delay, .. } => {
                    delays.push(delay.as_secs());
                    now += delay;
                    assert_eq!(coordinator.admit(now), Admission::Proceed);
                }
                Escalation::Halt { .. } => panic!("halted too early"),
            }
        }
        assert_eq!(delays, vec![30, 60, 120]);

        assert_eq!(
            coordinator.record_rate_limited(now),
            Escalation::Halt { attempts: 4 }
        );
        assert_eq!(coordinator.phase(), RateLimitPhase::Halted);
        assert_eq!(coordinator.admit(now), Admission::Halted);
    }

    #[test]
    fn test_cooldown_blocks_until_expiry() {
        let coordinator = RateLimitCoordinator::default();
        let start = Instant::now();
        coordinator.record_rate_limited(start);

        match coordinator.admit(start + Duration::from_secs(10)) {
            Admission::CoolingDown { remaining } => {
                assert_eq!(remaining, Duration::from_secs(20))
            }
            other => panic!("expected cooldown, got {other:?}"),
        }
        assert_eq!(
            coordinator.admit(start + Duration::from_secs(30)),
            Admission::Proceed
        );
        assert_eq!(coordinator.phase(), RateLimitPhase::Normal);
        // Expiry alone does not forgive earlier rate limits
        assert_eq!(coordinator.consecutive(), 1);
    }

    #[test]
    fn test_success_resets_count() {
        let coordinator = RateLimitCoordinator::default();
        let now = Instant::now();
        coordinator.record_rate_limited(now);
        coordinator.record_rate_limited(now);
        coordinator.record_success();

        assert_eq!(coordinator.consecutive(), 0);
        assert_eq!(coordinator.phase(), RateLimitPhase::Normal);
        assert_eq!(
            coordinator.record_rate_limited(now),
            Escalation::Cooldown {
                delay: Duration::from_secs(30),
                attempt: 1
            }
        );
    }

    #[test]
    fn test_halted_is_terminal() {
        let coordinator = RateLimitCoordinator::new(BackoffPolicy::new(vec![]));
        let now = Instant::now();
        assert_eq!(
            coordinator.record_rate_limited(now),
            Escalation::Halt { attempts: 1 }
        );
        coordinator.record_success();
        assert_eq!(coordinator.phase(), RateLimitPhase::Halted);
    }
}
