//! Tripwire — rate windows and the consecutive-failure circuit breaker.
//!
//! Gates pipeline entry before any scoring work. Windows reset lazily on
//! epoch rollover; no background timer.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Why the tripwire refused entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    Paused { reason: String },
    HourlyExhausted { limit: u32 },
    DailyExhausted { limit: u32 },
}

impl Refusal {
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Paused { reason } => format!("governor paused: {reason}"),
            Self::HourlyExhausted { limit } => {
                format!("hourly application limit reached ({limit})")
            }
            Self::DailyExhausted { limit } => format!("daily application limit reached ({limit})"),
        }
    }
}

/// Read-only view of tripwire state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripwireStats {
    pub hourly_count: u32,
    pub daily_count: u32,
    pub consecutive_failures: u32,
    pub paused: bool,
    pub pause_reason: Option<String>,
}

#[derive(Debug)]
struct TripwireState {
    hour_epoch: u64,
    hourly_count: u32,
    day_epoch: u64,
    daily_count: u32,
    consecutive_failures: u32,
    pause_reason: Option<String>,
}

#[derive(Debug)]
pub struct Tripwire {
    state: Mutex<TripwireState>,
    max_per_hour: u32,
    max_per_day: u32,
}

impl Tripwire {
    pub fn new(max_per_hour: u32, max_per_day: u32) -> Self {
        Self {
            state: Mutex::new(TripwireState {
                hour_epoch: current_hour_epoch(),
                hourly_count: 0,
                day_epoch: current_day_epoch(),
                daily_count: 0,
                consecutive_failures: 0,
                pause_reason: None,
            }),
            max_per_hour,
            max_per_day,
        }
    }

    /// Check whether a new pipeline call may proceed. Does not count the
    /// call; applications are counted on commit via [`Self::record_application`].
    pub fn check_entry(&self) -> Result<(), Refusal> {
        let mut state = self.lock();
        rollover_if_needed(&mut state);

        if let Some(reason) = &state.pause_reason {
            return Err(Refusal::Paused {
                reason: reason.clone(),
            });
        }
        if state.hourly_count >= self.max_per_hour {
            return Err(Refusal::HourlyExhausted {
                limit: self.max_per_hour,
            });
        }
        if state.daily_count >= self.max_per_day {
            return Err(Refusal::DailyExhausted {
                limit: self.max_per_day,
            });
        }
        Ok(())
    }

    /// Count a committed application against both windows.
    pub fn record_application(&self) {
        let mut state = self.lock();
        rollover_if_needed(&mut state);
        state.hourly_count = state.hourly_count.saturating_add(1);
        state.daily_count = state.daily_count.saturating_add(1);
    }

    /// Count a validation failure; returns the new streak length.
    pub fn record_failure(&self) -> u32 {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.consecutive_failures
    }

    /// A committed application ends any failure streak.
    pub fn reset_failures(&self) {
        self.lock().consecutive_failures = 0;
    }

    pub fn pause(&self, reason: impl Into<String>) {
        self.lock().pause_reason = Some(reason.into());
    }

    /// Lift a pause and forgive the failure streak that may have caused it.
    pub fn resume(&self) {
        let mut state = self.lock();
        state.pause_reason = None;
        state.consecutive_failures = 0;
    }

    pub fn is_paused(&self) -> bool {
        self.lock().pause_reason.is_some()
    }

    pub fn stats(&self) -> TripwireStats {
        let mut state = self.lock();
        rollover_if_needed(&mut state);
        TripwireStats {
            hourly_count: state.hourly_count,
            daily_count: state.daily_count,
            consecutive_failures: state.consecutive_failures,
            paused: state.pause_reason.is_some(),
            pause_reason: state.pause_reason.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TripwireState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[cfg(test)]
    fn backdate_windows(&self, hours: u64, days: u64) {
        let mut state = self.lock();
        state.hour_epoch = state.hour_epoch.saturating_sub(hours);
        state.day_epoch = state.day_epoch.saturating_sub(days);
    }
}

fn current_hour_epoch() -> u64 {
    now_secs() / 3_600
}

fn current_day_epoch() -> u64 {
    now_secs() / 86_400
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_else(|_| std::time::Duration::from_secs(0))
        .as_secs()
}

fn rollover_if_needed(state: &mut TripwireState) {
    let hour = current_hour_epoch();
    if state.hour_epoch != hour {
        state.hour_epoch = hour;
        state.hourly_count = 0;
    }
    let day = current_day_epoch();
    if state.day_epoch != day {
        state.day_epoch = day;
        state.daily_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_allowed_when_fresh() {
        let tripwire = Tripwire::new(3, 10);
        assert!(tripwire.check_entry().is_ok());
    }

    #[test]
    fn hourly_cap_refuses_next_entry() {
        let tripwire = Tripwire::new(2, 10);
        tripwire.record_application();
        tripwire.record_application();
        assert_eq!(
            tripwire.check_entry(),
            Err(Refusal::HourlyExhausted { limit: 2 })
        );
    }

    #[test]
    fn daily_cap_refuses_next_entry() {
        let tripwire = Tripwire::new(10, 2);
        tripwire.record_application();
        tripwire.record_application();
        assert_eq!(
            tripwire.check_entry(),
            Err(Refusal::DailyExhausted { limit: 2 })
        );
    }

    #[test]
    fn hourly_window_resets_on_rollover() {
        let tripwire = Tripwire::new(1, 10);
        tripwire.record_application();
        assert!(tripwire.check_entry().is_err());

        tripwire.backdate_windows(1, 0);
        assert!(tripwire.check_entry().is_ok());
        assert_eq!(tripwire.stats().hourly_count, 0);
    }

    #[test]
    fn daily_window_resets_on_rollover() {
        let tripwire = Tripwire::new(10, 1);
        tripwire.record_application();
        assert!(tripwire.check_entry().is_err());

        tripwire.backdate_windows(0, 1);
        assert!(tripwire.check_entry().is_ok());
        assert_eq!(tripwire.stats().daily_count, 0);
    }

    #[test]
    fn pause_refuses_with_stored_reason() {
        let tripwire = Tripwire::new(3, 10);
        tripwire.pause("manual maintenance");
        match tripwire.check_entry() {
            Err(Refusal::Paused { reason }) => assert_eq!(reason, "manual maintenance"),
            other => panic!("expected paused refusal, got {other:?}"),
        }
    }

    #[test]
    fn pause_persists_until_resume() {
        let tripwire = Tripwire::new(3, 10);
        tripwire.pause("streak");
        assert!(tripwire.is_paused());
        tripwire.backdate_windows(5, 2);
        assert!(tripwire.check_entry().is_err());

        tripwire.resume();
        assert!(!tripwire.is_paused());
        assert!(tripwire.check_entry().is_ok());
    }

    #[test]
    fn resume_clears_failure_streak() {
        let tripwire = Tripwire::new(3, 10);
        tripwire.record_failure();
        tripwire.record_failure();
        tripwire.pause("two strikes");
        tripwire.resume();
        assert_eq!(tripwire.stats().consecutive_failures, 0);
    }

    #[test]
    fn failure_streak_counts_up_and_resets_on_success() {
        let tripwire = Tripwire::new(3, 10);
        assert_eq!(tripwire.record_failure(), 1);
        assert_eq!(tripwire.record_failure(), 2);
        tripwire.reset_failures();
        assert_eq!(tripwire.stats().consecutive_failures, 0);
    }

    #[test]
    fn stats_reflect_counts() {
        let tripwire = Tripwire::new(3, 10);
        tripwire.record_application();
        tripwire.record_failure();
        let stats = tripwire.stats();
        assert_eq!(stats.hourly_count, 1);
        assert_eq!(stats.daily_count, 1);
        assert_eq!(stats.consecutive_failures, 1);
        assert!(!stats.paused);
        assert!(stats.pause_reason.is_none());
    }
}
