use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TimeEntry;

/// Derived state of the timer singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    Idle,
    Running,
    Paused,
}

impl TimerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }

    /// State of whatever the store holds; absence is `Idle`.
    pub fn of(timer: Option<&ActiveTimer>) -> Self {
        match timer {
            None => Self::Idle,
            Some(timer) if timer.is_paused() => Self::Paused,
            Some(_) => Self::Running,
        }
    }
}

/// The single in-flight timer. At most one exists at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTimer {
    pub client_id: i64,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    pub total_paused_seconds: i64,
}

impl ActiveTimer {
    pub fn start(client_id: i64, description: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            client_id,
            description: description.into(),
            start_time: now,
            paused_at: None,
            total_paused_seconds: 0,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn state(&self) -> TimerState {
        TimerState::of(Some(self))
    }

    /// Active time as of `now`: wall time since start minus every paused interval,
    /// including one still in progress.
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        let mut paused = Duration::seconds(self.total_paused_seconds);
        if let Some(paused_at) = self.paused_at {
            paused = paused + (now - paused_at);
        }
        let elapsed = now - self.start_time - paused;
        elapsed.max(Duration::zero())
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Utc::now())
    }

    /// No-op when already paused.
    pub fn pause_at(&mut self, now: DateTime<Utc>) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    /// Folds the current pause into the running total. No-op when not paused.
    pub fn resume_at(&mut self, now: DateTime<Utc>) {
        if let Some(paused_at) = self.paused_at.take() {
            self.total_paused_seconds += (now - paused_at).num_seconds().max(0);
        }
    }

    /// Closes the timer into an entry billed for active time only.
    pub fn into_time_entry(mut self, hourly_rate: Decimal, now: DateTime<Utc>) -> TimeEntry {
        self.resume_at(now);
        let billed = self.elapsed_at(now).num_seconds();
        let mut entry = TimeEntry::closed(
            self.client_id,
            self.description,
            self.start_time,
            now,
            hourly_rate,
        );
        entry.duration_seconds = Some(billed);
        entry
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    use super::{ActiveTimer, TimerState};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 14, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn paused_time_is_excluded_from_billed_duration() {
        let start = t0();
        let mut timer = ActiveTimer::start(7, "design review", start);
        timer.pause_at(start + Duration::seconds(10));
        assert_eq!(timer.state(), TimerState::Paused);
        assert_eq!(
            timer.elapsed_at(start + Duration::seconds(25)),
            Duration::seconds(10)
        );

        timer.resume_at(start + Duration::seconds(40));
        assert_eq!(timer.total_paused_seconds, 30);
        assert_eq!(timer.state(), TimerState::Running);

        let entry = timer.into_time_entry(dec!(90), start + Duration::seconds(50));
        assert_eq!(entry.duration_seconds, Some(20));
        assert_eq!(entry.duration(), Duration::seconds(20));
        assert_eq!(entry.end_time, Some(start + Duration::seconds(50)));
        assert_eq!(entry.hourly_rate, dec!(90));
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn pause_and_resume_are_idempotent() {
        let start = t0();
        let mut timer = ActiveTimer::start(1, "x", start);
        timer.resume_at(start + Duration::seconds(5));
        assert_eq!(timer.total_paused_seconds, 0);

        timer.pause_at(start + Duration::seconds(10));
        timer.pause_at(start + Duration::seconds(20));
        assert_eq!(timer.paused_at, Some(start + Duration::seconds(10)));
    }

    #[test]
    fn stopping_while_paused_closes_the_pause_first() {
        let start = t0();
        let mut timer = ActiveTimer::start(1, "x", start);
        timer.pause_at(start + Duration::seconds(60));
        let entry = timer.into_time_entry(dec!(10), start + Duration::seconds(600));
        assert_eq!(entry.duration_seconds, Some(60));
    }

    #[test]
    fn absent_timer_is_idle() {
        assert_eq!(TimerState::of(None), TimerState::Idle);
    }
}
