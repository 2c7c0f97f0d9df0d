use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const SECONDS_PER_HOUR: i64 = 3600;

/// A span of work for one client.
///
/// Rows are always stored closed. `hourly_rate` is captured when the entry is
/// created and is never re-read from the client afterwards. Once
/// `invoice_id` is set the entry is locked: the gateway refuses edits and
/// soft deletes until the reference is cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: i64,
    pub client_id: i64,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Billed seconds. Shorter than the start/end span when the entry came
    /// from a timer that was paused.
    pub duration_seconds: Option<i64>,
    pub hourly_rate: Decimal,
    pub is_billable: bool,
    pub is_deleted: bool,
    pub invoice_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimeEntry {
    /// A closed, billable, not-yet-stored entry covering `start..end`.
    pub fn closed(
        client_id: i64,
        description: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        hourly_rate: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            client_id,
            description: description.into(),
            start_time: start,
            end_time: Some(end),
            duration_seconds: Some((end - start).num_seconds()),
            hourly_rate,
            is_billable: true,
            is_deleted: false,
            invoice_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.invoice_id.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Moves the entry to a new span and bills the whole of it.
    pub fn reschedule(&mut self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) {
        self.start_time = start;
        self.end_time = end;
        self.duration_seconds = end.map(|end| (end - start).num_seconds());
    }

    pub fn duration(&self) -> Duration {
        self.duration_at(Utc::now())
    }

    /// Billed duration as of `now`. Open entries run until `now`.
    pub fn duration_at(&self, now: DateTime<Utc>) -> Duration {
        match (self.duration_seconds, self.end_time) {
            (Some(seconds), Some(_)) => Duration::seconds(seconds),
            (_, Some(end)) => end - self.start_time,
            (_, None) => now - self.start_time,
        }
    }

    pub fn hours_at(&self, now: DateTime<Utc>) -> Decimal {
        Decimal::from(self.duration_at(now).num_seconds()) / Decimal::from(SECONDS_PER_HOUR)
    }

    pub fn amount(&self) -> Decimal {
        self.amount_at(Utc::now())
    }

    /// Billable value as of `now`; zero for non-billable entries.
    pub fn amount_at(&self, now: DateTime<Utc>) -> Decimal {
        if !self.is_billable {
            return Decimal::ZERO;
        }
        Decimal::from(self.duration_at(now).num_seconds()) * self.hourly_rate
            / Decimal::from(SECONDS_PER_HOUR)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.client_id <= 0 {
            return Err(ValidationError::MissingClient);
        }
        if self.hourly_rate < Decimal::ZERO {
            return Err(ValidationError::NegativeRate);
        }
        if self.start_time.timestamp() <= 0 {
            return Err(ValidationError::MissingStart);
        }
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(ValidationError::EndBeforeStart);
            }
            if let Some(seconds) = self.duration_seconds
                && (seconds < 0 || seconds > (end - self.start_time).num_seconds())
            {
                return Err(ValidationError::DurationOutOfRange { seconds });
            }
        }
        Ok(())
    }
}

/// One audited field change on a time entry. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHistory {
    pub id: i64,
    pub entry_id: i64,
    pub field_name: String,
    pub old_value: String,
    pub new_value: String,
    pub change_reason: String,
    pub changed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::TimeEntry;
    use crate::error::ValidationError;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn two_billable_hours_at_one_hundred_is_two_hundred() {
        let mut entry = TimeEntry::closed(1, "API review", at(9, 0), at(11, 0), dec!(100));
        assert_eq!(entry.amount(), dec!(200.00));

        entry.is_billable = false;
        assert_eq!(entry.amount(), Decimal::ZERO);
        assert_eq!(entry.hourly_rate, dec!(100));
        assert_eq!(entry.duration(), Duration::hours(2));
    }

    #[test]
    fn stored_duration_wins_over_wall_span() {
        let mut entry = TimeEntry::closed(1, "timer", at(9, 0), at(10, 0), dec!(60));
        entry.duration_seconds = Some(30 * 60);
        assert_eq!(entry.duration(), Duration::minutes(30));
        assert_eq!(entry.amount(), dec!(30));
    }

    #[test]
    fn open_entry_runs_until_now() {
        let mut entry = TimeEntry::closed(1, "open", at(9, 0), at(9, 0), dec!(120));
        entry.end_time = None;
        entry.duration_seconds = None;
        assert_eq!(entry.duration_at(at(9, 30)), Duration::minutes(30));
        assert_eq!(entry.amount_at(at(9, 30)), dec!(60));
    }

    #[test]
    fn reschedule_recomputes_billed_duration() {
        let mut entry = TimeEntry::closed(1, "timer", at(9, 0), at(10, 0), dec!(60));
        entry.duration_seconds = Some(600);
        entry.reschedule(at(9, 0), Some(at(9, 45)));
        assert_eq!(entry.duration_seconds, Some(45 * 60));
    }

    #[test]
    fn validation_covers_each_rule() {
        let valid = TimeEntry::closed(1, "ok", at(9, 0), at(10, 0), dec!(50));
        assert!(valid.validate().is_ok());

        let mut missing_client = valid.clone();
        missing_client.client_id = 0;
        assert_eq!(
            missing_client.validate(),
            Err(ValidationError::MissingClient)
        );

        let mut negative = valid.clone();
        negative.hourly_rate = dec!(-0.01);
        assert_eq!(negative.validate(), Err(ValidationError::NegativeRate));

        let mut zero_start = valid.clone();
        zero_start.start_time = DateTime::<Utc>::UNIX_EPOCH;
        assert_eq!(zero_start.validate(), Err(ValidationError::MissingStart));

        let mut backwards = valid.clone();
        backwards.end_time = Some(at(8, 0));
        assert_eq!(backwards.validate(), Err(ValidationError::EndBeforeStart));

        let mut too_long = valid;
        too_long.duration_seconds = Some(7200);
        assert_eq!(
            too_long.validate(),
            Err(ValidationError::DurationOutOfRange { seconds: 7200 })
        );
    }
}
