//! Single-timer state machine.
//!
//! ```text
//! Idle --start--> Running --pause--> Paused
//!                 Running <--resume-- Paused
//! Running|Paused --stop|discard--> Idle
//! ```
//!
//! The timer lives only in the store, so a crashed process picks up exactly
//! where it left off: every read goes back to the durable singleton and
//! elapsed time is always recomputed from its timestamps.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::billing::journal::EventJournal;
use crate::db::Database;
use crate::error::{BillingError, TimerStateError};
use crate::model::{ActiveTimer, TimeEntry, TimerState};

pub struct TimerService {
    db: Arc<dyn Database>,
    journal: Option<Arc<EventJournal>>,
}

impl TimerService {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db, journal: None }
    }

    pub fn with_journal(mut self, journal: Arc<EventJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    fn record(&self, event_type: &str, details: serde_json::Value) {
        if let Some(journal) = &self.journal {
            journal.record(event_type, details);
        }
    }

    pub async fn active_timer(&self) -> Result<Option<ActiveTimer>, BillingError> {
        Ok(self.db.get_active_timer().await?)
    }

    pub async fn state(&self) -> Result<TimerState, BillingError> {
        Ok(TimerState::of(self.active_timer().await?.as_ref()))
    }

    /// The persisted timer, or `NoActiveTimer`.
    async fn require_timer(&self) -> Result<ActiveTimer, BillingError> {
        self.active_timer()
            .await?
            .ok_or(BillingError::Timer(TimerStateError::NoActiveTimer))
    }

    pub async fn start(&self, client_id: i64, description: &str) -> Result<ActiveTimer, BillingError> {
        self.start_at(client_id, description, Utc::now()).await
    }

    pub async fn start_at(
        &self,
        client_id: i64,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<ActiveTimer, BillingError> {
        if self.db.get_client(client_id).await?.is_none() {
            return Err(BillingError::ClientNotFound(client_id));
        }
        if self.active_timer().await?.is_some() {
            return Err(TimerStateError::AlreadyRunning.into());
        }

        let timer = ActiveTimer::start(client_id, description.trim(), now);
        self.db.save_active_timer(&timer).await?;
        tracing::info!(client_id, "Timer started");
        self.record(
            "timer_started",
            serde_json::json!({ "client_id": client_id, "description": timer.description }),
        );
        Ok(timer)
    }

    pub async fn pause(&self) -> Result<ActiveTimer, BillingError> {
        self.pause_at(Utc::now()).await
    }

    pub async fn pause_at(&self, now: DateTime<Utc>) -> Result<ActiveTimer, BillingError> {
        let mut timer = match self.active_timer().await? {
            Some(timer) if timer.state() == TimerState::Running => timer,
            _ => return Err(TimerStateError::NotRunning.into()),
        };
        timer.pause_at(now);
        self.db.save_active_timer(&timer).await?;
        tracing::debug!(client_id = timer.client_id, "Timer paused");
        self.record("timer_paused", serde_json::json!({ "client_id": timer.client_id }));
        Ok(timer)
    }

    pub async fn resume(&self) -> Result<ActiveTimer, BillingError> {
        self.resume_at(Utc::now()).await
    }

    pub async fn resume_at(&self, now: DateTime<Utc>) -> Result<ActiveTimer, BillingError> {
        let mut timer = match self.active_timer().await? {
            Some(timer) if timer.state() == TimerState::Paused => timer,
            _ => return Err(TimerStateError::NotPaused.into()),
        };
        timer.resume_at(now);
        self.db.save_active_timer(&timer).await?;
        tracing::debug!(
            client_id = timer.client_id,
            total_paused_seconds = timer.total_paused_seconds,
            "Timer resumed"
        );
        self.record(
            "timer_resumed",
            serde_json::json!({
                "client_id": timer.client_id,
                "total_paused_seconds": timer.total_paused_seconds,
            }),
        );
        Ok(timer)
    }

    pub async fn stop(&self) -> Result<TimeEntry, BillingError> {
        self.stop_at(Utc::now()).await
    }

    /// Closes the timer into a time entry at the client's current rate.
    pub async fn stop_at(&self, now: DateTime<Utc>) -> Result<TimeEntry, BillingError> {
        let timer = self.require_timer().await?;
        let client = self
            .db
            .get_client(timer.client_id)
            .await?
            .ok_or(BillingError::ClientNotFound(timer.client_id))?;

        let entry = timer.into_time_entry(client.hourly_rate, now);
        let entry = self.db.stop_active_timer(&entry).await?;
        tracing::info!(
            entry_id = entry.id,
            client_id = entry.client_id,
            duration_seconds = entry.duration_seconds,
            "Timer stopped"
        );
        self.record(
            "timer_stopped",
            serde_json::json!({
                "entry_id": entry.id,
                "client_id": entry.client_id,
                "duration_seconds": entry.duration_seconds,
                "hourly_rate": entry.hourly_rate.to_string(),
            }),
        );
        Ok(entry)
    }

    /// Drops the timer without creating an entry.
    pub async fn discard(&self) -> Result<(), BillingError> {
        let timer = self.require_timer().await?;
        self.db.delete_active_timer().await?;
        tracing::info!(client_id = timer.client_id, "Timer discarded");
        self.record("timer_discarded", serde_json::json!({ "client_id": timer.client_id }));
        Ok(())
    }

    pub async fn elapsed(&self) -> Result<Duration, BillingError> {
        self.elapsed_at(Utc::now()).await
    }

    pub async fn elapsed_at(&self, now: DateTime<Utc>) -> Result<Duration, BillingError> {
        Ok(self.require_timer().await?.elapsed_at(now))
    }

    /// Value of the time tracked so far at the client's current rate.
    pub async fn accrued_value_at(&self, now: DateTime<Utc>) -> Result<Decimal, BillingError> {
        let timer = self.require_timer().await?;
        let client = self
            .db
            .get_client(timer.client_id)
            .await?
            .ok_or(BillingError::ClientNotFound(timer.client_id))?;
        let hours = Decimal::from(timer.elapsed_at(now).num_seconds()) / Decimal::from(3600);
        Ok((hours * client.hourly_rate).round_dp(2))
    }

    /// Startup check for a timer left by a previous process.
    pub async fn recover(&self) -> Result<Option<ActiveTimer>, BillingError> {
        let timer = self.active_timer().await?;
        if let Some(timer) = &timer {
            tracing::info!(
                client_id = timer.client_id,
                state = timer.state().as_str(),
                started_at = %timer.start_time,
                "Recovered timer from previous session"
            );
        }
        Ok(timer)
    }
}
