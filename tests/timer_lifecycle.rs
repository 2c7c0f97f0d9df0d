//! Timer state machine driven through the service with explicit clocks.

mod common;

use chrono::Duration;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

use tallyclock::billing::TimerService;
use tallyclock::error::{BillingError, TimerStateError};
use tallyclock::model::TimerState;

use common::{at, client, open_db};

fn timer_error(err: BillingError) -> TimerStateError {
    match err {
        BillingError::Timer(inner) => inner,
        other => panic!("expected a timer state error, got {other:?}"),
    }
}

#[tokio::test]
async fn paused_time_is_excluded_from_the_entry() {
    let (db, _dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(360)).await;
    let timers = TimerService::new(db.clone());
    let t0 = at(4, 9, 0);

    timers.start_at(acme.id, "pairing", t0).await.expect("start");
    timers.pause_at(t0 + Duration::seconds(10)).await.expect("pause");
    timers.resume_at(t0 + Duration::seconds(40)).await.expect("resume");
    let entry = timers.stop_at(t0 + Duration::seconds(50)).await.expect("stop");

    assert_eq!(entry.duration_seconds, Some(20));
    assert_eq!(entry.start_time, t0);
    assert_eq!(entry.end_time, Some(t0 + Duration::seconds(50)));
    assert_eq!(entry.hourly_rate, dec!(360));
    assert_eq!(entry.amount(), dec!(2));
    assert_eq!(entry.description, "pairing");

    assert_eq!(timers.state().await.expect("state"), TimerState::Idle);
    assert!(db.get_active_timer().await.expect("timer").is_none());
    let stored = db.get_entry(entry.id).await.expect("get").expect("exists");
    assert_eq!(stored.duration_seconds, Some(20));
}

#[tokio::test]
async fn transitions_follow_the_state_machine() {
    let (db, _dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(60)).await;
    let timers = TimerService::new(db.clone());
    let t0 = at(4, 9, 0);

    assert_eq!(timers.state().await.expect("state"), TimerState::Idle);
    assert_eq!(
        timer_error(timers.pause_at(t0).await.unwrap_err()),
        TimerStateError::NotRunning
    );
    assert_eq!(
        timer_error(timers.resume_at(t0).await.unwrap_err()),
        TimerStateError::NotPaused
    );
    assert_eq!(
        timer_error(timers.stop_at(t0).await.unwrap_err()),
        TimerStateError::NoActiveTimer
    );
    assert_eq!(
        timer_error(timers.discard().await.unwrap_err()),
        TimerStateError::NoActiveTimer
    );

    timers.start_at(acme.id, "", t0).await.expect("start");
    assert_eq!(timers.state().await.expect("state"), TimerState::Running);
    assert_eq!(
        timer_error(timers.start_at(acme.id, "again", t0).await.unwrap_err()),
        TimerStateError::AlreadyRunning
    );
    assert_eq!(
        timer_error(timers.resume_at(t0).await.unwrap_err()),
        TimerStateError::NotPaused
    );

    timers.pause_at(t0 + Duration::minutes(1)).await.expect("pause");
    assert_eq!(timers.state().await.expect("state"), TimerState::Paused);
    assert_eq!(
        timer_error(timers.pause_at(t0 + Duration::minutes(2)).await.unwrap_err()),
        TimerStateError::NotRunning
    );
    assert_eq!(
        timer_error(timers.start_at(acme.id, "again", t0).await.unwrap_err()),
        TimerStateError::AlreadyRunning
    );

    timers.discard().await.expect("discard");
    assert_eq!(timers.state().await.expect("state"), TimerState::Idle);
    assert!(
        db.list_entries(&Default::default())
            .await
            .expect("entries")
            .is_empty()
    );
}

#[tokio::test]
async fn start_requires_a_known_client() {
    let (db, _dir) = open_db().await;
    let timers = TimerService::new(db);
    let err = timers.start_at(42, "ghost", at(4, 9, 0)).await.unwrap_err();
    assert!(matches!(err, BillingError::ClientNotFound(42)));
}

#[tokio::test]
async fn elapsed_and_accrued_value_freeze_while_paused() {
    let (db, _dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(120)).await;
    let timers = TimerService::new(db);
    let t0 = at(4, 9, 0);

    timers.start_at(acme.id, "review", t0).await.expect("start");
    timers.pause_at(t0 + Duration::minutes(30)).await.expect("pause");

    let later = t0 + Duration::hours(3);
    assert_eq!(
        timers.elapsed_at(later).await.expect("elapsed"),
        Duration::minutes(30)
    );
    assert_eq!(timers.accrued_value_at(later).await.expect("value"), dec!(60));
}

#[tokio::test]
async fn a_fresh_service_recovers_the_persisted_timer() {
    let (db, _dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(60)).await;
    let t0 = at(4, 9, 0);

    {
        let timers = TimerService::new(db.clone());
        timers.start_at(acme.id, "long task", t0).await.expect("start");
        timers.pause_at(t0 + Duration::minutes(15)).await.expect("pause");
    }

    let timers = TimerService::new(db.clone());
    let recovered = timers.recover().await.expect("recover").expect("timer");
    assert_eq!(recovered.state(), TimerState::Paused);
    assert_eq!(recovered.description, "long task");

    timers.resume_at(t0 + Duration::minutes(45)).await.expect("resume");
    let entry = timers.stop_at(t0 + Duration::minutes(60)).await.expect("stop");
    assert_eq!(entry.duration_seconds, Some(30 * 60));
}

#[tokio::test]
async fn stop_uses_the_clients_rate_at_stop_time() {
    let (db, _dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(60)).await;
    let timers = TimerService::new(db.clone());
    let t0 = at(4, 9, 0);

    timers.start_at(acme.id, "", t0).await.expect("start");
    db.update_client(
        acme.id,
        &tallyclock::db::UpdateClientParams {
            hourly_rate: Some(dec!(90)),
            ..Default::default()
        },
    )
    .await
    .expect("update client");

    let entry = timers.stop_at(t0 + Duration::hours(1)).await.expect("stop");
    assert_eq!(entry.hourly_rate, dec!(90));
    assert_eq!(entry.amount(), dec!(90));
}
