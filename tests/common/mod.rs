//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use tempfile::TempDir;

use tallyclock::db::libsql::LibSqlBackend;
use tallyclock::db::{CreateClientParams, Database};
use tallyclock::model::{Client, TimeEntry};

const DB_FILE: &str = "tallyclock.db";

/// A migrated database in a throwaway directory. Keep the `TempDir` alive
/// for as long as the database is used.
pub async fn open_db() -> (Arc<dyn Database>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = LibSqlBackend::new_local(&dir.path().join(DB_FILE))
        .await
        .expect("open database");
    backend.run_migrations().await.expect("migrations");
    (Arc::new(backend), dir)
}

pub async fn client(db: &Arc<dyn Database>, name: &str, rate: Decimal) -> Client {
    db.create_client(&CreateClientParams {
        name: name.to_string(),
        email: None,
        hourly_rate: rate,
        notes: None,
    })
    .await
    .expect("create client")
}

pub fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0)
        .single()
        .expect("valid timestamp")
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Stores a closed entry of `minutes` starting at 09:00 on March `day`.
pub async fn entry(
    db: &Arc<dyn Database>,
    client_id: i64,
    day: u32,
    minutes: i64,
    rate: Decimal,
) -> TimeEntry {
    let start = at(day, 9, 0);
    let end = start + chrono::Duration::minutes(minutes);
    db.create_entry(&TimeEntry::closed(client_id, "work", start, end, rate))
        .await
        .expect("create entry")
}

/// Runs raw SQL against the database file behind `open_db`, e.g. to install
/// a trigger that makes a later write fail.
pub async fn exec_raw(dir: &TempDir, sql: &str) {
    let db = libsql::Builder::new_local(dir.path().join(DB_FILE))
        .build()
        .await
        .expect("open raw database");
    let conn = db.connect().expect("raw connection");
    conn.execute(sql, ()).await.expect("raw statement");
}

/// Makes every UPDATE on `table` abort.
pub async fn reject_updates(dir: &TempDir, table: &str) {
    exec_raw(
        dir,
        &format!(
            "CREATE TRIGGER reject_{table}_updates BEFORE UPDATE ON {table} \
             BEGIN SELECT RAISE(ABORT, 'updates rejected'); END"
        ),
    )
    .await;
}
