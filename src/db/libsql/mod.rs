//! libSQL (embedded SQLite) backend.
//!
//! One `LibSqlBackend` wraps a local database file. Every operation opens a
//! fresh connection; multi-row writes run inside an explicit
//! `BEGIN`/`COMMIT` and roll back on the first error.

mod clients;
mod entries;
mod invoices;
mod timer;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use libsql::{Builder, Connection, Value, params};
use rust_decimal::Decimal;

use crate::db::Database;
use crate::db::libsql_migrations::MIGRATIONS;
use crate::error::DatabaseError;
use crate::model::format_timestamp;

const BUSY_TIMEOUT_MS: u64 = 5000;

pub struct LibSqlBackend {
    db: Arc<libsql::Database>,
    path: PathBuf,
}

impl LibSqlBackend {
    /// Open (or create) a local database file.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("failed to create database directory: {e}"))
            })?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("failed to open database: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        };
        let conn = backend.connect().await?;
        conn.query("PRAGMA journal_mode = WAL", ()).await?;
        tracing::debug!(path = %backend.path.display(), "Opened libSQL database");
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) async fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("failed to connect: {e}")))?;
        conn.execute("PRAGMA foreign_keys = ON", ()).await?;
        conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ())
            .await?;
        Ok(conn)
    }

    async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (\
               version INTEGER PRIMARY KEY, \
               name TEXT NOT NULL, \
               applied_at TEXT NOT NULL)",
            (),
        )
        .await?;
        let row = conn
            .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
            .await?
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Migration("failed to read schema version".to_string()))?;
        Ok(get_i64(&row, 0))
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        let current = Self::schema_version(&conn).await?;

        for (version, name, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
            conn.execute("BEGIN", ()).await?;
            let applied = async {
                conn.execute_batch(sql).await?;
                conn.execute(
                    "INSERT INTO schema_version (version, name, applied_at) VALUES (?1, ?2, ?3)",
                    params![*version, *name, fmt_ts(Utc::now())],
                )
                .await?;
                Ok::<_, DatabaseError>(())
            }
            .await;

            match applied {
                Ok(()) => {
                    conn.execute("COMMIT", ()).await?;
                    tracing::info!(version, name, "Applied schema migration");
                }
                Err(err) => {
                    let _ = conn.execute("ROLLBACK", ()).await;
                    return Err(DatabaseError::Migration(format!(
                        "migration {version} ({name}) failed: {err}"
                    )));
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn get_text(row: &libsql::Row, idx: i32) -> String {
    row.get::<String>(idx).unwrap_or_default()
}

pub(crate) fn get_opt_text(row: &libsql::Row, idx: i32) -> Option<String> {
    row.get::<String>(idx).ok()
}

pub(crate) fn get_i64(row: &libsql::Row, idx: i32) -> i64 {
    row.get::<i64>(idx).unwrap_or_default()
}

pub(crate) fn get_opt_i64(row: &libsql::Row, idx: i32) -> Option<i64> {
    row.get::<i64>(idx).ok()
}

pub(crate) fn get_bool(row: &libsql::Row, idx: i32) -> bool {
    get_i64(row, idx) != 0
}

pub(crate) fn opt_text(value: Option<&str>) -> Value {
    match value {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

pub(crate) fn opt_i64(value: Option<i64>) -> Value {
    match value {
        Some(v) => Value::Integer(v),
        None => Value::Null,
    }
}

pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    format_timestamp(ts)
}

pub(crate) fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| DatabaseError::Serialization(format!("invalid timestamp '{raw}': {e}")))
}

pub(crate) fn parse_opt_timestamp(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    raw.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| DatabaseError::Serialization(format!("invalid date '{raw}': {e}")))
}

pub(crate) fn parse_opt_date(raw: Option<String>) -> Result<Option<NaiveDate>, DatabaseError> {
    raw.as_deref().map(parse_date).transpose()
}

pub(crate) fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, DatabaseError> {
    Decimal::from_str(raw.trim())
        .map_err(|e| DatabaseError::Serialization(format!("invalid {field} '{raw}': {e}")))
}
