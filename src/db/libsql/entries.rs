use chrono::{DateTime, Utc};
use libsql::{Connection, Value, params};

use crate::db::{EntryFilter, TimeEntryStore};
use crate::error::DatabaseError;
use crate::model::{EntryHistory, TimeEntry, diff_entries};

use super::{
    LibSqlBackend, fmt_ts, get_bool, get_i64, get_opt_i64, get_opt_text, get_text, opt_i64,
    opt_text, parse_decimal, parse_opt_timestamp, parse_timestamp,
};

const ENTRY_COLUMNS: &str = "id, client_id, description, start_time, end_time, duration_seconds, \
     hourly_rate, is_billable, is_deleted, invoice_id, created_at, updated_at";

fn row_to_time_entry(row: &libsql::Row) -> Result<TimeEntry, DatabaseError> {
    Ok(TimeEntry {
        id: get_i64(row, 0),
        client_id: get_i64(row, 1),
        description: get_text(row, 2),
        start_time: parse_timestamp(&get_text(row, 3))?,
        end_time: parse_opt_timestamp(get_opt_text(row, 4))?,
        duration_seconds: get_opt_i64(row, 5),
        hourly_rate: parse_decimal(&get_text(row, 6), "time_entries.hourly_rate")?,
        is_billable: get_bool(row, 7),
        is_deleted: get_bool(row, 8),
        invoice_id: get_opt_i64(row, 9),
        created_at: parse_timestamp(&get_text(row, 10))?,
        updated_at: parse_timestamp(&get_text(row, 11))?,
    })
}

fn row_to_history(row: &libsql::Row) -> Result<EntryHistory, DatabaseError> {
    Ok(EntryHistory {
        id: get_i64(row, 0),
        entry_id: get_i64(row, 1),
        field_name: get_text(row, 2),
        old_value: get_text(row, 3),
        new_value: get_text(row, 4),
        change_reason: get_text(row, 5),
        changed_at: parse_timestamp(&get_text(row, 6))?,
    })
}

pub(super) async fn load_entry(
    conn: &Connection,
    id: i64,
) -> Result<Option<TimeEntry>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {ENTRY_COLUMNS} FROM time_entries WHERE id = ?1 LIMIT 1"),
            params![id],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_time_entry(&row)?)),
        None => Ok(None),
    }
}

fn entry_not_found(id: i64) -> DatabaseError {
    DatabaseError::NotFound {
        entity: "time_entry".to_string(),
        id: id.to_string(),
    }
}

/// Inserts a fresh, unlocked entry. Shared with the timer stop path.
pub(super) async fn insert_entry(
    conn: &Connection,
    entry: &TimeEntry,
) -> Result<TimeEntry, DatabaseError> {
    entry.validate()?;
    let now = fmt_ts(Utc::now());
    conn.execute(
        "INSERT INTO time_entries \
         (client_id, description, start_time, end_time, duration_seconds, hourly_rate, \
          is_billable, is_deleted, invoice_id, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, ?8, ?8)",
        params![
            entry.client_id,
            entry.description.trim(),
            fmt_ts(entry.start_time),
            opt_text(entry.end_time.map(fmt_ts).as_deref()),
            opt_i64(entry.duration_seconds),
            entry.hourly_rate.to_string(),
            i64::from(entry.is_billable),
            now.as_str(),
        ],
    )
    .await?;
    let id = conn.last_insert_rowid();
    load_entry(conn, id)
        .await?
        .ok_or_else(|| DatabaseError::Query("failed to load created time entry".to_string()))
}

async fn insert_history(
    conn: &Connection,
    entry_id: i64,
    field: &str,
    old_value: &str,
    new_value: &str,
    reason: &str,
    changed_at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO entry_history \
         (entry_id, field_name, old_value, new_value, change_reason, changed_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![entry_id, field, old_value, new_value, reason, changed_at],
    )
    .await?;
    Ok(())
}

/// Sets `invoice_id` on every entry or on none. Runs inside the caller's
/// transaction.
pub(super) async fn lock_entries(
    conn: &Connection,
    entry_ids: &[i64],
    invoice_id: i64,
) -> Result<(), DatabaseError> {
    let now = fmt_ts(Utc::now());
    for &entry_id in entry_ids {
        let affected = conn
            .execute(
                "UPDATE time_entries SET invoice_id = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND invoice_id IS NULL AND is_deleted = 0",
                params![invoice_id, now.as_str(), entry_id],
            )
            .await?;
        if affected == 0 {
            return Err(DatabaseError::LockConflict { entry_id });
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl TimeEntryStore for LibSqlBackend {
    async fn create_entry(&self, entry: &TimeEntry) -> Result<TimeEntry, DatabaseError> {
        let conn = self.connect().await?;
        let created = insert_entry(&conn, entry).await?;
        tracing::debug!(entry_id = created.id, client_id = created.client_id, "Created time entry");
        Ok(created)
    }

    async fn get_entry(&self, id: i64) -> Result<Option<TimeEntry>, DatabaseError> {
        let conn = self.connect().await?;
        load_entry(&conn, id).await
    }

    async fn update_entry(
        &self,
        entry: &TimeEntry,
        reason: &str,
    ) -> Result<TimeEntry, DatabaseError> {
        let conn = self.connect().await?;

        conn.execute("BEGIN", ()).await?;
        let update_result = async {
            let existing = load_entry(&conn, entry.id)
                .await?
                .filter(|e| !e.is_deleted)
                .ok_or_else(|| entry_not_found(entry.id))?;
            if let Some(invoice_id) = existing.invoice_id {
                return Err(DatabaseError::Locked {
                    entry_id: existing.id,
                    invoice_id,
                });
            }

            // Locked is reported before validation. Diff and UPDATE share the trimmed row.
            let mut incoming = entry.clone();
            incoming.description = incoming.description.trim().to_string();
            incoming.validate()?;

            let changes = diff_entries(&existing, &incoming);
            if changes.is_empty() {
                return Ok(existing);
            }

            let now = fmt_ts(Utc::now());
            for change in &changes {
                insert_history(
                    &conn,
                    existing.id,
                    change.field,
                    &change.old_value,
                    &change.new_value,
                    reason,
                    &now,
                )
                .await?;
            }

            conn.execute(
                "UPDATE time_entries SET \
                   client_id = ?2, \
                   description = ?3, \
                   start_time = ?4, \
                   end_time = ?5, \
                   duration_seconds = ?6, \
                   hourly_rate = ?7, \
                   is_billable = ?8, \
                   updated_at = ?9 \
                 WHERE id = ?1",
                params![
                    existing.id,
                    incoming.client_id,
                    incoming.description.as_str(),
                    fmt_ts(incoming.start_time),
                    opt_text(incoming.end_time.map(fmt_ts).as_deref()),
                    opt_i64(incoming.duration_seconds),
                    incoming.hourly_rate.to_string(),
                    i64::from(incoming.is_billable),
                    now.as_str(),
                ],
            )
            .await?;

            tracing::debug!(
                entry_id = existing.id,
                changed_fields = changes.len(),
                "Updated time entry"
            );
            load_entry(&conn, existing.id)
                .await?
                .ok_or_else(|| entry_not_found(existing.id))
        }
        .await;

        match update_result {
            Ok(updated) => {
                conn.execute("COMMIT", ()).await?;
                Ok(updated)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }

    async fn soft_delete_entry(&self, id: i64, reason: &str) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;

        conn.execute("BEGIN", ()).await?;
        let delete_result = async {
            let existing = load_entry(&conn, id)
                .await?
                .filter(|e| !e.is_deleted)
                .ok_or_else(|| entry_not_found(id))?;
            if let Some(invoice_id) = existing.invoice_id {
                return Err(DatabaseError::Locked {
                    entry_id: id,
                    invoice_id,
                });
            }

            let now = fmt_ts(Utc::now());
            insert_history(&conn, id, "is_deleted", "false", "true", reason, &now).await?;
            conn.execute(
                "UPDATE time_entries SET is_deleted = 1, updated_at = ?2 WHERE id = ?1",
                params![id, now.as_str()],
            )
            .await?;
            Ok(())
        }
        .await;

        match delete_result {
            Ok(()) => {
                conn.execute("COMMIT", ()).await?;
                tracing::debug!(entry_id = id, "Soft-deleted time entry");
                Ok(())
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }

    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<TimeEntry>, DatabaseError> {
        let mut sql = format!("SELECT {ENTRY_COLUMNS} FROM time_entries WHERE is_deleted = 0");
        let mut args: Vec<Value> = Vec::new();

        if let Some(client_id) = filter.client_id {
            args.push(Value::Integer(client_id));
            sql.push_str(&format!(" AND client_id = ?{}", args.len()));
        }
        if let Some(start) = filter.start {
            args.push(Value::Text(fmt_ts(start)));
            sql.push_str(&format!(" AND start_time >= ?{}", args.len()));
        }
        if let Some(end) = filter.end {
            args.push(Value::Text(fmt_ts(end)));
            sql.push_str(&format!(" AND start_time <= ?{}", args.len()));
        }
        if !filter.include_locked {
            sql.push_str(" AND invoice_id IS NULL");
        }
        sql.push_str(" ORDER BY start_time DESC, id DESC");

        let conn = self.connect().await?;
        let mut rows = conn.query(&sql, args).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_time_entry(&row)?);
        }
        Ok(out)
    }

    async fn list_unbilled_entries(
        &self,
        client_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM time_entries \
                     WHERE client_id = ?1 AND is_deleted = 0 AND invoice_id IS NULL \
                       AND end_time IS NOT NULL AND start_time >= ?2 AND start_time <= ?3 \
                     ORDER BY start_time ASC, id ASC"
                ),
                params![client_id, fmt_ts(start), fmt_ts(end)],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_time_entry(&row)?);
        }
        Ok(out)
    }

    async fn is_entry_locked(&self, id: i64) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let entry = load_entry(&conn, id)
            .await?
            .ok_or_else(|| entry_not_found(id))?;
        Ok(entry.is_locked())
    }

    async fn lock_entries_for_invoice(
        &self,
        entry_ids: &[i64],
        invoice_id: i64,
    ) -> Result<(), DatabaseError> {
        if entry_ids.is_empty() {
            return Ok(());
        }
        let conn = self.connect().await?;

        conn.execute("BEGIN", ()).await?;
        match lock_entries(&conn, entry_ids, invoice_id).await {
            Ok(()) => {
                conn.execute("COMMIT", ()).await?;
                tracing::debug!(invoice_id, count = entry_ids.len(), "Locked time entries");
                Ok(())
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                tracing::warn!(invoice_id, error = %err, "Rolled back entry lock batch");
                Err(err)
            }
        }
    }

    async fn entry_history(&self, entry_id: i64) -> Result<Vec<EntryHistory>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT id, entry_id, field_name, old_value, new_value, change_reason, changed_at \
                 FROM entry_history WHERE entry_id = ?1 \
                 ORDER BY changed_at DESC, id DESC",
                params![entry_id],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_history(&row)?);
        }
        Ok(out)
    }
}
