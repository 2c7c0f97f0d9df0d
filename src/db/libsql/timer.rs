use libsql::params;

use crate::db::TimerStore;
use crate::error::DatabaseError;
use crate::model::{ActiveTimer, TimeEntry};

use super::entries::insert_entry;
use super::{
    LibSqlBackend, fmt_ts, get_i64, get_opt_text, get_text, opt_text, parse_opt_timestamp,
    parse_timestamp,
};

/// Key of the only row the `active_timer` table may hold.
const SINGLETON_ID: i64 = 1;

fn row_to_active_timer(row: &libsql::Row) -> Result<ActiveTimer, DatabaseError> {
    Ok(ActiveTimer {
        client_id: get_i64(row, 0),
        description: get_text(row, 1),
        start_time: parse_timestamp(&get_text(row, 2))?,
        paused_at: parse_opt_timestamp(get_opt_text(row, 3))?,
        total_paused_seconds: get_i64(row, 4),
    })
}

#[async_trait::async_trait]
impl TimerStore for LibSqlBackend {
    async fn get_active_timer(&self) -> Result<Option<ActiveTimer>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT client_id, description, start_time, paused_at, total_paused_seconds \
                 FROM active_timer WHERE id = ?1",
                params![SINGLETON_ID],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_active_timer(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_active_timer(&self, timer: &ActiveTimer) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO active_timer \
             (id, client_id, description, start_time, paused_at, total_paused_seconds) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT (id) DO UPDATE SET \
               client_id = excluded.client_id, \
               description = excluded.description, \
               start_time = excluded.start_time, \
               paused_at = excluded.paused_at, \
               total_paused_seconds = excluded.total_paused_seconds",
            params![
                SINGLETON_ID,
                timer.client_id,
                timer.description.as_str(),
                fmt_ts(timer.start_time),
                opt_text(timer.paused_at.map(fmt_ts).as_deref()),
                timer.total_paused_seconds,
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_active_timer(&self) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM active_timer WHERE id = ?1",
                params![SINGLETON_ID],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn stop_active_timer(&self, entry: &TimeEntry) -> Result<TimeEntry, DatabaseError> {
        let conn = self.connect().await?;

        conn.execute("BEGIN", ()).await?;
        let stop_result = async {
            let created = insert_entry(&conn, entry).await?;
            let deleted = conn
                .execute(
                    "DELETE FROM active_timer WHERE id = ?1",
                    params![SINGLETON_ID],
                )
                .await?;
            if deleted == 0 {
                return Err(DatabaseError::NotFound {
                    entity: "active_timer".to_string(),
                    id: SINGLETON_ID.to_string(),
                });
            }
            Ok(created)
        }
        .await;

        match stop_result {
            Ok(created) => {
                conn.execute("COMMIT", ()).await?;
                Ok(created)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }
}
