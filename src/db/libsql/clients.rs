use chrono::Utc;
use libsql::params;

use crate::db::{ClientStore, CreateClientParams, UpdateClientParams};
use crate::error::DatabaseError;
use crate::model::{Client, validate_client_fields};

use super::{
    LibSqlBackend, fmt_ts, get_bool, get_i64, get_opt_text, get_text, opt_text, parse_decimal,
    parse_timestamp,
};

const CLIENT_COLUMNS: &str =
    "id, name, email, hourly_rate, notes, is_archived, created_at, updated_at";

fn row_to_client(row: &libsql::Row) -> Result<Client, DatabaseError> {
    Ok(Client {
        id: get_i64(row, 0),
        name: get_text(row, 1),
        email: get_opt_text(row, 2),
        hourly_rate: parse_decimal(&get_text(row, 3), "clients.hourly_rate")?,
        notes: get_opt_text(row, 4),
        is_archived: get_bool(row, 5),
        created_at: parse_timestamp(&get_text(row, 6))?,
        updated_at: parse_timestamp(&get_text(row, 7))?,
    })
}

/// Maps a UNIQUE violation on `clients.name` to a readable constraint error.
fn map_name_conflict(err: libsql::Error, name: &str) -> DatabaseError {
    let message = err.to_string();
    if message.contains("UNIQUE") {
        DatabaseError::Constraint(format!("a client named '{name}' already exists"))
    } else {
        DatabaseError::LibSql(err)
    }
}

#[async_trait::async_trait]
impl ClientStore for LibSqlBackend {
    async fn create_client(&self, input: &CreateClientParams) -> Result<Client, DatabaseError> {
        let name = input.name.trim();
        validate_client_fields(name, input.hourly_rate)?;

        let conn = self.connect().await?;
        let now = fmt_ts(Utc::now());
        conn.execute(
            "INSERT INTO clients (name, email, hourly_rate, notes, is_archived, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
            params![
                name,
                opt_text(input.email.as_deref()),
                input.hourly_rate.to_string(),
                opt_text(input.notes.as_deref()),
                now.as_str(),
            ],
        )
        .await
        .map_err(|e| map_name_conflict(e, name))?;

        let id = conn.last_insert_rowid();
        tracing::debug!(client_id = id, name, "Created client");
        self.get_client(id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created client".to_string()))
    }

    async fn get_client(&self, id: i64) -> Result<Option<Client>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?1 LIMIT 1"),
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_client(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_client_by_name(&self, name: &str) -> Result<Option<Client>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE name = ?1 LIMIT 1"),
                params![name.trim()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_client(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_clients(&self, include_archived: bool) -> Result<Vec<Client>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = if include_archived {
            conn.query(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients ORDER BY name ASC"),
                (),
            )
            .await?
        } else {
            conn.query(
                &format!(
                    "SELECT {CLIENT_COLUMNS} FROM clients WHERE is_archived = 0 ORDER BY name ASC"
                ),
                (),
            )
            .await?
        };

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_client(&row)?);
        }
        Ok(out)
    }

    async fn update_client(
        &self,
        id: i64,
        input: &UpdateClientParams,
    ) -> Result<Option<Client>, DatabaseError> {
        let Some(existing) = self.get_client(id).await? else {
            return Ok(None);
        };

        let merged_name = input
            .name
            .as_deref()
            .unwrap_or(existing.name.as_str())
            .trim();
        let merged_rate = input.hourly_rate.unwrap_or(existing.hourly_rate);
        validate_client_fields(merged_name, merged_rate)?;
        let merged_email = input.email.clone().unwrap_or(existing.email);
        let merged_notes = input.notes.clone().unwrap_or(existing.notes);

        let conn = self.connect().await?;
        conn.execute(
            "UPDATE clients SET \
               name = ?2, \
               email = ?3, \
               hourly_rate = ?4, \
               notes = ?5, \
               updated_at = ?6 \
             WHERE id = ?1",
            params![
                id,
                merged_name,
                opt_text(merged_email.as_deref()),
                merged_rate.to_string(),
                opt_text(merged_notes.as_deref()),
                fmt_ts(Utc::now()),
            ],
        )
        .await
        .map_err(|e| map_name_conflict(e, merged_name))?;

        self.get_client(id).await
    }

    async fn set_client_archived(&self, id: i64, archived: bool) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE clients SET is_archived = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, i64::from(archived), fmt_ts(Utc::now())],
            )
            .await?;
        Ok(updated > 0)
    }
}
