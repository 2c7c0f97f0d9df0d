use chrono::Utc;
use libsql::{Connection, Value, params};

use crate::db::{InvoiceFilter, InvoiceStore};
use crate::error::DatabaseError;
use crate::model::{
    Invoice, InvoiceLineItem, InvoiceStatus, format_invoice_number, parse_invoice_sequence,
};

use super::entries::lock_entries;
use super::{
    LibSqlBackend, fmt_date, fmt_ts, get_i64, get_opt_text, get_text, opt_text, parse_date,
    parse_decimal, parse_opt_date, parse_timestamp,
};

const INVOICE_COLUMNS: &str = "id, invoice_number, client_id, period_start, period_end, \
     subtotal, tax_rate, tax_amount, total, status, due_date, paid_date, created_at, updated_at";

const LINE_ITEM_COLUMNS: &str =
    "id, invoice_id, entry_id, date, description, hours, rate, amount";

fn parse_invoice_status(raw: &str) -> Result<InvoiceStatus, DatabaseError> {
    InvoiceStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid invoice status '{raw}'")))
}

fn row_to_invoice(row: &libsql::Row) -> Result<Invoice, DatabaseError> {
    Ok(Invoice {
        id: get_i64(row, 0),
        invoice_number: get_text(row, 1),
        client_id: get_i64(row, 2),
        period_start: parse_date(&get_text(row, 3))?,
        period_end: parse_date(&get_text(row, 4))?,
        subtotal: parse_decimal(&get_text(row, 5), "invoices.subtotal")?,
        tax_rate: parse_decimal(&get_text(row, 6), "invoices.tax_rate")?,
        tax_amount: parse_decimal(&get_text(row, 7), "invoices.tax_amount")?,
        total: parse_decimal(&get_text(row, 8), "invoices.total")?,
        status: parse_invoice_status(&get_text(row, 9))?,
        due_date: parse_opt_date(get_opt_text(row, 10))?,
        paid_date: parse_opt_date(get_opt_text(row, 11))?,
        created_at: parse_timestamp(&get_text(row, 12))?,
        updated_at: parse_timestamp(&get_text(row, 13))?,
    })
}

fn row_to_line_item(row: &libsql::Row) -> Result<InvoiceLineItem, DatabaseError> {
    Ok(InvoiceLineItem {
        id: get_i64(row, 0),
        invoice_id: get_i64(row, 1),
        entry_id: get_i64(row, 2),
        date: parse_date(&get_text(row, 3))?,
        description: get_text(row, 4),
        hours: parse_decimal(&get_text(row, 5), "invoice_line_items.hours")?,
        rate: parse_decimal(&get_text(row, 6), "invoice_line_items.rate")?,
        amount: parse_decimal(&get_text(row, 7), "invoice_line_items.amount")?,
    })
}

fn invoice_not_found(id: i64) -> DatabaseError {
    DatabaseError::NotFound {
        entity: "invoice".to_string(),
        id: id.to_string(),
    }
}

async fn load_invoice(conn: &Connection, id: i64) -> Result<Option<Invoice>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1 LIMIT 1"),
            params![id],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_invoice(&row)?)),
        None => Ok(None),
    }
}

/// Persists status, totals and dates, then reads the row back.
async fn write_invoice(conn: &Connection, invoice: &Invoice) -> Result<Invoice, DatabaseError> {
    let updated = conn
        .execute(
            "UPDATE invoices SET \
               subtotal = ?2, \
               tax_rate = ?3, \
               tax_amount = ?4, \
               total = ?5, \
               status = ?6, \
               due_date = ?7, \
               paid_date = ?8, \
               updated_at = ?9 \
             WHERE id = ?1",
            params![
                invoice.id,
                invoice.subtotal.to_string(),
                invoice.tax_rate.to_string(),
                invoice.tax_amount.to_string(),
                invoice.total.to_string(),
                invoice.status.as_str(),
                opt_text(invoice.due_date.map(fmt_date).as_deref()),
                opt_text(invoice.paid_date.map(fmt_date).as_deref()),
                fmt_ts(Utc::now()),
            ],
        )
        .await?;
    if updated == 0 {
        return Err(invoice_not_found(invoice.id));
    }
    load_invoice(conn, invoice.id)
        .await?
        .ok_or_else(|| invoice_not_found(invoice.id))
}

async fn load_line_item(
    conn: &Connection,
    id: i64,
) -> Result<Option<InvoiceLineItem>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {LINE_ITEM_COLUMNS} FROM invoice_line_items WHERE id = ?1 LIMIT 1"),
            params![id],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_line_item(&row)?)),
        None => Ok(None),
    }
}

async fn insert_line_item(
    conn: &Connection,
    item: &InvoiceLineItem,
) -> Result<InvoiceLineItem, DatabaseError> {
    conn.execute(
        "INSERT INTO invoice_line_items \
         (invoice_id, entry_id, date, description, hours, rate, amount) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            item.invoice_id,
            item.entry_id,
            fmt_date(item.date),
            item.description.as_str(),
            item.hours.to_string(),
            item.rate.to_string(),
            item.amount.to_string(),
        ],
    )
    .await?;
    let id = conn.last_insert_rowid();
    load_line_item(conn, id)
        .await?
        .ok_or_else(|| DatabaseError::Query("failed to load created line item".to_string()))
}

#[async_trait::async_trait]
impl InvoiceStore for LibSqlBackend {
    async fn create_invoice(&self, invoice: &Invoice) -> Result<Invoice, DatabaseError> {
        invoice.validate()?;
        let conn = self.connect().await?;
        let now = fmt_ts(Utc::now());
        conn.execute(
            "INSERT INTO invoices \
             (invoice_number, client_id, period_start, period_end, subtotal, tax_rate, tax_amount, \
              total, status, due_date, paid_date, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                invoice.invoice_number.trim(),
                invoice.client_id,
                fmt_date(invoice.period_start),
                fmt_date(invoice.period_end),
                invoice.subtotal.to_string(),
                invoice.tax_rate.to_string(),
                invoice.tax_amount.to_string(),
                invoice.total.to_string(),
                invoice.status.as_str(),
                opt_text(invoice.due_date.map(fmt_date).as_deref()),
                opt_text(invoice.paid_date.map(fmt_date).as_deref()),
                now.as_str(),
            ],
        )
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE") {
                DatabaseError::Constraint(format!(
                    "invoice number '{}' already exists",
                    invoice.invoice_number
                ))
            } else {
                DatabaseError::LibSql(e)
            }
        })?;

        let id = conn.last_insert_rowid();
        load_invoice(&conn, id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created invoice".to_string()))
    }

    async fn get_invoice(&self, id: i64) -> Result<Option<Invoice>, DatabaseError> {
        let conn = self.connect().await?;
        load_invoice(&conn, id).await
    }

    async fn get_invoice_by_number(&self, number: &str) -> Result<Option<Invoice>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_number = ?1 LIMIT 1"
                ),
                params![number.trim()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_invoice(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, DatabaseError> {
        let mut sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE 1 = 1");
        let mut args: Vec<Value> = Vec::new();
        if let Some(client_id) = filter.client_id {
            args.push(Value::Integer(client_id));
            sql.push_str(&format!(" AND client_id = ?{}", args.len()));
        }
        if let Some(status) = filter.status {
            args.push(Value::Text(status.as_str().to_string()));
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let conn = self.connect().await?;
        let mut rows = conn.query(&sql, args).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_invoice(&row)?);
        }
        Ok(out)
    }

    async fn update_invoice(&self, invoice: &Invoice) -> Result<Invoice, DatabaseError> {
        invoice.validate()?;
        let conn = self.connect().await?;
        write_invoice(&conn, invoice).await
    }

    async fn add_line_item(
        &self,
        item: &InvoiceLineItem,
    ) -> Result<InvoiceLineItem, DatabaseError> {
        let conn = self.connect().await?;
        insert_line_item(&conn, item).await
    }

    async fn add_line_items(
        &self,
        items: &[InvoiceLineItem],
    ) -> Result<Vec<InvoiceLineItem>, DatabaseError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.connect().await?;

        conn.execute("BEGIN", ()).await?;
        let insert_result = async {
            let mut created = Vec::with_capacity(items.len());
            for item in items {
                created.push(insert_line_item(&conn, item).await?);
            }
            Ok::<_, DatabaseError>(created)
        }
        .await;

        match insert_result {
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

    async fn delete_line_item(&self, line_item_id: i64) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM invoice_line_items WHERE id = ?1",
                params![line_item_id],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn remove_line_item(
        &self,
        line_item_id: i64,
        invoice: &Invoice,
    ) -> Result<Invoice, DatabaseError> {
        invoice.validate()?;
        let conn = self.connect().await?;

        conn.execute("BEGIN", ()).await?;
        let remove_result = async {
            let deleted = conn
                .execute(
                    "DELETE FROM invoice_line_items WHERE id = ?1 AND invoice_id = ?2",
                    params![line_item_id, invoice.id],
                )
                .await?;
            if deleted == 0 {
                return Err(DatabaseError::NotFound {
                    entity: "invoice_line_item".to_string(),
                    id: line_item_id.to_string(),
                });
            }
            write_invoice(&conn, invoice).await
        }
        .await;

        match remove_result {
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

    async fn list_line_items(
        &self,
        invoice_id: i64,
    ) -> Result<Vec<InvoiceLineItem>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {LINE_ITEM_COLUMNS} FROM invoice_line_items \
                     WHERE invoice_id = ?1 ORDER BY date ASC, id ASC"
                ),
                params![invoice_id],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_line_item(&row)?);
        }
        Ok(out)
    }

    async fn next_invoice_number(&self, prefix: &str, year: i32) -> Result<String, DatabaseError> {
        let conn = self.connect().await?;
        let pattern = format!("{prefix}-{year}-%");
        let mut rows = conn
            .query(
                "SELECT invoice_number FROM invoices WHERE invoice_number LIKE ?1",
                params![pattern],
            )
            .await?;

        let mut highest = 0u32;
        while let Some(row) = rows.next().await? {
            if let Some(sequence) = parse_invoice_sequence(&get_text(&row, 0), prefix, year) {
                highest = highest.max(sequence);
            }
        }
        let next = highest.checked_add(1).ok_or_else(|| {
            DatabaseError::Constraint(format!("invoice sequence exhausted for {prefix}-{year}"))
        })?;
        Ok(format_invoice_number(prefix, year, next))
    }

    async fn finalize_invoice(
        &self,
        invoice_id: i64,
        entry_ids: &[i64],
    ) -> Result<Invoice, DatabaseError> {
        let conn = self.connect().await?;

        conn.execute("BEGIN", ()).await?;
        let finalize_result = async {
            lock_entries(&conn, entry_ids, invoice_id).await?;
            let updated = conn
                .execute(
                    "UPDATE invoices SET status = ?2, updated_at = ?3 \
                     WHERE id = ?1 AND status = 'draft'",
                    params![
                        invoice_id,
                        InvoiceStatus::Finalized.as_str(),
                        fmt_ts(Utc::now())
                    ],
                )
                .await?;
            if updated == 0 {
                return Err(DatabaseError::Constraint(format!(
                    "invoice {invoice_id} is not a draft"
                )));
            }
            load_invoice(&conn, invoice_id)
                .await?
                .ok_or_else(|| invoice_not_found(invoice_id))
        }
        .await;

        match finalize_result {
            Ok(invoice) => {
                conn.execute("COMMIT", ()).await?;
                Ok(invoice)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                tracing::warn!(invoice_id, error = %err, "Rolled back invoice finalize");
                Err(err)
            }
        }
    }

    async fn delete_invoice(&self, invoice_id: i64) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;

        conn.execute("BEGIN", ()).await?;
        let delete_result = async {
            let unlocked = conn
                .execute(
                    "UPDATE time_entries SET invoice_id = NULL, updated_at = ?2 \
                     WHERE invoice_id = ?1",
                    params![invoice_id, fmt_ts(Utc::now())],
                )
                .await?;
            conn.execute(
                "DELETE FROM invoice_line_items WHERE invoice_id = ?1",
                params![invoice_id],
            )
            .await?;
            let deleted = conn
                .execute("DELETE FROM invoices WHERE id = ?1", params![invoice_id])
                .await?;
            Ok::<_, DatabaseError>((deleted > 0, unlocked))
        }
        .await;

        match delete_result {
            Ok((deleted, unlocked)) => {
                conn.execute("COMMIT", ()).await?;
                if deleted {
                    tracing::debug!(invoice_id, unlocked, "Deleted invoice");
                }
                Ok(deleted)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }
}
