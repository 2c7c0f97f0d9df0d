//! Database abstraction layer.
//!
//! Provides a backend-agnostic `Database` trait that unifies every durable
//! write in tallyclock. The gateway is the only component allowed to mutate
//! stored state: it enforces entry locking and writes the field-level audit
//! trail at the storage boundary, and it runs every multi-row change
//! (entry + history, entry locks + invoice status, timer stop) as one
//! transaction.
//!
//! The embedded libSQL backend lives in [`libsql`].

pub mod libsql;
pub mod libsql_migrations;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::DatabaseError;
use crate::model::{
    ActiveTimer, Client, EntryHistory, Invoice, InvoiceLineItem, InvoiceStatus, TimeEntry,
};

/// Open the configured database, run migrations, and return it.
pub async fn connect_from_config(
    config: &crate::config::DatabaseConfig,
) -> Result<Arc<dyn Database>, DatabaseError> {
    let backend = libsql::LibSqlBackend::new_local(&config.path).await?;
    backend.run_migrations().await?;
    Ok(Arc::new(backend))
}

#[derive(Debug, Clone)]
pub struct CreateClientParams {
    pub name: String,
    pub email: Option<String>,
    pub hourly_rate: Decimal,
    pub notes: Option<String>,
}

/// Partial client update. `None` keeps the stored value; the inner `Option`
/// on nullable fields clears them.
#[derive(Debug, Clone, Default)]
pub struct UpdateClientParams {
    pub name: Option<String>,
    pub email: Option<Option<String>>,
    pub hourly_rate: Option<Decimal>,
    pub notes: Option<Option<String>>,
}

/// Filter for entry listings. Soft-deleted rows are always excluded.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub client_id: Option<i64>,
    /// Inclusive lower bound on `start_time`.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `start_time`.
    pub end: Option<DateTime<Utc>>,
    /// Also return entries already locked to an invoice.
    pub include_locked: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub client_id: Option<i64>,
    pub status: Option<InvoiceStatus>,
}

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn create_client(&self, input: &CreateClientParams) -> Result<Client, DatabaseError>;
    async fn get_client(&self, id: i64) -> Result<Option<Client>, DatabaseError>;
    async fn get_client_by_name(&self, name: &str) -> Result<Option<Client>, DatabaseError>;
    async fn list_clients(&self, include_archived: bool) -> Result<Vec<Client>, DatabaseError>;
    async fn update_client(
        &self,
        id: i64,
        input: &UpdateClientParams,
    ) -> Result<Option<Client>, DatabaseError>;
    /// Returns `false` when no such client exists.
    async fn set_client_archived(&self, id: i64, archived: bool) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait TimeEntryStore: Send + Sync {
    /// Stores a new unlocked entry and returns it with its assigned id.
    async fn create_entry(&self, entry: &TimeEntry) -> Result<TimeEntry, DatabaseError>;
    async fn get_entry(&self, id: i64) -> Result<Option<TimeEntry>, DatabaseError>;
    /// Applies `entry` over the stored row and records one history row per
    /// changed audited field, atomically. Fails with `Locked` on a locked entry.
    async fn update_entry(&self, entry: &TimeEntry, reason: &str)
    -> Result<TimeEntry, DatabaseError>;
    async fn soft_delete_entry(&self, id: i64, reason: &str) -> Result<(), DatabaseError>;
    /// Newest first by start time.
    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<TimeEntry>, DatabaseError>;
    /// Closed, unlocked, live entries of one client whose start falls in
    /// `[start, end]`, oldest first.
    async fn list_unbilled_entries(
        &self,
        client_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>, DatabaseError>;
    async fn is_entry_locked(&self, id: i64) -> Result<bool, DatabaseError>;
    /// All-or-nothing: every entry must exist, be live and be unlocked.
    async fn lock_entries_for_invoice(
        &self,
        entry_ids: &[i64],
        invoice_id: i64,
    ) -> Result<(), DatabaseError>;
    /// Newest first.
    async fn entry_history(&self, entry_id: i64) -> Result<Vec<EntryHistory>, DatabaseError>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn create_invoice(&self, invoice: &Invoice) -> Result<Invoice, DatabaseError>;
    async fn get_invoice(&self, id: i64) -> Result<Option<Invoice>, DatabaseError>;
    async fn get_invoice_by_number(&self, number: &str) -> Result<Option<Invoice>, DatabaseError>;
    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, DatabaseError>;
    /// Persists status, totals and dates of an existing invoice.
    async fn update_invoice(&self, invoice: &Invoice) -> Result<Invoice, DatabaseError>;
    async fn add_line_item(&self, item: &InvoiceLineItem)
    -> Result<InvoiceLineItem, DatabaseError>;
    /// Inserts every item or none.
    async fn add_line_items(
        &self,
        items: &[InvoiceLineItem],
    ) -> Result<Vec<InvoiceLineItem>, DatabaseError>;
    async fn delete_line_item(&self, line_item_id: i64) -> Result<bool, DatabaseError>;
    /// Deletes one line item of `invoice` and writes its recomputed totals in
    /// one transaction.
    async fn remove_line_item(
        &self,
        line_item_id: i64,
        invoice: &Invoice,
    ) -> Result<Invoice, DatabaseError>;
    /// Ordered by date.
    async fn list_line_items(&self, invoice_id: i64)
    -> Result<Vec<InvoiceLineItem>, DatabaseError>;
    async fn next_invoice_number(&self, prefix: &str, year: i32) -> Result<String, DatabaseError>;
    /// Locks `entry_ids` to the invoice and marks it finalized in one
    /// transaction.
    async fn finalize_invoice(
        &self,
        invoice_id: i64,
        entry_ids: &[i64],
    ) -> Result<Invoice, DatabaseError>;
    /// Unlocks the invoice's entries, then removes its line items and the
    /// invoice itself. Returns `false` when no such invoice exists.
    async fn delete_invoice(&self, invoice_id: i64) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait TimerStore: Send + Sync {
    /// `None` when idle.
    async fn get_active_timer(&self) -> Result<Option<ActiveTimer>, DatabaseError>;
    /// Full overwrite of the singleton.
    async fn save_active_timer(&self, timer: &ActiveTimer) -> Result<(), DatabaseError>;
    async fn delete_active_timer(&self) -> Result<bool, DatabaseError>;
    /// Stores the closed entry and clears the singleton in one transaction.
    async fn stop_active_timer(&self, entry: &TimeEntry) -> Result<TimeEntry, DatabaseError>;
}

/// Backend-agnostic database supertrait.
///
/// Services hold an `Arc<dyn Database>`; leaf consumers can depend on a
/// specific sub-trait instead.
#[async_trait]
pub trait Database: ClientStore + TimeEntryStore + InvoiceStore + TimerStore + Send + Sync {
    /// Run schema migrations for this backend.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}
