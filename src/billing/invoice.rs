//! Invoice lifecycle.
//!
//! `Draft -> Finalized -> Sent -> Paid`, with `Sent -> Overdue` once the due
//! date has passed. `MarkPaid` is accepted from any status.
//!
//! Attaching entries is two-phase. [`InvoiceService::add_entries`] only
//! snapshots entries into line items; the entries stay editable and could
//! still be removed from the draft. [`InvoiceService::finalize`] is the single
//! point where every line-itemed entry gets locked to the invoice, in the
//! same transaction that flips the status. A draft can therefore be reshaped
//! freely until the irrevocable lock.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;

use crate::billing::journal::EventJournal;
use crate::config::BillingConfig;
use crate::db::{Database, InvoiceFilter};
use crate::error::{BillingError, DatabaseError};
use crate::model::{Invoice, InvoiceLineItem, InvoiceStatus};

const FALLBACK_DUE_DAYS: i64 = 30;

/// Caller-supplied defaults for one-shot invoice generation.
#[derive(Debug, Clone)]
pub struct InvoiceDefaults {
    pub prefix: String,
    pub tax_rate: Decimal,
    pub due_days: i64,
}

impl From<&BillingConfig> for InvoiceDefaults {
    fn from(config: &BillingConfig) -> Self {
        Self {
            prefix: config.number_prefix.clone(),
            tax_rate: config.default_tax_rate,
            due_days: config.default_due_days,
        }
    }
}

pub struct InvoiceService {
    db: Arc<dyn Database>,
    journal: Option<Arc<EventJournal>>,
}

impl InvoiceService {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db, journal: None }
    }

    pub fn with_journal(mut self, journal: Arc<EventJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    fn record(&self, event_type: &str, invoice: &Invoice, extra: serde_json::Value) {
        if let Some(journal) = &self.journal {
            journal.record(
                event_type,
                serde_json::json!({
                    "invoice_id": invoice.id,
                    "invoice_number": invoice.invoice_number,
                    "status": invoice.status.as_str(),
                    "total": invoice.total.to_string(),
                    "extra": extra,
                }),
            );
        }
    }

    pub async fn get_invoice(&self, invoice_id: i64) -> Result<Invoice, BillingError> {
        self.db
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::InvoiceNotFound(invoice_id.to_string()))
    }

    pub async fn get_invoice_by_number(&self, number: &str) -> Result<Invoice, BillingError> {
        self.db
            .get_invoice_by_number(number)
            .await?
            .ok_or_else(|| BillingError::InvoiceNotFound(number.to_string()))
    }

    pub async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, BillingError> {
        Ok(self.db.list_invoices(filter).await?)
    }

    pub async fn line_items(&self, invoice_id: i64) -> Result<Vec<InvoiceLineItem>, BillingError> {
        self.get_invoice(invoice_id).await?;
        Ok(self.db.list_line_items(invoice_id).await?)
    }

    async fn get_draft(&self, invoice_id: i64) -> Result<Invoice, BillingError> {
        let invoice = self.get_invoice(invoice_id).await?;
        if !invoice.can_edit() {
            return Err(BillingError::NotEditable {
                invoice_id,
                status: invoice.status,
            });
        }
        Ok(invoice)
    }

    /// Creates an empty draft numbered in the sequence of `period_end`'s year.
    pub async fn create_draft(
        &self,
        client_id: i64,
        period_start: NaiveDate,
        period_end: NaiveDate,
        prefix: &str,
    ) -> Result<Invoice, BillingError> {
        if self.db.get_client(client_id).await?.is_none() {
            return Err(BillingError::ClientNotFound(client_id));
        }

        let number = self
            .db
            .next_invoice_number(prefix.trim(), period_end.year())
            .await?;
        let draft = Invoice::draft(number, client_id, period_start, period_end);
        draft.validate()?;
        let invoice = self.db.create_invoice(&draft).await?;

        tracing::info!(
            invoice_id = invoice.id,
            invoice_number = %invoice.invoice_number,
            client_id,
            "Created draft invoice"
        );
        self.record("invoice_created", &invoice, serde_json::json!({}));
        Ok(invoice)
    }

    pub async fn add_entries(
        &self,
        invoice_id: i64,
        entry_ids: &[i64],
    ) -> Result<Vec<InvoiceLineItem>, BillingError> {
        self.add_entries_at(invoice_id, entry_ids, Utc::now()).await
    }

    /// Snapshots each entry into a line item. Entries are not locked here.
    ///
    /// Every entry is checked before anything is written; the line items are
    /// then inserted as one batch. Totals are left for the caller to recompute.
    pub async fn add_entries_at(
        &self,
        invoice_id: i64,
        entry_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<InvoiceLineItem>, BillingError> {
        let invoice = self.get_draft(invoice_id).await?;
        let attached: HashSet<i64> = self
            .db
            .list_line_items(invoice_id)
            .await?
            .into_iter()
            .map(|item| item.entry_id)
            .collect();

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(entry_ids.len());
        for &entry_id in entry_ids {
            if !seen.insert(entry_id) {
                continue;
            }
            let entry = self
                .db
                .get_entry(entry_id)
                .await?
                .filter(|entry| !entry.is_deleted)
                .ok_or(BillingError::EntryNotFound(entry_id))?;
            if let Some(locked_to) = entry.invoice_id {
                return Err(BillingError::AlreadyLocked {
                    entry_id,
                    invoice_id: locked_to,
                });
            }
            if entry.client_id != invoice.client_id {
                return Err(BillingError::ClientMismatch {
                    entry_id,
                    entry_client_id: entry.client_id,
                    invoice_client_id: invoice.client_id,
                });
            }
            if attached.contains(&entry_id) {
                return Err(BillingError::DuplicateLineItem {
                    invoice_id,
                    entry_id,
                });
            }
            items.push(InvoiceLineItem::snapshot(invoice_id, &entry, now));
        }

        let created = self.db.add_line_items(&items).await?;
        tracing::debug!(invoice_id, count = created.len(), "Attached entries to invoice");
        self.record(
            "invoice_entries_added",
            &invoice,
            serde_json::json!({ "entry_ids": created.iter().map(|i| i.entry_id).collect::<Vec<_>>() }),
        );
        Ok(created)
    }

    /// Drops the entry's line item and recomputes totals at the invoice's
    /// current tax rate. May leave the draft empty.
    pub async fn remove_entry(&self, invoice_id: i64, entry_id: i64) -> Result<Invoice, BillingError> {
        let mut invoice = self.get_draft(invoice_id).await?;
        let items = self.db.list_line_items(invoice_id).await?;
        let target = items
            .iter()
            .find(|item| item.entry_id == entry_id)
            .ok_or(BillingError::LineItemNotFound {
                invoice_id,
                entry_id,
            })?;

        let remaining: Vec<InvoiceLineItem> = items
            .iter()
            .filter(|item| item.id != target.id)
            .cloned()
            .collect();
        invoice.calculate_totals(&remaining);
        let invoice = self.db.remove_line_item(target.id, &invoice).await?;

        tracing::debug!(invoice_id, entry_id, "Removed entry from invoice");
        self.record(
            "invoice_entry_removed",
            &invoice,
            serde_json::json!({ "entry_id": entry_id }),
        );
        Ok(invoice)
    }

    /// Sets the tax rate and recomputes subtotal, tax and total from the
    /// stored line items.
    pub async fn calculate_totals(
        &self,
        invoice_id: i64,
        tax_rate: Decimal,
    ) -> Result<Invoice, BillingError> {
        let mut invoice = self.get_draft(invoice_id).await?;
        let items = self.db.list_line_items(invoice_id).await?;
        invoice.tax_rate = tax_rate;
        invoice.validate()?;
        invoice.calculate_totals(&items);
        Ok(self.db.update_invoice(&invoice).await?)
    }

    /// Locks every line-itemed entry to the invoice and marks it finalized,
    /// atomically. On any lock conflict nothing is locked and the invoice
    /// stays a draft.
    pub async fn finalize(&self, invoice_id: i64) -> Result<Invoice, BillingError> {
        self.get_draft(invoice_id).await?;
        let items = self.db.list_line_items(invoice_id).await?;
        if items.is_empty() {
            return Err(BillingError::EmptyInvoice { invoice_id });
        }

        let mut seen = HashSet::new();
        let entry_ids: Vec<i64> = items
            .iter()
            .map(|item| item.entry_id)
            .filter(|id| seen.insert(*id))
            .collect();

        let invoice = match self.db.finalize_invoice(invoice_id, &entry_ids).await {
            Ok(invoice) => invoice,
            Err(DatabaseError::LockConflict { entry_id }) => {
                return Err(self.explain_lock_conflict(entry_id).await);
            }
            Err(err) => return Err(err.into()),
        };

        tracing::info!(
            invoice_id,
            invoice_number = %invoice.invoice_number,
            locked_entries = entry_ids.len(),
            total = %invoice.total,
            "Finalized invoice"
        );
        self.record(
            "invoice_finalized",
            &invoice,
            serde_json::json!({ "entry_ids": entry_ids }),
        );
        Ok(invoice)
    }

    async fn explain_lock_conflict(&self, entry_id: i64) -> BillingError {
        match self.db.get_entry(entry_id).await {
            Ok(Some(entry)) if !entry.is_deleted => match entry.invoice_id {
                Some(invoice_id) => BillingError::AlreadyLocked {
                    entry_id,
                    invoice_id,
                },
                None => BillingError::Storage(DatabaseError::LockConflict { entry_id }),
            },
            Ok(_) => BillingError::EntryNotFound(entry_id),
            Err(err) => err.into(),
        }
    }

    pub async fn mark_sent(&self, invoice_id: i64) -> Result<Invoice, BillingError> {
        let mut invoice = self.get_invoice(invoice_id).await?;
        if invoice.status == InvoiceStatus::Draft {
            return Err(BillingError::InvalidTransition {
                invoice_id,
                from: InvoiceStatus::Draft,
                to: InvoiceStatus::Sent,
            });
        }
        invoice.status = InvoiceStatus::Sent;
        let invoice = self.db.update_invoice(&invoice).await?;
        tracing::info!(invoice_id, "Invoice marked sent");
        self.record("invoice_sent", &invoice, serde_json::json!({}));
        Ok(invoice)
    }

    /// Accepted from any status.
    pub async fn mark_paid(
        &self,
        invoice_id: i64,
        paid_date: NaiveDate,
    ) -> Result<Invoice, BillingError> {
        let mut invoice = self.get_invoice(invoice_id).await?;
        let previous = invoice.status;
        invoice.status = InvoiceStatus::Paid;
        invoice.paid_date = Some(paid_date);
        let invoice = self.db.update_invoice(&invoice).await?;
        tracing::info!(invoice_id, from = previous.as_str(), %paid_date, "Invoice marked paid");
        self.record(
            "invoice_paid",
            &invoice,
            serde_json::json!({ "previous_status": previous.as_str(), "paid_date": paid_date.to_string() }),
        );
        Ok(invoice)
    }

    pub async fn set_due_date(
        &self,
        invoice_id: i64,
        due_date: NaiveDate,
    ) -> Result<Invoice, BillingError> {
        let mut invoice = self.get_invoice(invoice_id).await?;
        invoice.due_date = Some(due_date);
        Ok(self.db.update_invoice(&invoice).await?)
    }

    pub async fn check_overdue(&self) -> Result<Vec<Invoice>, BillingError> {
        self.check_overdue_at(Utc::now().date_naive()).await
    }

    /// Flips every sent invoice due on or before `today` to overdue.
    /// Returns the invoices that changed.
    pub async fn check_overdue_at(&self, today: NaiveDate) -> Result<Vec<Invoice>, BillingError> {
        let sent = self
            .db
            .list_invoices(&InvoiceFilter {
                client_id: None,
                status: Some(InvoiceStatus::Sent),
            })
            .await?;

        let mut flipped = Vec::new();
        for mut invoice in sent {
            if !invoice.due_date.is_some_and(|due| today >= due) {
                continue;
            }
            invoice.status = InvoiceStatus::Overdue;
            let invoice = self.db.update_invoice(&invoice).await?;
            tracing::info!(invoice_id = invoice.id, "Invoice overdue");
            self.record("invoice_overdue", &invoice, serde_json::json!({}));
            flipped.push(invoice);
        }
        Ok(flipped)
    }

    /// Deletes the invoice and its line items and unlocks its entries.
    pub async fn delete_invoice(&self, invoice_id: i64) -> Result<(), BillingError> {
        let invoice = self.get_invoice(invoice_id).await?;
        if !self.db.delete_invoice(invoice_id).await? {
            return Err(BillingError::InvoiceNotFound(invoice_id.to_string()));
        }
        tracing::info!(invoice_id, "Deleted invoice");
        self.record("invoice_deleted", &invoice, serde_json::json!({}));
        Ok(())
    }

    pub async fn generate(
        &self,
        client_id: i64,
        period_start: NaiveDate,
        period_end: NaiveDate,
        defaults: &InvoiceDefaults,
    ) -> Result<Invoice, BillingError> {
        self.generate_at(client_id, period_start, period_end, defaults, Utc::now())
            .await
    }

    /// Draft, attach every unbilled entry in the period, total at the default
    /// tax rate, finalize, then set the due date `due_days` after `now`.
    ///
    /// The draft is removed again if nothing could be billed or any step
    /// before the lock fails.
    pub async fn generate_at(
        &self,
        client_id: i64,
        period_start: NaiveDate,
        period_end: NaiveDate,
        defaults: &InvoiceDefaults,
        now: DateTime<Utc>,
    ) -> Result<Invoice, BillingError> {
        let draft = self
            .create_draft(client_id, period_start, period_end, &defaults.prefix)
            .await?;

        let prepared = async {
            let from = period_start.and_time(NaiveTime::MIN).and_utc();
            let until = period_end.and_time(NaiveTime::MIN).and_utc() + Duration::days(1)
                - Duration::microseconds(1);
            let entries = self.db.list_unbilled_entries(client_id, from, until).await?;
            if entries.is_empty() {
                return Err(BillingError::EmptyInvoice {
                    invoice_id: draft.id,
                });
            }
            let ids: Vec<i64> = entries.iter().map(|entry| entry.id).collect();
            self.add_entries_at(draft.id, &ids, now).await?;
            self.calculate_totals(draft.id, defaults.tax_rate).await?;
            self.finalize(draft.id).await
        }
        .await;

        let finalized = match prepared {
            Ok(invoice) => invoice,
            Err(err) => {
                if let Err(cleanup) = self.db.delete_invoice(draft.id).await {
                    tracing::warn!(invoice_id = draft.id, error = %cleanup, "Failed to remove abandoned draft");
                }
                return Err(err);
            }
        };

        let due_days = if defaults.due_days <= 0 {
            FALLBACK_DUE_DAYS
        } else {
            defaults.due_days
        };
        let today = now.date_naive();
        let due = today
            .checked_add_signed(Duration::days(due_days))
            .unwrap_or(today);
        self.set_due_date(finalized.id, due).await
    }
}
