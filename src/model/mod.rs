//! Billing entities.
//!
//! Pure value types with validation and derived computations. Nothing in
//! this module touches storage; the gateway in [`crate::db`] persists these
//! records and the services in [`crate::billing`] drive their lifecycles.

mod audit;
mod client;
mod entry;
mod invoice;
mod timer;

use chrono::{DateTime, SecondsFormat, Utc};

pub use audit::{AUDITED_FIELDS, FieldChange, diff_entries};
pub use client::Client;
pub(crate) use client::validate_client_fields;
pub use entry::{EntryHistory, TimeEntry};
pub use invoice::{
    Invoice, InvoiceLineItem, InvoiceStatus, format_invoice_number, parse_invoice_sequence,
};
pub use timer::{ActiveTimer, TimerState};

/// Canonical text form of an instant: fixed-width RFC 3339, microseconds, `Z`.
///
/// Every stored timestamp uses this form so that string ordering in SQL
/// matches chronological ordering.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
