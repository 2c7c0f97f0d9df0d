//! Error types for tallyclock.

use crate::model::InvoiceStatus;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A record field that breaks one of the entity rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("client name cannot be empty")]
    EmptyClientName,

    #[error("hourly rate cannot be negative")]
    NegativeRate,

    #[error("time entry must reference a client")]
    MissingClient,

    #[error("time entry must have a start time")]
    MissingStart,

    #[error("end time cannot be before start time")]
    EndBeforeStart,

    #[error("recorded duration of {seconds}s does not fit the entry's start/end span")]
    DurationOutOfRange { seconds: i64 },

    #[error("invoice must reference a client")]
    MissingInvoiceClient,

    #[error("invoice number cannot be empty")]
    MissingInvoiceNumber,

    #[error("billing period end cannot be before its start")]
    PeriodEndBeforeStart,

    #[error("tax rate must be between 0 and 1")]
    TaxRateOutOfRange,
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Invalid record: {0}")]
    Validation(#[from] ValidationError),

    #[error("Time entry {entry_id} is locked by invoice {invoice_id}")]
    Locked { entry_id: i64, invoice_id: i64 },

    #[error("Time entry {entry_id} cannot be locked: missing, deleted, or already locked")]
    LockConflict { entry_id: i64 },

    #[error("LibSQL error: {0}")]
    LibSql(#[from] libsql::Error),
}

/// State conflicts raised by the timer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimerStateError {
    #[error("a timer is already running")]
    AlreadyRunning,

    #[error("timer is not running")]
    NotRunning,

    #[error("timer is not paused")]
    NotPaused,

    #[error("no active timer")]
    NoActiveTimer,
}

/// Errors surfaced by the timer and invoice services.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Client {0} not found")]
    ClientNotFound(i64),

    #[error("Time entry {0} not found")]
    EntryNotFound(i64),

    #[error("Invoice {0} not found")]
    InvoiceNotFound(String),

    #[error("Invoice {invoice_id} has no line item for time entry {entry_id}")]
    LineItemNotFound { invoice_id: i64, entry_id: i64 },

    #[error("Time entry {entry_id} is locked by invoice {invoice_id}")]
    Locked { entry_id: i64, invoice_id: i64 },

    #[error("Time entry {entry_id} is already billed on invoice {invoice_id}")]
    AlreadyLocked { entry_id: i64, invoice_id: i64 },

    #[error("Invoice {invoice_id} is {} and can no longer be edited", status.as_str())]
    NotEditable {
        invoice_id: i64,
        status: InvoiceStatus,
    },

    #[error(
        "Time entry {entry_id} belongs to client {entry_client_id}, invoice is for client {invoice_client_id}"
    )]
    ClientMismatch {
        entry_id: i64,
        entry_client_id: i64,
        invoice_client_id: i64,
    },

    #[error("Time entry {entry_id} is already on invoice {invoice_id}")]
    DuplicateLineItem { invoice_id: i64, entry_id: i64 },

    #[error("Invoice {invoice_id} has no line items")]
    EmptyInvoice { invoice_id: i64 },

    #[error("Invoice {invoice_id} cannot move from {} to {}", from.as_str(), to.as_str())]
    InvalidTransition {
        invoice_id: i64,
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    #[error("Timer: {0}")]
    Timer(#[from] TimerStateError),

    #[error("Storage error: {0}")]
    Storage(DatabaseError),
}

impl From<DatabaseError> for BillingError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Validation(inner) => Self::Validation(inner),
            DatabaseError::Locked {
                entry_id,
                invoice_id,
            } => Self::Locked {
                entry_id,
                invoice_id,
            },
            other => Self::Storage(other),
        }
    }
}

/// Invoice export failures.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Failed to render invoice template: {0}")]
    Render(String),

    #[error("Failed to write invoice file: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::{BillingError, DatabaseError, ValidationError};

    #[test]
    fn storage_guards_lift_into_billing_kinds() {
        let locked: BillingError = DatabaseError::Locked {
            entry_id: 4,
            invoice_id: 9,
        }
        .into();
        assert!(matches!(
            locked,
            BillingError::Locked {
                entry_id: 4,
                invoice_id: 9
            }
        ));

        let invalid: BillingError = DatabaseError::Validation(ValidationError::NegativeRate).into();
        assert!(matches!(
            invalid,
            BillingError::Validation(ValidationError::NegativeRate)
        ));

        let other: BillingError = DatabaseError::Query("boom".to_string()).into();
        assert!(matches!(other, BillingError::Storage(_)));
    }
}
