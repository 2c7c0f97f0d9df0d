use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A billable customer. Never hard-deleted; archiving hides it from default listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub hourly_rate: Decimal,
    pub notes: Option<String>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Client {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_client_fields(&self.name, self.hourly_rate)
    }
}

pub(crate) fn validate_client_fields(
    name: &str,
    hourly_rate: Decimal,
) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyClientName);
    }
    if hourly_rate < Decimal::ZERO {
        return Err(ValidationError::NegativeRate);
    }
    Ok(())
}
