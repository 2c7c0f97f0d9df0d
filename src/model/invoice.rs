use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TimeEntry;
use crate::error::ValidationError;

/// Invoice lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Finalized,
    Sent,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Finalized => "finalized",
            Self::Sent => "sent",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "finalized" => Some(Self::Finalized),
            "sent" => Some(Self::Sent),
            "paid" => Some(Self::Paid),
            "overdue" => Some(Self::Overdue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub invoice_number: String,
    pub client_id: i64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub status: InvoiceStatus,
    pub due_date: Option<NaiveDate>,
    pub paid_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// A new draft with zeroed totals, not yet stored.
    pub fn draft(
        invoice_number: impl Into<String>,
        client_id: i64,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            invoice_number: invoice_number.into(),
            client_id,
            period_start,
            period_end,
            subtotal: Decimal::ZERO,
            tax_rate: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            total: Decimal::ZERO,
            status: InvoiceStatus::Draft,
            due_date: None,
            paid_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Only drafts accept line-item changes.
    pub fn can_edit(&self) -> bool {
        self.status == InvoiceStatus::Draft
    }

    /// Recomputes subtotal, tax and total from `line_items` at the current tax rate.
    pub fn calculate_totals(&mut self, line_items: &[InvoiceLineItem]) {
        self.subtotal = line_items
            .iter()
            .fold(Decimal::ZERO, |acc, item| acc + item.amount)
            .round_dp(2);
        self.tax_amount = (self.subtotal * self.tax_rate).round_dp(2);
        self.total = (self.subtotal + self.tax_amount).round_dp(2);
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.invoice_number.trim().is_empty() {
            return Err(ValidationError::MissingInvoiceNumber);
        }
        if self.client_id <= 0 {
            return Err(ValidationError::MissingInvoiceClient);
        }
        if self.period_end < self.period_start {
            return Err(ValidationError::PeriodEndBeforeStart);
        }
        if self.tax_rate < Decimal::ZERO || self.tax_rate > Decimal::ONE {
            return Err(ValidationError::TaxRateOutOfRange);
        }
        Ok(())
    }
}

/// Billing facts of one entry, frozen when the entry was attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub id: i64,
    pub invoice_id: i64,
    pub entry_id: i64,
    pub date: NaiveDate,
    pub description: String,
    pub hours: Decimal,
    pub rate: Decimal,
    pub amount: Decimal,
}

impl InvoiceLineItem {
    pub fn snapshot(invoice_id: i64, entry: &TimeEntry, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            invoice_id,
            entry_id: entry.id,
            date: entry.start_time.date_naive(),
            description: entry.description.clone(),
            hours: entry.hours_at(now),
            rate: entry.hourly_rate,
            amount: entry.amount_at(now).round_dp(2),
        }
    }
}

/// `{prefix}-{year}-{seq:03}`, e.g. `INV-2026-001`.
pub fn format_invoice_number(prefix: &str, year: i32, sequence: u32) -> String {
    format!("{prefix}-{year}-{sequence:03}")
}

/// Trailing sequence of `number` when it belongs to `prefix` and `year`.
pub fn parse_invoice_sequence(number: &str, prefix: &str, year: i32) -> Option<u32> {
    let pattern = format!(r"^{}-{}-(\d+)$", regex::escape(prefix), year);
    let re = Regex::new(&pattern).ok()?;
    re.captures(number)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::{Invoice, InvoiceLineItem, format_invoice_number, parse_invoice_sequence};
    use crate::error::ValidationError;
    use crate::model::TimeEntry;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn item(amount: rust_decimal::Decimal) -> InvoiceLineItem {
        InvoiceLineItem {
            id: 1,
            invoice_id: 1,
            entry_id: 1,
            date: date(2026, 1, 5),
            description: "work".to_string(),
            hours: dec!(1),
            rate: amount,
            amount,
        }
    }

    #[test]
    fn totals_apply_tax_to_subtotal() {
        let mut invoice = Invoice::draft("INV-2026-001", 1, date(2026, 1, 1), date(2026, 1, 31));
        invoice.tax_rate = dec!(0.10);
        invoice.calculate_totals(&[item(dec!(100))]);

        assert_eq!(invoice.subtotal, dec!(100));
        assert_eq!(invoice.tax_amount, dec!(10));
        assert_eq!(invoice.total, dec!(110));

        let before = invoice.clone();
        invoice.calculate_totals(&[item(dec!(100))]);
        assert_eq!(invoice, before);
    }

    #[test]
    fn empty_line_items_total_zero() {
        let mut invoice = Invoice::draft("INV-2026-001", 1, date(2026, 1, 1), date(2026, 1, 31));
        invoice.tax_rate = dec!(0.2);
        invoice.calculate_totals(&[]);
        assert_eq!(invoice.total, dec!(0));
    }

    #[test]
    fn snapshot_copies_entry_billing_facts() {
        let start = Utc
            .with_ymd_and_hms(2026, 2, 10, 9, 0, 0)
            .single()
            .expect("valid timestamp");
        let mut entry = TimeEntry::closed(
            3,
            "Sprint planning",
            start,
            start + chrono::Duration::minutes(90),
            dec!(80),
        );
        entry.id = 42;

        let line = InvoiceLineItem::snapshot(9, &entry, Utc::now());
        assert_eq!(line.entry_id, 42);
        assert_eq!(line.invoice_id, 9);
        assert_eq!(line.date, date(2026, 2, 10));
        assert_eq!(line.hours, dec!(1.5));
        assert_eq!(line.rate, dec!(80));
        assert_eq!(line.amount, dec!(120));
    }

    #[test]
    fn validation_rejects_bad_periods_and_rates() {
        let mut invoice = Invoice::draft("INV-2026-001", 1, date(2026, 2, 1), date(2026, 1, 1));
        assert_eq!(
            invoice.validate(),
            Err(ValidationError::PeriodEndBeforeStart)
        );

        invoice.period_end = date(2026, 2, 28);
        invoice.tax_rate = dec!(1.5);
        assert_eq!(invoice.validate(), Err(ValidationError::TaxRateOutOfRange));

        invoice.tax_rate = dec!(1);
        assert!(invoice.validate().is_ok());

        invoice.invoice_number = " ".to_string();
        assert_eq!(
            invoice.validate(),
            Err(ValidationError::MissingInvoiceNumber)
        );
    }

    #[test]
    fn invoice_sequence_parsing_is_scoped_to_prefix_and_year() {
        assert_eq!(format_invoice_number("INV", 2026, 3), "INV-2026-003");
        assert_eq!(format_invoice_number("INV", 2026, 1234), "INV-2026-1234");
        assert_eq!(parse_invoice_sequence("INV-2026-017", "INV", 2026), Some(17));
        assert_eq!(parse_invoice_sequence("INV-2025-017", "INV", 2026), None);
        assert_eq!(parse_invoice_sequence("INV-2026-abc", "INV", 2026), None);
        assert_eq!(parse_invoice_sequence("A.B-2026-002", "A.B", 2026), Some(2));
        assert_eq!(parse_invoice_sequence("AxB-2026-002", "A.B", 2026), None);
    }
}
