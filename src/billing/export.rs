//! Plain-text invoice export.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tera::Context;

use crate::config::IssuerConfig;
use crate::error::ExportError;
use crate::model::{Client, Invoice, InvoiceLineItem};

const INVOICE_TEMPLATE: &str = include_str!("templates/invoice.txt.tera");
const DESCRIPTION_WIDTH: usize = 36;
const RULE_WIDTH: usize = 76;

fn money(value: Decimal) -> String {
    format!("{value:.2}")
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn line_row(item: &InvoiceLineItem) -> String {
    format!(
        "{:<10}  {:<width$}  {:>6}  {:>8}  {:>8}",
        item.date.format("%Y-%m-%d").to_string(),
        truncate(&item.description, DESCRIPTION_WIDTH),
        money(item.hours),
        money(item.rate),
        money(item.amount),
        width = DESCRIPTION_WIDTH,
    )
}

fn summary_row(label: &str, value: Decimal) -> String {
    format!("{:>width$}  {:>8}", label, money(value), width = RULE_WIDTH - 10)
}

pub fn build_context(
    invoice: &Invoice,
    client: &Client,
    line_items: &[InvoiceLineItem],
    issuer: &IssuerConfig,
    issued_on: NaiveDate,
) -> serde_json::Value {
    let header = format!(
        "{:<10}  {:<width$}  {:>6}  {:>8}  {:>8}",
        "Date",
        "Description",
        "Hours",
        "Rate",
        "Amount",
        width = DESCRIPTION_WIDTH,
    );
    let tax_label = format!("Tax ({}%):", (invoice.tax_rate * Decimal::ONE_HUNDRED).normalize());

    serde_json::json!({
        "issued_on": issued_on.to_string(),
        "rule": "-".repeat(RULE_WIDTH),
        "header": header,
        "invoice": {
            "number": invoice.invoice_number,
            "status": invoice.status.as_str(),
            "period_start": invoice.period_start.to_string(),
            "period_end": invoice.period_end.to_string(),
            "due_date": invoice
                .due_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "on receipt".to_string()),
        },
        "issuer": {
            "name": issuer.name,
            "email": issuer.email,
            "address": issuer.address,
            "phone": issuer.phone,
        },
        "client": {
            "name": client.name,
            "email": client.email,
        },
        "lines": line_items.iter().map(line_row).collect::<Vec<_>>(),
        "subtotal_line": summary_row("Subtotal:", invoice.subtotal),
        "tax_line": summary_row(&tax_label, invoice.tax_amount),
        "total_line": summary_row("Total:", invoice.total),
    })
}

pub fn render_invoice_text(
    invoice: &Invoice,
    client: &Client,
    line_items: &[InvoiceLineItem],
    issuer: &IssuerConfig,
    issued_on: NaiveDate,
) -> Result<String, ExportError> {
    let context = build_context(invoice, client, line_items, issuer, issued_on);
    let tera_context = Context::from_value(context).map_err(|e| ExportError::Render(e.to_string()))?;
    tera::Tera::one_off(INVOICE_TEMPLATE, &tera_context, false)
        .map_err(|e| ExportError::Render(e.to_string()))
}

/// Writes `<dir>/<invoice_number>.txt` and returns its path.
pub fn write_invoice_text(
    dir: &Path,
    invoice_number: &str,
    text: &str,
) -> Result<PathBuf, ExportError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{invoice_number}.txt"));
    std::fs::write(&path, text)?;
    tracing::info!(path = %path.display(), "Wrote invoice");
    Ok(path)
}
