use std::path::PathBuf;

use rust_decimal::Decimal;

use crate::config::helpers::{optional_env, parse_bool_env, parse_env, parse_string_env};
use crate::error::ConfigError;
use crate::settings::{Settings, base_dir};

/// Defaults handed to the invoice service by its callers.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub default_tax_rate: Decimal,
    pub default_due_days: i64,
    pub number_prefix: String,
    pub output_dir: PathBuf,
}

/// Issuer details printed on exported invoices.
#[derive(Debug, Clone, Default)]
pub struct IssuerConfig {
    pub name: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
}

/// Billing event journal.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub hash_chain: bool,
}

fn validate_tax_rate(rate: Decimal) -> Result<Decimal, ConfigError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(ConfigError::InvalidValue {
            key: "TALLYCLOCK_TAX_RATE".to_string(),
            message: format!("tax rate must be between 0 and 1, got {rate}"),
        });
    }
    Ok(rate)
}

/// Non-positive values fall back to 30 days.
fn normalize_due_days(days: i64) -> i64 {
    if days <= 0 { 30 } else { days }
}

fn validate_prefix(raw: &str) -> Result<String, ConfigError> {
    let prefix = raw.trim();
    if prefix.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "TALLYCLOCK_INVOICE_PREFIX".to_string(),
            message: "invoice prefix must not be empty".to_string(),
        });
    }
    if prefix.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidValue {
            key: "TALLYCLOCK_INVOICE_PREFIX".to_string(),
            message: format!("invoice prefix must not contain whitespace: '{prefix}'"),
        });
    }
    Ok(prefix.to_string())
}

impl BillingConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let invoice = &settings.invoice;
        let output_dir = match optional_env("TALLYCLOCK_INVOICE_DIR")? {
            Some(raw) => PathBuf::from(raw),
            None => invoice
                .output_dir
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(|| base_dir().join("invoices")),
        };

        Ok(Self {
            default_tax_rate: validate_tax_rate(parse_env(
                "TALLYCLOCK_TAX_RATE",
                invoice.default_tax_rate,
            )?)?,
            default_due_days: normalize_due_days(parse_env(
                "TALLYCLOCK_DUE_DAYS",
                invoice.default_due_days,
            )?),
            number_prefix: validate_prefix(&parse_string_env(
                "TALLYCLOCK_INVOICE_PREFIX",
                invoice.number_prefix.clone(),
            )?)?,
            output_dir,
        })
    }
}

impl IssuerConfig {
    pub(crate) fn resolve(settings: &Settings) -> Self {
        let issuer = &settings.issuer;
        Self {
            name: issuer.name.trim().to_string(),
            email: issuer.email.clone(),
            address: issuer.address.clone(),
            phone: issuer.phone.clone(),
        }
    }
}

impl JournalConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let journal = &settings.journal;
        let path = match optional_env("TALLYCLOCK_JOURNAL_PATH")? {
            Some(raw) => PathBuf::from(raw),
            None => journal
                .path
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(|| base_dir().join("journal.jsonl")),
        };
        Ok(Self {
            enabled: parse_bool_env("TALLYCLOCK_JOURNAL_ENABLED", journal.enabled)?,
            path,
            hash_chain: parse_bool_env("TALLYCLOCK_JOURNAL_HASH_CHAIN", journal.hash_chain)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use crate::error::ConfigError;

    #[test]
    fn tax_rate_must_be_a_fraction() {
        assert_eq!(super::validate_tax_rate(dec!(0.2)).expect("valid"), dec!(0.2));
        assert!(super::validate_tax_rate(dec!(1)).is_ok());

        let err = super::validate_tax_rate(dec!(19)).expect_err("19 is a percentage");
        let ConfigError::InvalidValue { key, message } = err else {
            panic!("expected InvalidValue");
        };
        assert_eq!(key, "TALLYCLOCK_TAX_RATE");
        assert!(message.contains("between 0 and 1"), "unexpected message: {message}");
    }

    #[test]
    fn non_positive_due_days_fall_back_to_thirty() {
        assert_eq!(super::normalize_due_days(0), 30);
        assert_eq!(super::normalize_due_days(-5), 30);
        assert_eq!(super::normalize_due_days(14), 14);
    }

    #[test]
    fn prefix_is_trimmed_and_must_be_one_token() {
        assert_eq!(super::validate_prefix(" INV ").expect("valid"), "INV");
        assert!(super::validate_prefix("   ").is_err());
        assert!(super::validate_prefix("MY INV").is_err());
    }
}
