//! Runtime configuration.
//!
//! Resolved once at startup from [`Settings`] plus `TALLYCLOCK_*` environment
//! overrides. The billing services never read configuration; callers pass
//! the resolved values in.

mod billing;
pub(crate) mod helpers;

use std::path::PathBuf;

pub use billing::{BillingConfig, IssuerConfig, JournalConfig};

use crate::config::helpers::optional_env;
use crate::error::ConfigError;
use crate::settings::{Settings, base_dir};

/// Default location of the libSQL database file.
pub fn default_db_path() -> PathBuf {
    base_dir().join("tallyclock.db")
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl DatabaseConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let path = match optional_env("TALLYCLOCK_DB_PATH")? {
            Some(raw) => PathBuf::from(raw),
            None => settings
                .database
                .path
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(default_db_path),
        };
        Ok(Self { path })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub billing: BillingConfig,
    pub issuer: IssuerConfig,
    pub journal: JournalConfig,
}

impl Config {
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::resolve(settings)?,
            billing: BillingConfig::resolve(settings)?,
            issuer: IssuerConfig::resolve(settings),
            journal: JournalConfig::resolve(settings)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rust_decimal_macros::dec;

    use crate::settings::Settings;

    #[test]
    fn resolve_honors_settings_values() {
        let mut settings = Settings::default();
        settings.database.path = Some("/tmp/tallyclock-test.db".to_string());
        settings.invoice.default_tax_rate = dec!(0.07);
        settings.invoice.default_due_days = 14;
        settings.issuer.name = "  Jo Doe ".to_string();

        let config = super::Config::resolve(&settings).expect("config");
        assert_eq!(config.database.path, PathBuf::from("/tmp/tallyclock-test.db"));
        assert_eq!(config.billing.default_tax_rate, dec!(0.07));
        assert_eq!(config.billing.default_due_days, 14);
        assert_eq!(config.billing.number_prefix, "INV");
        assert_eq!(config.issuer.name, "Jo Doe");
        assert!(config.journal.hash_chain);
    }

    #[test]
    fn resolve_rejects_out_of_range_tax_rate_from_settings() {
        let mut settings = Settings::default();
        settings.invoice.default_tax_rate = dec!(-0.1);
        assert!(super::Config::resolve(&settings).is_err());
    }
}
