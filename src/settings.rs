//! User settings persisted as TOML.
//!
//! `Settings` is the on-disk shape; [`crate::config::Config`] resolves it
//! against environment overrides into validated runtime config.

use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const APP_DIR: &str = "tallyclock";

/// Directory holding settings, the database and the journal by default.
pub fn base_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub invoice: InvoiceSettings,
    pub issuer: IssuerSettings,
    pub journal: JournalSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceSettings {
    pub default_tax_rate: Decimal,
    pub default_due_days: i64,
    pub number_prefix: String,
    pub output_dir: Option<String>,
}

impl Default for InvoiceSettings {
    fn default() -> Self {
        Self {
            default_tax_rate: Decimal::ZERO,
            default_due_days: 30,
            number_prefix: "INV".to_string(),
            output_dir: None,
        }
    }
}

/// The "From" block printed on exported invoices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerSettings {
    pub name: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalSettings {
    pub enabled: bool,
    pub path: Option<String>,
    pub hash_chain: bool,
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            hash_chain: true,
        }
    }
}

impl Settings {
    pub fn default_path() -> PathBuf {
        base_dir().join("settings.toml")
    }

    /// Load settings from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        toml::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(format!("failed to serialize settings: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}
