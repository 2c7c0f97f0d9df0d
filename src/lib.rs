//! tallyclock: time tracking and invoicing with billing integrity.
//!
//! - [`model`]: entities, validation and derived amounts
//! - [`db`]: the persistence gateway (locking, audit, atomic batches)
//! - [`billing`]: timer and invoice lifecycles, export, event journal
//! - [`config`] / [`settings`]: TOML settings with env overrides

pub mod billing;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod settings;
