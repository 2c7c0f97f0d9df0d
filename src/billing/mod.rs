//! Billing services built on the persistence gateway.
//!
//! Both services take their gateway (and optional journal) by constructor;
//! nothing here holds global state.

pub mod export;
pub mod invoice;
pub mod journal;
pub mod timer;

pub use invoice::{InvoiceDefaults, InvoiceService};
pub use journal::EventJournal;
pub use timer::TimerService;
