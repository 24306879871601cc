// === Public Modules (The Canonical Paths) ===
pub mod accountant;
pub mod api;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod fees;
pub mod ledger;
pub mod margin;
pub mod notify;
pub mod peer;
pub mod posting;
pub mod store;

// === Private Implementation Details ===
mod macros;

// === Facades (Re-exporting the service surface) ===
pub use crate::accountant::{Accountant, MarginSummary, Services};
pub use crate::config::AccountantConfig;
pub use crate::error::{BursarError, BursarResult};
