// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod admin;
pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod freshness;
pub mod metrics;
pub mod notifier;
pub mod page;
pub mod poller;
pub mod reconcile;
pub mod snapshot;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::app::LiveSync;
pub use crate::config::SyncConfig;
pub use crate::error::SyncError;
pub use crate::poller::{CheckOutcome, CheckTrigger, Poller, PollerHandle};
pub use crate::snapshot::DataSnapshot;
