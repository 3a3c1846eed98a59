//! Prometheus exporter for Gmail label counts.
//!
//! Polls the Gmail API for per-label thread counts (and, for selected
//! labels, unread threads per sender) and exposes them as gauges:
//!
//! - `gmail_<labelId>_total` and `gmail_<labelId>_unread`
//! - `gmail_<labelId>_sender{sender="..."}`
//!
//! The HTTP side serves `/metrics`, `/readyz` and `/`. `/readyz` reports the
//! credential bootstrap: 503 with the blocking reason until authorized.

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod labels;
pub mod mail;
pub mod readiness;
pub mod refresher;
pub mod registry;
pub mod scheduler;
pub mod senders;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

pub use context::ExporterContext;
pub use error::{ExporterError, Result};
