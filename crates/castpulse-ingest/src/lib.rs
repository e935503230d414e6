//! `castpulse-ingest` — thread ingestion and incremental polling.
//!
//! # Overview
//!
//! [`service::IngestionService`] pulls a submission and its comment
//! tree through the rate-limited client, archives the raw payload,
//! upserts thread and comment rows idempotently, classifies each
//! comment into its temporal window, reconciles ancestor reply counts
//! and applies the archive policy. Poll runs do the same over the
//! delta of comments newer than the last one seen.

pub mod blob;
pub mod error;
pub mod hashing;
pub mod service;
pub mod timewindow;

pub use error::{IngestError, Result};
pub use service::{IngestOutcome, IngestionService};
