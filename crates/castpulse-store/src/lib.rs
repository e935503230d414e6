//! `castpulse-store` — SQLite persistence for the Castpulse pipeline.
//!
//! # Overview
//!
//! All entities live in one SQLite database behind the [`Store`]
//! handle. Schema initialisation is idempotent and safe to run on
//! every startup. Timestamps are persisted as RFC 3339 UTC text.
//!
//! # Keys
//!
//! `comments` carries composite uniqueness on `(id, created_at)` and
//! `(reddit_id, created_at)`; `mentions` references comments through a
//! composite foreign key `(comment_id, comment_created_at)` with
//! cascade delete, so re-linking a comment replaces its full mention
//! set atomically and thread deletion cascades all the way down.

pub mod aggregates;
pub mod alerts;
pub mod cast;
pub mod comments;
pub mod db;
pub mod error;
pub mod mentions;
pub mod models;
pub mod store;
pub mod threads;

pub use error::{Result, StoreError};
pub use store::Store;
