//! `castpulse-core` — shared foundation for the Castpulse pipeline.
//!
//! Holds the immutable configuration snapshot loaded at process start,
//! the error taxonomy shared across crates, the domain enums (thread
//! status, time windows, sentiment labels, mention methods) and the
//! process-wide Prometheus metrics registry.

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::CastpulseConfig;
pub use error::{CoreError, Result};
