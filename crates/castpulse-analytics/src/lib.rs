//! `castpulse-analytics` — upvote-weighted sentiment aggregation.
//!
//! The calculator is pure and unit-testable; the service loads mention
//! rows, runs it, and rewrites the thread's aggregate rows in one
//! transaction.

pub mod aggregation;
pub mod error;

pub use aggregation::{
    AggregatedMetrics, AggregationCalculator, AggregationResult, AggregationService,
    CastAggregation, MentionAggregateInput,
};
pub use error::{AnalyticsError, Result};
