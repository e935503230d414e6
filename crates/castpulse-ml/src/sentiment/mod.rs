//! Two-tier sentiment scoring with deterministic, gated fallback.
//!
//! The primary scorer is a transformer behind the [`SentimentScorer`]
//! trait. Low-confidence or low-margin predictions (and primary
//! failures) fall back to a cloud opinion-mining service when enabled;
//! multi-target comments that the fallback cannot attribute go through
//! a clause-selection heuristic instead.

pub mod attenuate;
pub mod heuristics;
pub mod opinion;
pub mod pipeline;
pub mod scorer;
pub mod types;

pub use attenuate::{attenuate_score, AttenuationFlags};
pub use opinion::OpinionClient;
pub use pipeline::SentimentPipeline;
pub use scorer::{EmbeddingScorer, SentimentScorer};
pub use types::{
    FreeformAnalysis, LabelProbs, ModelSentiment, NormalizedSentiment, PrimaryPrediction,
    SentimentAnalysisResult,
};
