//! `castpulse-ml` — entity linking and sentiment analysis.
//!
//! # Overview
//!
//! [`linker::EntityLinker`] resolves cast-member mentions in comment
//! text through three passes: word-boundary alias scanning, a
//! capitalized-span entity recognizer, and partial-ratio fuzzy
//! matching. [`sentiment::SentimentPipeline`] scores comments and
//! per-mention contexts with a primary transformer scorer, falling
//! back to a cloud opinion-mining service when confidence or margin
//! drops below the gates, and to a clause-selection heuristic for
//! multi-target comments when opinion mining has nothing to offer.

pub mod catalog;
pub mod error;
pub mod linker;
pub mod ner;
pub mod sentiment;
pub mod text;

pub use catalog::CastCatalogEntry;
pub use error::{MlError, Result};
pub use linker::{EntityLinker, MentionCandidate};
