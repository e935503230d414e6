//! `castpulse-reddit` — rate-limited Reddit API access.
//!
//! # Overview
//!
//! [`RateLimiter`] coordinates the provider call budget across workers
//! through Redis, with a local token regenerator as the fallback when
//! the shared store is unreachable. [`RedditClient`] wraps the Reddit
//! OAuth API: submission fetch, raw payload fetch and full comment-tree
//! hydration, each call passing through the limiter and a bounded retry
//! policy that honours Retry-After.

pub mod client;
pub mod error;
pub mod limiter;
pub mod types;

pub use client::{RedditApi, RedditClient};
pub use error::{RedditError, Result};
pub use limiter::RateLimiter;
pub use types::{CommentPayload, Submission};
