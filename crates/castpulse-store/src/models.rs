use chrono::{DateTime, Utc};
use serde_json::Value;

use castpulse_core::types::ThreadStatus;

/// Analytic thread row, pegged to an episode's air time.
#[derive(Debug, Clone)]
pub struct Thread {
    pub id: i64,
    pub reddit_id: String,
    pub subreddit: Option<String>,
    pub title: String,
    pub url: String,
    pub air_time_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub status: ThreadStatus,
    pub total_comments: i64,
    pub synopsis: Option<String>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub latest_comment_utc: Option<DateTime<Utc>>,
    pub poll_interval_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewThread {
    pub reddit_id: String,
    pub subreddit: Option<String>,
    pub title: String,
    pub url: String,
    pub air_time_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub status: ThreadStatus,
    pub total_comments: i64,
    pub synopsis: Option<String>,
    pub poll_interval_seconds: i64,
}

/// Raw archival row for an external submission, refreshed on full ingest.
#[derive(Debug, Clone)]
pub struct RedditThreadRecord {
    pub external_id: String,
    pub subreddit: String,
    pub title: String,
    pub url: String,
    pub author: Option<String>,
    pub flair: Option<String>,
    pub score: i64,
    pub num_comments: i64,
    pub is_archived: bool,
    pub created_utc: DateTime<Utc>,
    pub raw_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Comment {
    pub id: i64,
    pub thread_id: i64,
    pub reddit_id: String,
    pub author_hash: Option<String>,
    pub body: String,
    pub created_utc: DateTime<Utc>,
    pub score: i64,
    pub parent_reddit_id: Option<String>,
    pub reply_count: i64,
    pub time_window: Option<String>,
    pub sentiment_label: Option<String>,
    pub sentiment_score: Option<f64>,
    pub sentiment_breakdown: Option<Value>,
    pub sarcasm_confidence: Option<f64>,
    pub is_sarcastic: bool,
    pub toxicity_confidence: Option<f64>,
    pub is_toxic: bool,
    pub ml_model_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub thread_id: i64,
    pub reddit_id: String,
    pub author_hash: Option<String>,
    pub body: String,
    pub created_utc: DateTime<Utc>,
    pub score: i64,
    pub parent_reddit_id: Option<String>,
    pub time_window: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CastMember {
    pub id: i64,
    pub slug: String,
    pub full_name: String,
    pub display_name: Option<String>,
    pub show: String,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct Mention {
    pub id: i64,
    pub comment_id: i64,
    pub comment_created_at: DateTime<Utc>,
    pub cast_member_id: i64,
    pub sentiment_label: String,
    pub sentiment_score: Option<f64>,
    pub confidence: Option<f64>,
    pub weight: Option<f64>,
    pub method: Option<String>,
    pub quote: Option<String>,
    pub is_sarcastic: bool,
    pub is_toxic: bool,
}

#[derive(Debug, Clone)]
pub struct NewMention {
    pub comment_id: i64,
    pub comment_created_at: DateTime<Utc>,
    pub cast_member_id: i64,
    pub sentiment_label: String,
    pub sentiment_score: Option<f64>,
    pub confidence: Option<f64>,
    pub weight: Option<f64>,
    pub method: Option<String>,
    pub quote: Option<String>,
    pub is_sarcastic: bool,
    pub is_toxic: bool,
}

/// Flattened mention row fed to the aggregator: the join of a mention,
/// its comment's score and window, restricted to active cast members.
#[derive(Debug, Clone)]
pub struct ThreadMentionRow {
    pub cast_member_id: i64,
    pub sentiment_label: Option<String>,
    pub comment_score: i64,
    pub time_window: Option<String>,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct AggregateRow {
    pub thread_id: i64,
    pub cast_member_id: i64,
    pub time_window: String,
    pub net_sentiment: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub positive_pct: f64,
    pub neutral_pct: f64,
    pub negative_pct: f64,
    pub agreement_score: f64,
    pub mention_count: i64,
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    pub id: i64,
    pub thread_id: i64,
    pub cast_member_id: i64,
    pub time_window: String,
    pub net_sentiment: Option<f64>,
    pub ci_lower: Option<f64>,
    pub ci_upper: Option<f64>,
    pub positive_pct: Option<f64>,
    pub neutral_pct: Option<f64>,
    pub negative_pct: Option<f64>,
    pub agreement_score: Option<f64>,
    pub mention_count: i64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AlertRule {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub thread_id: Option<i64>,
    pub cast_member_id: Option<i64>,
    pub rule_type: String,
    pub condition: Value,
    pub is_active: bool,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewAlertRule {
    pub name: String,
    pub description: Option<String>,
    pub thread_id: Option<i64>,
    pub cast_member_id: Option<i64>,
    pub rule_type: String,
    pub condition: Value,
    pub is_active: bool,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub id: i64,
    pub alert_rule_id: i64,
    pub thread_id: i64,
    pub cast_member_id: Option<i64>,
    pub triggered_at: DateTime<Utc>,
    pub payload: Value,
    pub delivered_channels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewAlertEvent {
    pub alert_rule_id: i64,
    pub thread_id: i64,
    pub cast_member_id: Option<i64>,
    pub payload: Value,
}
