use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8700;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Poll intervals below this are clamped up before scheduling.
pub const MIN_POLL_INTERVAL_SECS: u64 = 30;

/// Top-level config (castpulse.toml + CASTPULSE_* env overrides).
///
/// Loaded once at worker start and passed around as an immutable
/// snapshot; nothing re-reads the environment after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastpulseConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub reddit: RedditConfig,
    /// Raw-payload archive. Absent = archival disabled (logged, not fatal).
    #[serde(default)]
    pub blob: Option<BlobConfig>,
    #[serde(default)]
    pub sentiment: SentimentConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub operational: OperationalConfig,
}

impl Default for CastpulseConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            reddit: RedditConfig::default(),
            blob: None,
            sentiment: SentimentConfig::default(),
            notifications: NotificationsConfig::default(),
            queue: QueueConfig::default(),
            operational: OperationalConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            max_connections: default_redis_max_connections(),
        }
    }
}

/// Reddit OAuth2 script-app credentials plus the provider rate budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Calls allowed per window.
    #[serde(default = "default_rate_limit_calls")]
    pub rate_limit_calls: u32,
    /// Window length in seconds.
    #[serde(default = "default_rate_limit_period")]
    pub rate_limit_period: u32,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: default_user_agent(),
            username: String::new(),
            password: String::new(),
            rate_limit_calls: default_rate_limit_calls(),
            rate_limit_period: default_rate_limit_period(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    pub account: String,
    pub access_key: String,
    pub container: String,
    /// Prefix prepended to every object key.
    #[serde(default = "default_raw_prefix")]
    pub raw_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentConfig {
    #[serde(default = "default_primary_model")]
    pub primary_model: String,
    /// Human-readable label for the opinion-mining fallback, used in
    /// audit trails and reasoning strings.
    #[serde(default = "default_fallback_service")]
    pub fallback_service: String,
    /// REST endpoint of the opinion-mining fallback. Absent disables it
    /// regardless of `fallback_enabled`.
    pub fallback_endpoint: Option<String>,
    pub fallback_key: Option<String>,
    #[serde(default = "bool_true")]
    pub fallback_enabled: bool,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Floor applied as max(configured, 0.55) at pipeline construction.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Floor applied as max(configured, 0.10) at pipeline construction.
    #[serde(default = "default_min_margin")]
    pub min_margin: f64,
    #[serde(default = "default_sarcasm_threshold")]
    pub sarcasm_threshold: f64,
    #[serde(default = "default_toxicity_threshold")]
    pub toxicity_threshold: f64,
    /// Version stamp written to classified comments (truncated to 32).
    #[serde(default = "default_model_version")]
    pub model_version: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            primary_model: default_primary_model(),
            fallback_service: default_fallback_service(),
            fallback_endpoint: None,
            fallback_key: None,
            fallback_enabled: true,
            confidence_threshold: default_confidence_threshold(),
            min_confidence: default_min_confidence(),
            min_margin: default_min_margin(),
            sarcasm_threshold: default_sarcasm_threshold(),
            toxicity_threshold: default_toxicity_threshold(),
            model_version: default_model_version(),
            batch_size: default_batch_size(),
        }
    }
}

/// Outbound alert channels. Any unset field disables that channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub slack_webhook_url: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from_email: Option<String>,
    pub from_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Wall-clock limit per task execution, seconds.
    #[serde(default = "default_task_time_limit")]
    pub task_time_limit_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base for the exponential retry backoff, seconds.
    #[serde(default = "default_retry_base")]
    pub retry_base_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            task_time_limit_secs: default_task_time_limit(),
            max_retries: default_max_retries(),
            retry_base_secs: default_retry_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationalConfig {
    /// Primary broadcast timezone (IANA name).
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Salt for author-hash pseudonymization. Empty disables hashing.
    #[serde(default)]
    pub author_hash_salt: String,
    #[serde(default)]
    pub auto_archive: bool,
    #[serde(default = "default_archive_idle_minutes")]
    pub archive_idle_minutes: i64,
    /// Optional directory of roster JSON files contributing extra aliases.
    pub roster_dir: Option<String>,
}

impl Default for OperationalConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            author_hash_salt: String::new(),
            auto_archive: false,
            archive_idle_minutes: default_archive_idle_minutes(),
            roster_dir: None,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.castpulse/castpulse.db", home)
}
fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}
fn default_redis_max_connections() -> u32 {
    50
}
fn default_user_agent() -> String {
    "castpulse/0.4 (by u/castpulse)".to_string()
}
fn default_rate_limit_calls() -> u32 {
    100
}
fn default_rate_limit_period() -> u32 {
    60
}
fn default_raw_prefix() -> String {
    "raw".to_string()
}
fn default_primary_model() -> String {
    "bge-small-en-v1.5".to_string()
}
fn default_fallback_service() -> String {
    "opinion-mining".to_string()
}
fn default_confidence_threshold() -> f64 {
    0.75
}
fn default_min_confidence() -> f64 {
    0.55
}
fn default_min_margin() -> f64 {
    0.10
}
fn default_sarcasm_threshold() -> f64 {
    0.6
}
fn default_toxicity_threshold() -> f64 {
    0.7
}
fn default_model_version() -> String {
    "unknown".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_task_time_limit() -> u64 {
    1800
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_base() -> u64 {
    2
}
fn default_timezone() -> String {
    "America/New_York".to_string()
}
fn default_archive_idle_minutes() -> i64 {
    180
}

impl CastpulseConfig {
    /// Load config from a TOML file with CASTPULSE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.castpulse/castpulse.toml
    ///
    /// Env keys use double underscores for nesting, e.g.
    /// `CASTPULSE_REDDIT__CLIENT_ID`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CastpulseConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CASTPULSE_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.castpulse/castpulse.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CastpulseConfig::default();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.reddit.rate_limit_calls, 100);
        assert_eq!(config.reddit.rate_limit_period, 60);
        assert!(config.sentiment.fallback_enabled);
        assert!(config.blob.is_none());
        assert_eq!(config.operational.timezone, "America/New_York");
        assert!(!config.operational.auto_archive);
    }

    #[test]
    fn sentiment_thresholds_default_to_spec_floors() {
        let sentiment = SentimentConfig::default();
        assert_eq!(sentiment.min_confidence, 0.55);
        assert_eq!(sentiment.min_margin, 0.10);
        assert_eq!(sentiment.sarcasm_threshold, 0.6);
        assert_eq!(sentiment.toxicity_threshold, 0.7);
    }
}
