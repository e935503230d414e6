use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedditError {
    #[error("Rate limited by Reddit, retry after {retry_after_secs:.2}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("Reddit API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, RedditError>;
