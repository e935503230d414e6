use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Reddit error: {0}")]
    Reddit(#[from] castpulse_reddit::RedditError),

    #[error("Store error: {0}")]
    Store(#[from] castpulse_store::StoreError),

    #[error("Thread not found: {0}")]
    ThreadNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
