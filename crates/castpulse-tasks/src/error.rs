use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store error: {0}")]
    Store(#[from] castpulse_store::StoreError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] castpulse_ingest::IngestError),

    #[error("Analytics error: {0}")]
    Analytics(#[from] castpulse_analytics::AnalyticsError),

    #[error("Alert error: {0}")]
    Alert(#[from] castpulse_alerts::AlertError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Invalid task args for {task}: {reason}")]
    InvalidArgs { task: String, reason: String },

    #[error("Task timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

pub type Result<T> = std::result::Result<T, TaskError>;
