use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Store error: {0}")]
    Store(#[from] castpulse_store::StoreError),
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
