use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Store error: {0}")]
    Store(#[from] castpulse_store::StoreError),

    #[error("Alert rule misconfigured: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AlertError>;
