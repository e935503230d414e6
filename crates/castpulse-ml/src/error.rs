use thiserror::Error;

#[derive(Debug, Error)]
pub enum MlError {
    #[error("Model error: {0}")]
    Model(String),

    #[error("Fallback service error: {0}")]
    Fallback(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MlError>;
