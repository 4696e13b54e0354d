use thiserror::Error;

pub type TwilightResult<T> = Result<T, TwilightError>;

#[derive(Debug, Error)]
pub enum TwilightError {
    #[error("config error: {0}")]
    Config(String),

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
