use thiserror::Error;

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("not initialized: run 'courier init'")]
    NotInitialized,

    #[error("invalid action payload: {0}")]
    InvalidPayload(String),

    #[error("invalid situation '{0}'")]
    InvalidSituation(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CourierError>;
