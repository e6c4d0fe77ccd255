use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchRelayError {
    #[error("resource {0} not registered")]
    NotRegistered(String),

    #[error("resource {0} already registered")]
    AlreadyRegistered(String),

    #[error("unsupported dialect: {0}")]
    DialectUnsupported(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WatchRelayError>;

impl From<serde_json::Error> for WatchRelayError {
    fn from(err: serde_json::Error) -> Self {
        WatchRelayError::Serialization(err.to_string())
    }
}
