use crate::credentials::Field;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing required field: {0}")]
    InvalidInput(Field),

    #[error("Connection error: {0}")]
    Connection(#[from] tungstenite::Error),

    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Code entry aborted")]
    CodeEntryAborted,

    #[error("Cancelled")]
    Cancelled,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Backend rejected the run: {0}")]
    Rejected(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Transport-level failure (could not connect, or the link dropped).
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::ConnectTimeout(_) | Self::Http(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
