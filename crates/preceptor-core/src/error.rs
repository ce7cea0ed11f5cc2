use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreceptorError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session busy: {0}")]
    SessionBusy(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Token error: {0}")]
    Token(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PreceptorError>;
