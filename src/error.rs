use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("issue tracker responded with {status}: {message}")]
    Tracker { status: u16, message: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("render error: {0}")]
    Render(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl AppError {
    /// Auth failures end the session; everything else stays scoped to one operation.
    pub fn is_auth(&self) -> bool {
        matches!(self, AppError::Auth(_))
    }
}

pub type AppResult<T> = Result<T, AppError>;
