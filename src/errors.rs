use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Connection, timeout or reset before a usable response arrived.
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered, but not with a usable 2xx body.
    #[error("API Error: {code} - {message}")]
    Remote { code: u16, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl AppError {
    pub fn remote(code: u16, message: impl Into<String>) -> Self {
        AppError::Remote {
            code,
            message: message.into(),
        }
    }

    /// True for failures that never reached the backend.
    pub fn is_transport(&self) -> bool {
        matches!(self, AppError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
