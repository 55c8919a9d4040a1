use thiserror::Error;

use crate::api::codes::ServerError;

/// Message used when nothing better can be extracted from an error.
pub const DEFAULT_ERROR_MESSAGE: &str = "Unknown error, please try again later";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    Server(ServerError),

    #[error("user reject sign")]
    UserRejected,

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Timed out waiting for in-flight request {key}")]
    PendingTimeout { key: String },

    #[error("Request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Cached value for {key} has a different type")]
    CacheTypeMismatch { key: String },

    #[error("Operation error: {0}")]
    Operation(String),

    #[error("Initialization error: {0}")]
    Init(String),
}

impl AppError {
    /// True when the server rejected the bearer token and a fresh login is needed.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, AppError::Server(e) if e.code.requires_reauth())
    }

    /// False for failures another attempt cannot fix: a declined or failed
    /// signature, or a session the server still rejects after re-login.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AppError::UserRejected | AppError::Signer(_) | AppError::CacheTypeMismatch { .. }
        ) && !self.requires_reauth()
    }
}

/// Best-effort human readable message for an error, for notifications and inline display.
pub fn parse_error(err: &AppError) -> String {
    let msg = match err {
        AppError::Server(e) => e.message.clone(),
        AppError::Http(e) if e.is_timeout() => "Request timed out".to_string(),
        AppError::Http(e) if e.is_connect() => "Network connection failed".to_string(),
        other => other.to_string(),
    };

    if msg.trim().is_empty() {
        DEFAULT_ERROR_MESSAGE.to_string()
    } else {
        msg
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
