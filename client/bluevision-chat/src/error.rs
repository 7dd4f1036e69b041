use std::time::Duration;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Transport-level failures reported by a backend gateway
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed backend response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Unavailable(e.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Decode(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        GatewayError::Unavailable(format!("realtime socket: {e}"))
    }
}

impl GatewayError {
    /// Maps an HTTP status code and body to the gateway taxonomy
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => GatewayError::Unauthorized,
            404 => GatewayError::NotFound,
            409 => GatewayError::Conflict(body),
            500..=599 => GatewayError::Unavailable(format!("status {status}: {body}")),
            _ => GatewayError::Rejected { status, body },
        }
    }
}

/// Errors surfaced by the session, directory and feed controllers
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no signed-in identity")]
    SignedOut,

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("realtime subscription lost: {0}")]
    SubscriptionLost(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

impl AppError {
    /// Returns whether the user can retry the operation that produced this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::BackendUnavailable(_)
                | AppError::FetchFailed(_)
                | AppError::SendFailed(_)
                | AppError::SubscriptionLost(_)
        )
    }

    pub fn backend(e: GatewayError) -> Self {
        match e {
            GatewayError::Unauthorized => AppError::SignedOut,
            GatewayError::Conflict(reason) => AppError::AlreadyExists(reason),
            other => AppError::BackendUnavailable(other.to_string()),
        }
    }

    pub fn fetch(e: GatewayError) -> Self {
        AppError::FetchFailed(e.to_string())
    }

    pub fn send(e: GatewayError) -> Self {
        AppError::SendFailed(e.to_string())
    }
}
