use thiserror::Error;

/// Centralized error types for the application
///
/// All errors in the application are converted to this enum for consistent
/// error handling. Uses `thiserror` for automatic error conversion and
/// display formatting.
#[derive(Error, Debug)]
pub enum AppError {
    /// Login against the panel or gateway was rejected
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Remote service unreachable or timed out; treated as transient,
    /// the affected item is retried on the next scheduler tick
    #[error("Remote service unavailable: {0}")]
    RemoteUnavailable(String),

    /// Non-JSON body or a required field missing from a remote response
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Inbound, client or payment absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation attempted on a payment whose status forbids it
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Ledger write conflict or other persistence failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database connection pool errors
    #[error("Database pool error: {0}")]
    DatabasePool(#[from] r2d2::Error),

    /// Telegram API errors
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

/// Classify reqwest failures: transport problems are transient
/// (RemoteUnavailable), body-decode problems are MalformedResponse.
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AppError::MalformedResponse(err.to_string())
        } else {
            AppError::RemoteUnavailable(err.to_string())
        }
    }
}
