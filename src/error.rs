use thiserror::Error;

/// Type alias for Result with ExporterError
pub type Result<T> = std::result::Result<T, ExporterError>;

#[derive(Error, Debug)]
pub enum ExporterError {
    /// Gmail API returned a non-success status
    #[error("Gmail API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Resource not found (404), e.g. a label deleted after startup
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authorization failed or credentials are unusable
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The token endpoint would not refresh the access token
    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metric error: {0}")]
    Metric(String),

    /// Label discovery returned nothing to monitor
    #[error("No labels found")]
    NoLabels,
}

impl ExporterError {
    /// Errors that must terminate the process rather than be logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExporterError::NoLabels | ExporterError::Auth(_) | ExporterError::Config(_)
        )
    }
}
