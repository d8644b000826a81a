use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission error: {0}")]
    Permission(String),

    #[error("Integrity mismatch: {0}")]
    IntegrityMismatch(String),

    #[error("Deserialize error: {0}")]
    Deserialize(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Transport closed: {0}")]
    TransportClosed(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for failures that should terminate the process (bad config or
    /// rejected credentials), as opposed to transient runtime errors.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Permission(_))
    }
}
