//! Error types shared by every crate in the workspace

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON or a JSON value of the wrong shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Config file could not be parsed
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Camera frame was not valid base64
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Config parsed but failed validation
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Payload decoded but does not fit the expected message schema
    #[error("schema mismatch: {0}")]
    Schema(String),
}
