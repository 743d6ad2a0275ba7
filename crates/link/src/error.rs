//! Error types for the link layer

/// Result type alias
pub type Result<T> = std::result::Result<T, LinkError>;

/// Session-level failures are logged and counted in `LinkDiagnostics`
/// instead; only listener setup can fail a call.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Listen socket could not be bound or queried
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Some actuator servers could not be bound
    #[error("failed to start actuator servers: {0}")]
    Activation(String),
}
