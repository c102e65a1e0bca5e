use thiserror::Error;

/// Errors that can occur while talking to the engine
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type for engine client operations
pub type Result<T> = std::result::Result<T, LinkError>;
