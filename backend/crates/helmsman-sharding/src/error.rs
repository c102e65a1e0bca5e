use helmsman_link::LinkError;
use thiserror::Error;

/// Errors that can occur in sharding orchestration operations
#[derive(Error, Debug)]
pub enum ShardingError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Trying to initialize while already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("ID generation error: {0}")]
    Id(String),

    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Result type for sharding orchestration operations
pub type Result<T> = std::result::Result<T, ShardingError>;
