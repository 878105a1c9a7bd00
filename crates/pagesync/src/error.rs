use thiserror::Error;

/// Result type for pagesync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing documents
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Client is not joined to document: {document_id}")]
    NotJoined { document_id: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
