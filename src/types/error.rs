//! Error types for mongo-boiler
//!
//! Driver failures are carried as the error source untouched; the wrapper only
//! records which kind of operation produced them.

/// Failure reported by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Error returned by the MongoDB driver
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),

    /// Error raised by a non-driver backend (e.g. the in-memory store)
    #[error("{0}")]
    Backend(String),
}

impl DriverError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Main error type for mongo-boiler operations
#[derive(Debug, thiserror::Error)]
pub enum BoilerError {
    #[error("Not found: no document in {namespace} matched the filter")]
    NotFound { namespace: String },

    #[error("Decode error: {0}")]
    Decode(#[from] bson::de::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] bson::ser::Error),

    #[error("Query failed: {0}")]
    Query(#[source] DriverError),

    #[error("Cursor error: {0}")]
    Cursor(#[source] DriverError),

    #[error("Write failed: {0}")]
    Write(#[source] DriverError),

    #[error("Drop failed: {0}")]
    Drop(#[source] DriverError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BoilerError {
    /// The driver error behind this failure, if any.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Query(e) | Self::Cursor(e) | Self::Write(e) | Self::Drop(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for failures caused by the execution context rather than the store.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Result type alias for mongo-boiler operations
pub type Result<T> = std::result::Result<T, BoilerError>;
