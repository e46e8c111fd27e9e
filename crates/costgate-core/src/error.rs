use thiserror::Error;

/// Failure reported by the remote warehouse.
#[derive(Debug, Clone, Error)]
pub enum WarehouseError {
    /// The service rejected the query itself (syntax, unknown table, ...).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Credentials were missing, expired or lacked permission.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The request never produced a usable response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The job was accepted but failed while running.
    #[error("job failed: {0}")]
    Job(String),

    /// The response could not be decoded into a table.
    #[error("decode error: {0}")]
    Decode(String),
}

impl WarehouseError {
    /// Only query rejections are worth retrying during estimation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BadRequest(_))
    }
}

/// Canonical error type for every costgate operation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Input was rejected before any cache or remote interaction.
    #[error("validation error: {0}")]
    Validation(String),

    /// Dry-run estimation kept failing until the attempt budget ran out.
    #[error(
        "query validation failed after {attempts} attempts ({last_message}); please fix the reported problems and run again"
    )]
    EstimationFailed {
        /// Number of dry-run attempts performed.
        attempts: u32,
        /// Message returned by the last failed attempt.
        last_message: String,
    },

    /// The operator declined the cost estimate.
    #[error("aborted by user")]
    UserAborted,

    /// Remote execution or a non-retryable remote failure.
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    /// I/O error occurred during file or network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error occurred.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Creates a `Validation` variant.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True when the operator deliberately cancelled the run.
    #[must_use]
    pub fn is_user_abort(&self) -> bool {
        matches!(self, Self::UserAborted)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_eof() || err.is_syntax() || err.is_data() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Convenient result alias for costgate operations.
pub type CoreResult<T> = Result<T, CoreError>;
