use thiserror::Error;

#[derive(Error, Debug)]
pub enum LendingError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Invalid state transition for {entity}: {from} -> {to}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("Borrower verification failed: {0}")]
    VerificationFailed(String),
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
    #[error("Schema error: {0}")]
    SchemaError(String),
    #[error("Broker error: {0}")]
    BrokerError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl LendingError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self::InvalidStateTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Transient failures worth redelivering. Everything else is a property of
    /// the request itself and fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable(_)
                | Self::PersistenceFailure(_)
                | Self::BrokerError(_)
                | Self::IoError(_)
                | Self::InternalError(_)
        )
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LendingError {
    fn from(err: rocksdb::Error) -> Self {
        Self::PersistenceFailure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LendingError>;
