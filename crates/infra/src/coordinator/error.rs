use thiserror::Error;

use stockroom_audit::ProjectionError;
use stockroom_auth::AuthzError;
use stockroom_core::{DomainError, KitShortage, StockShortage};

use crate::store::StoreError;

/// Failure of one coordinator call. Nothing was committed when this is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient stock: {0}")]
    InsufficientStock(StockShortage),

    #[error("kit '{kit}' is incomplete ({} component(s) short)", .shortages.len())]
    KitIncomplete {
        kit: String,
        shortages: Vec<KitShortage>,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("could not commit after {attempts} attempt(s) due to concurrent changes")]
    ConflictRetryExhausted { attempts: u32 },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A record or stock invariant would be broken; indicates a bug or corrupt data.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::NotFound(what) => EngineError::NotFound(what),
            DomainError::InsufficientStock(shortage) => EngineError::InsufficientStock(shortage),
            DomainError::KitIncomplete { kit, shortages } => EngineError::KitIncomplete { kit, shortages },
            DomainError::InvalidPayload(msg) => EngineError::InvalidPayload(msg),
            DomainError::InvariantViolation(msg) => EngineError::InvariantViolation(msg),
            DomainError::PermissionDenied(msg) => EngineError::PermissionDenied(msg),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        EngineError::Store(value)
    }
}

impl From<AuthzError> for EngineError {
    fn from(value: AuthzError) -> Self {
        DomainError::from(value).into()
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(value: validator::ValidationErrors) -> Self {
        EngineError::InvalidPayload(value.to_string())
    }
}

impl From<ProjectionError> for EngineError {
    fn from(value: ProjectionError) -> Self {
        EngineError::Store(StoreError::Corrupt(value.to_string()))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
