use thiserror::Error;

use crate::domain::errors::DomainError;

#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Archive error: {0}")]
    ArchiveError(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl From<DomainError> for ApplicationError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::NotFound(msg) => ApplicationError::NotFound(msg),
            DomainError::InvalidData(msg) => ApplicationError::ValidationError(msg),
            DomainError::ArchiveFormat(msg) | DomainError::ArchiveIo(msg) => {
                ApplicationError::ArchiveError(msg)
            }
            DomainError::Storage(msg) => ApplicationError::StorageError(msg),
            DomainError::InternalError(msg) => ApplicationError::InternalError(msg),
        }
    }
}
