use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The archive is structurally incompatible: bad version, broken
    /// container, unknown section, unsafe entry.
    #[error("Archive format error: {0}")]
    ArchiveFormat(String),

    /// The archive sink or source could not be read or written.
    #[error("Archive I/O error: {0}")]
    ArchiveIo(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}
