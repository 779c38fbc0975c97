use crate::domain::errors::DomainError;
use std::io::{Read, Write};

/// Resolves opaque attachment references (photo URIs) to byte streams.
///
/// Calls block; callers run them on the blocking pool.
pub trait AttachmentResolver: Send + Sync {
    /// Open a readable stream for the given reference
    fn open(&self, reference: &str) -> Result<Box<dyn Read + Send>, DomainError>;
}

/// A freshly allocated destination in persistent attachment storage.
pub struct AllocatedAttachment {
    /// Reference to store on the owning record once the bytes are written
    pub reference: String,
    pub writer: Box<dyn Write + Send>,
}

/// Persistent storage for restaged attachments.
pub trait AttachmentStorage: Send + Sync {
    /// Allocate a new writable destination named after `file_name`
    fn allocate(&self, file_name: &str) -> Result<AllocatedAttachment, DomainError>;

    /// Remove an attachment that was allocated but never committed
    fn discard(&self, reference: &str);
}
