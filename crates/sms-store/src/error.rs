//! Store errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// A conditional write observed a different value than expected.
    #[error("Write conflict on {0}")]
    Conflict(String),

    /// A charge linked to this outbound message is already in the ledger.
    #[error("Message {0} is already charged")]
    AlreadyCharged(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}
