//! Ledger error types.

use sms_store::StoreError;
use thiserror::Error;

/// Errors that can occur in ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Balance is lower than the requested amount. Nothing was written.
    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: u64, available: u64 },

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The acting tenant may not move credit for the target.
    #[error("Not permitted: {0}")]
    Forbidden(String),

    /// Every compare-and-swap attempt lost to a concurrent writer.
    #[error("Balance of {0} is under contention, retries exhausted")]
    Contention(String),

    /// The outbound message already has a charge in the ledger. Nothing was
    /// written.
    #[error("Message {0} is already charged")]
    AlreadyCharged(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
