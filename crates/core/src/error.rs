//! Centralized error types for the Tally workspace.

use thiserror::Error;

/// Top-level error enum. Variants map to the error taxonomy of a run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TallyError {
    /// Chain read failed (sequence number, balance, contract read).
    #[error("Provider error: {0}")]
    Provider(String),

    /// Signing, transport, or chain rejection while submitting an operation.
    #[error("Submission error: {0}")]
    Submission(String),

    /// Nonce cache or report could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A post-confirmation state query failed.
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type TallyResult<T> = Result<T, TallyError>;
