use thiserror::Error;
use warden_types::{RequestId, RequestStatus};

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Request not found: {0}")]
    NotFound(RequestId),

    #[error("Request {id} is already {status}; terminal records are immutable")]
    TerminalState { id: RequestId, status: RequestStatus },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Lock error")]
    LockError,
}
