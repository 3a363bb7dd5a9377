use thiserror::Error;
use warden_ledger::LedgerError;
use warden_policy::PolicyError;

/// Result type for orchestrator internals.
pub type OrchestratorResult<T> = Result<T, WorkflowError>;

/// Failures that stop a run outright. Everything else ends in a terminal
/// request status instead.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("audit log error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("permission engine error: {0}")]
    Policy(#[from] PolicyError),
}
