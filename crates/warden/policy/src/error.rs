use thiserror::Error;
use warden_types::RoleId;

/// Result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Policy-related errors
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Unknown role: {0}")]
    UnknownRole(RoleId),

    #[error("Duplicate role definition: {0}")]
    DuplicateRole(RoleId),

    #[error("Role {role} references missing parent {parent}")]
    DanglingParent { role: RoleId, parent: RoleId },

    #[error("Role hierarchy contains a cycle through {0}")]
    Cycle(RoleId),

    #[error("Grant source failed: {0}")]
    Source(String),

    #[error("Lock error")]
    LockError,
}
