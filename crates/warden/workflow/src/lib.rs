//! Warden Workflow - turns a free-text request into a verified installation.
//!
//! [`WorkflowOrchestrator`] wires the classifier, permission resolver,
//! validator, installer and audit log into a single state machine. Each run
//! is independent; runs share only the read-only permission snapshot and the
//! audit log.

#![deny(unsafe_code)]

mod error;
pub mod orchestrator;

pub use error::{OrchestratorResult, WorkflowError};
pub use orchestrator::{StageLimits, WorkflowOrchestrator, ALLOWED_SAMPLE_SIZE, INSTALLER_GRACE};
