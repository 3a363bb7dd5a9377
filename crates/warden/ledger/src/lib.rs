//! Warden Ledger - the audit trail of installation requests.
//!
//! Two pieces work together:
//! - a [`RequestStore`] holding one mutable record per request until it
//!   reaches a terminal status, in memory or in SQLite,
//! - a [`TransitionJournal`] recording every workflow stage entered, hash
//!   linked so the history cannot be rewritten silently.
//!
//! [`AuditLog`] bundles both behind the calls the orchestrator makes.

#![deny(unsafe_code)]

mod error;
pub mod journal;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;

pub use error::{LedgerError, LedgerResult};
pub use journal::{verify_chain, ChainCheck, TransitionAppend, TransitionEntry, TransitionJournal};
pub use store::{InMemoryRequestStore, NewRequest, RequestStatistics, RequestStore, RequestUpdate};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRequestStore;

use std::sync::Arc;
use warden_types::{InstallationRequest, RequestId, WorkflowStage};

/// Request store plus transition journal.
pub struct AuditLog {
    store: Arc<dyn RequestStore>,
    journal: TransitionJournal,
}

impl AuditLog {
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self {
            store,
            journal: TransitionJournal::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRequestStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }

    pub fn journal(&self) -> &TransitionJournal {
        &self.journal
    }

    /// Journal a stage that has no stored record yet.
    pub fn note(&self, stage: WorkflowStage, detail: impl Into<String>) -> LedgerResult<()> {
        self.journal.append(TransitionAppend::new(stage, detail))?;
        Ok(())
    }

    /// Create the pending record and journal it.
    pub async fn open(&self, request: NewRequest) -> LedgerResult<RequestId> {
        let detail = format!(
            "{} requested {} as {}",
            request.requester, request.package_name, request.role
        );
        let id = self.store.create_request(request).await?;
        self.journal.append(
            TransitionAppend::new(WorkflowStage::Logged, detail)
                .for_request(&id)
                .with_status(warden_types::RequestStatus::Pending),
        )?;
        tracing::info!(request_id = %id, "Installation request recorded");
        Ok(id)
    }

    /// Apply an update to the record and journal the stage it belongs to.
    ///
    /// The journal entry is written only after the store accepted the update.
    pub async fn transition(
        &self,
        id: &RequestId,
        stage: WorkflowStage,
        update: RequestUpdate,
        detail: impl Into<String>,
    ) -> LedgerResult<InstallationRequest> {
        let status = update.status;
        let record = self.store.update_request(id, update).await?;

        let mut append = TransitionAppend::new(stage, detail).for_request(id);
        if let Some(status) = status {
            append = append.with_status(status);
        }
        self.journal.append(append)?;

        tracing::debug!(request_id = %id, stage = %stage, status = %record.status, "Request transitioned");
        Ok(record)
    }

    /// Update the record without entering a new stage, e.g. to mark an
    /// activity as started. Nothing is journaled.
    pub async fn update(
        &self,
        id: &RequestId,
        update: RequestUpdate,
    ) -> LedgerResult<InstallationRequest> {
        self.store.update_request(id, update).await
    }

    /// Journal a stage that does not change the stored record.
    pub fn mark(
        &self,
        id: &RequestId,
        stage: WorkflowStage,
        detail: impl Into<String>,
    ) -> LedgerResult<()> {
        self.journal
            .append(TransitionAppend::new(stage, detail).for_request(id))?;
        Ok(())
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}
