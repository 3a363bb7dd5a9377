//! Append-only, hash-linked journal of workflow transitions.
//!
//! Each entry commits to its predecessor's hash, so any edit or deletion in
//! the middle of the journal is detectable with [`TransitionJournal::verify`].

use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use warden_types::{RequestId, RequestStatus, WorkflowStage};

const HASH_DOMAIN: &[u8] = b"warden-transition-v1:";

/// A transition to be journaled.
#[derive(Debug, Clone)]
pub struct TransitionAppend {
    pub request_id: Option<RequestId>,
    pub stage: WorkflowStage,
    pub status: Option<RequestStatus>,
    pub detail: String,
}

impl TransitionAppend {
    pub fn new(stage: WorkflowStage, detail: impl Into<String>) -> Self {
        Self {
            request_id: None,
            stage,
            status: None,
            detail: detail.into(),
        }
    }

    pub fn for_request(mut self, id: &RequestId) -> Self {
        self.request_id = Some(id.clone());
        self
    }

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// A journaled transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEntry {
    pub sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    pub stage: WorkflowStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
    pub previous_hash: Option<String>,
    pub hash: String,
}

impl TransitionEntry {
    fn compute_hash(
        sequence: u64,
        request_id: Option<&RequestId>,
        stage: WorkflowStage,
        status: Option<RequestStatus>,
        detail: &str,
        recorded_at: &DateTime<Utc>,
        previous_hash: Option<&str>,
    ) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(HASH_DOMAIN);
        hasher.update(&sequence.to_le_bytes());
        hasher.update(request_id.map(|id| id.0.as_str()).unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(stage.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(status.map(|s| s.as_str()).unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(detail.as_bytes());
        hasher.update(b"|");
        hasher.update(recorded_at.to_rfc3339().as_bytes());
        hasher.update(b"|");
        hasher.update(previous_hash.unwrap_or("").as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    fn expected_hash(&self) -> String {
        Self::compute_hash(
            self.sequence,
            self.request_id.as_ref(),
            self.stage,
            self.status,
            &self.detail,
            &self.recorded_at,
            self.previous_hash.as_deref(),
        )
    }
}

/// Outcome of a full journal check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainCheck {
    pub valid: bool,
    pub checked: usize,
    pub first_invalid: Option<u64>,
}

/// In-memory transition journal.
#[derive(Debug, Default)]
pub struct TransitionJournal {
    entries: RwLock<Vec<TransitionEntry>>,
}

impl TransitionJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one transition and return the sealed entry.
    pub fn append(&self, append: TransitionAppend) -> LedgerResult<TransitionEntry> {
        let mut entries = self.entries.write().map_err(|_| LedgerError::LockError)?;

        let sequence = entries.len() as u64;
        let previous_hash = entries.last().map(|entry| entry.hash.clone());
        let recorded_at = Utc::now();
        let hash = TransitionEntry::compute_hash(
            sequence,
            append.request_id.as_ref(),
            append.stage,
            append.status,
            &append.detail,
            &recorded_at,
            previous_hash.as_deref(),
        );

        let entry = TransitionEntry {
            sequence,
            request_id: append.request_id,
            stage: append.stage,
            status: append.status,
            detail: append.detail,
            recorded_at,
            previous_hash,
            hash,
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    pub fn len(&self) -> LedgerResult<usize> {
        Ok(self.entries.read().map_err(|_| LedgerError::LockError)?.len())
    }

    pub fn is_empty(&self) -> LedgerResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn entries(&self) -> LedgerResult<Vec<TransitionEntry>> {
        Ok(self
            .entries
            .read()
            .map_err(|_| LedgerError::LockError)?
            .clone())
    }

    /// Transitions for one request, in journal order.
    pub fn for_request(&self, id: &RequestId) -> LedgerResult<Vec<TransitionEntry>> {
        let entries = self.entries.read().map_err(|_| LedgerError::LockError)?;
        Ok(entries
            .iter()
            .filter(|entry| entry.request_id.as_ref() == Some(id))
            .cloned()
            .collect())
    }

    pub fn head(&self) -> LedgerResult<Option<String>> {
        let entries = self.entries.read().map_err(|_| LedgerError::LockError)?;
        Ok(entries.last().map(|entry| entry.hash.clone()))
    }

    /// Recompute every hash and check every link.
    pub fn verify(&self) -> LedgerResult<ChainCheck> {
        let entries = self.entries.read().map_err(|_| LedgerError::LockError)?;
        Ok(verify_chain(&entries))
    }
}

/// Check an exported journal.
pub fn verify_chain(entries: &[TransitionEntry]) -> ChainCheck {
    let mut previous: Option<&str> = None;
    for (checked, entry) in entries.iter().enumerate() {
        let linked = entry.previous_hash.as_deref() == previous;
        if !linked || entry.hash != entry.expected_hash() {
            return ChainCheck {
                valid: false,
                checked,
                first_invalid: Some(entry.sequence),
            };
        }
        previous = Some(&entry.hash);
    }

    ChainCheck {
        valid: true,
        checked: entries.len(),
        first_invalid: None,
    }
}
