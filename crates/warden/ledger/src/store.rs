//! Request lifecycle persistence.

use crate::error::{LedgerError, LedgerResult};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use warden_types::{InstallationRequest, RequestId, RequesterId, RequestStatus, RoleId};

/// Fields supplied when a request is first recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRequest {
    pub requester: RequesterId,
    pub role: RoleId,
    pub package_name: String,
    pub requested_version: Option<String>,
}

/// Partial update applied to a stored request. Unset fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestUpdate {
    pub status: Option<RequestStatus>,
    pub error_detail: Option<String>,
    pub raw_output: Option<String>,
    pub installed_version: Option<String>,
    pub verified: Option<bool>,
}

impl RequestUpdate {
    pub fn status(status: RequestStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.raw_output = Some(output.into());
        self
    }

    pub fn with_installed_version(mut self, version: impl Into<String>) -> Self {
        self.installed_version = Some(version.into());
        self
    }

    pub fn with_verified(mut self, verified: bool) -> Self {
        self.verified = Some(verified);
        self
    }

    fn apply(self, record: &mut InstallationRequest) {
        let now = Utc::now();
        if let Some(status) = self.status {
            record.status = status;
            if status.is_terminal() {
                record.completed_at = Some(now);
            }
        }
        if let Some(detail) = self.error_detail {
            record.error_detail = Some(detail);
        }
        if let Some(output) = self.raw_output {
            record.raw_output = Some(output);
        }
        if let Some(version) = self.installed_version {
            record.installed_version = Some(version);
        }
        if let Some(verified) = self.verified {
            record.verified = verified;
        }
        record.updated_at = now;
    }
}

/// Aggregate counts over stored requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestStatistics {
    pub total: usize,
    pub completed: usize,
    pub denied: usize,
    pub failed: usize,
    pub in_progress: usize,
    /// Completed share of all terminal requests, in `[0, 1]`.
    pub success_rate: f64,
}

/// Storage backend for request records.
///
/// Implementations must serialize updates per record and reject any update
/// to a record that has reached a terminal status. A write is durable once
/// the call returns: `create_request` returning an id means the pending
/// record will survive a restart of a durable backend, and the workflow does
/// not move past `Logged` before that. [`InMemoryRequestStore`] is the
/// exception and only suits tests and one-shot runs.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn create_request(&self, request: NewRequest) -> LedgerResult<RequestId>;

    async fn update_request(
        &self,
        id: &RequestId,
        update: RequestUpdate,
    ) -> LedgerResult<InstallationRequest>;

    async fn get(&self, id: &RequestId) -> LedgerResult<InstallationRequest>;

    /// Most recent first.
    async fn list_by_requester(
        &self,
        requester: &RequesterId,
        limit: usize,
    ) -> LedgerResult<Vec<InstallationRequest>>;

    /// Most recent first.
    async fn list(&self, limit: usize) -> LedgerResult<Vec<InstallationRequest>>;

    async fn statistics(&self) -> LedgerResult<RequestStatistics>;
}

#[derive(Debug, Clone)]
struct Stored {
    seq: u64,
    record: InstallationRequest,
}

/// In-memory request store.
#[derive(Debug, Default)]
pub struct InMemoryRequestStore {
    records: DashMap<RequestId, Stored>,
    next_seq: AtomicU64,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn newest_first<F>(&self, limit: usize, keep: F) -> Vec<InstallationRequest>
    where
        F: Fn(&InstallationRequest) -> bool,
    {
        let mut matching: Vec<Stored> = self
            .records
            .iter()
            .filter(|entry| keep(&entry.value().record))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| b.seq.cmp(&a.seq));
        matching
            .into_iter()
            .take(limit)
            .map(|stored| stored.record)
            .collect()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn create_request(&self, request: NewRequest) -> LedgerResult<RequestId> {
        let id = RequestId::generate();
        let now = Utc::now();
        let record = InstallationRequest {
            request_id: id.clone(),
            requester: request.requester,
            role: request.role,
            package_name: request.package_name,
            requested_version: request.requested_version,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_detail: None,
            raw_output: None,
            installed_version: None,
            verified: false,
        };

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.records.insert(id.clone(), Stored { seq, record });
        Ok(id)
    }

    async fn update_request(
        &self,
        id: &RequestId,
        update: RequestUpdate,
    ) -> LedgerResult<InstallationRequest> {
        // The shard guard serializes concurrent updates to the same record.
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| LedgerError::NotFound(id.clone()))?;

        let record = &mut entry.value_mut().record;
        if record.status.is_terminal() {
            return Err(LedgerError::TerminalState {
                id: id.clone(),
                status: record.status,
            });
        }

        update.apply(record);
        Ok(record.clone())
    }

    async fn get(&self, id: &RequestId) -> LedgerResult<InstallationRequest> {
        self.records
            .get(id)
            .map(|entry| entry.value().record.clone())
            .ok_or_else(|| LedgerError::NotFound(id.clone()))
    }

    async fn list_by_requester(
        &self,
        requester: &RequesterId,
        limit: usize,
    ) -> LedgerResult<Vec<InstallationRequest>> {
        Ok(self.newest_first(limit, |record| &record.requester == requester))
    }

    async fn list(&self, limit: usize) -> LedgerResult<Vec<InstallationRequest>> {
        Ok(self.newest_first(limit, |_| true))
    }

    async fn statistics(&self) -> LedgerResult<RequestStatistics> {
        let mut stats = RequestStatistics::default();
        for entry in self.records.iter() {
            stats.total += 1;
            match entry.value().record.status {
                RequestStatus::Completed => stats.completed += 1,
                RequestStatus::Denied => stats.denied += 1,
                RequestStatus::Failed => stats.failed += 1,
                _ => stats.in_progress += 1,
            }
        }

        let finished = stats.completed + stats.denied + stats.failed;
        if finished > 0 {
            stats.success_rate = stats.completed as f64 / finished as f64;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_request(requester: &str, package: &str) -> NewRequest {
        NewRequest {
            requester: RequesterId::new(requester),
            role: RoleId::new("associate-software-engineer"),
            package_name: package.to_string(),
            requested_version: None,
        }
    }

    #[tokio::test]
    async fn create_starts_pending() {
        let store = InMemoryRequestStore::new();
        let id = store.create_request(new_request("ada", "numpy")).await.unwrap();

        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, RequestStatus::Pending);
        assert_eq!(record.package_name, "numpy");
        assert!(record.completed_at.is_none());
        assert!(id.0.starts_with("req-"));
    }

    #[tokio::test]
    async fn terminal_records_are_immutable() {
        let store = InMemoryRequestStore::new();
        let id = store.create_request(new_request("ada", "numpy")).await.unwrap();

        let done = store
            .update_request(
                &id,
                RequestUpdate::status(RequestStatus::Completed)
                    .with_output("Successfully installed numpy")
                    .with_verified(true),
            )
            .await
            .unwrap();
        assert!(done.completed_at.is_some());
        assert!(done.verified);

        let err = store
            .update_request(&id, RequestUpdate::status(RequestStatus::Failed))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::TerminalState {
                status: RequestStatus::Completed,
                ..
            }
        ));
        assert_eq!(store.get(&id).await.unwrap().status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = InMemoryRequestStore::new();
        let missing = RequestId("req-missing".into());
        assert!(matches!(
            store.get(&missing).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            store.update_request(&missing, RequestUpdate::default()).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_limited() {
        let store = InMemoryRequestStore::new();
        for package in ["numpy", "pandas", "requests"] {
            store.create_request(new_request("ada", package)).await.unwrap();
        }
        store.create_request(new_request("grace", "flask")).await.unwrap();

        let ada = store
            .list_by_requester(&RequesterId::new("ada"), 2)
            .await
            .unwrap();
        let names: Vec<_> = ada.iter().map(|r| r.package_name.as_str()).collect();
        assert_eq!(names, vec!["requests", "pandas"]);

        assert_eq!(store.list(10).await.unwrap().len(), 4);
        assert_eq!(store.list(10).await.unwrap()[0].package_name, "flask");
    }

    #[tokio::test]
    async fn statistics_count_by_outcome() {
        let store = InMemoryRequestStore::new();
        let mut ids = Vec::new();
        for package in ["a", "b", "c", "d"] {
            ids.push(store.create_request(new_request("ada", package)).await.unwrap());
        }
        store
            .update_request(&ids[0], RequestUpdate::status(RequestStatus::Completed))
            .await
            .unwrap();
        store
            .update_request(&ids[1], RequestUpdate::status(RequestStatus::Denied))
            .await
            .unwrap();
        store
            .update_request(&ids[2], RequestUpdate::status(RequestStatus::Failed))
            .await
            .unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.denied, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.in_progress, 1);
        assert!((stats.success_rate - 1.0 / 3.0).abs() < f64::EPSILON);
    }
}
