//! SQLite adapter for request records.
//!
//! Every write is a single statement, so SQLite's own locking serializes
//! updates per record. The terminal-state check is part of the `UPDATE`
//! predicate rather than a read followed by a write.

use crate::error::{LedgerError, LedgerResult};
use crate::store::{NewRequest, RequestStatistics, RequestStore, RequestUpdate};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use warden_types::{InstallationRequest, RequestId, RequestStatus, RequesterId, RoleId};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_COLUMNS: &str = "request_id, requester, role, package_name, requested_version, status, \
     created_at, updated_at, completed_at, error_detail, raw_output, installed_version, verified";

/// SQLite-backed request store.
#[derive(Clone)]
pub struct SqliteRequestStore {
    pool: SqlitePool,
}

impl SqliteRequestStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| {
                LedgerError::Backend(format!(
                    "failed to open sqlite database {}: {e}",
                    path.as_ref().display()
                ))
            })?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database. A single connection, since every SQLite
    /// memory connection is its own database.
    pub async fn in_memory() -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| LedgerError::Backend(e.to_string()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| LedgerError::Backend(format!("failed to open sqlite: {e}")))?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> LedgerResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> LedgerResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS installation_requests (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL UNIQUE,
                requester TEXT NOT NULL,
                role TEXT NOT NULL,
                package_name TEXT NOT NULL,
                requested_version TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                error_detail TEXT,
                raw_output TEXT,
                installed_version TEXT,
                verified INTEGER NOT NULL DEFAULT 0
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_installation_requests_requester \
             ON installation_requests (requester, seq)",
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| LedgerError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    async fn fetch(&self, id: &RequestId) -> LedgerResult<Option<InstallationRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM installation_requests WHERE request_id = ?1"
        ))
        .bind(id.0.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(row_to_request).transpose()
    }
}

impl std::fmt::Debug for SqliteRequestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRequestStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl RequestStore for SqliteRequestStore {
    async fn create_request(&self, request: NewRequest) -> LedgerResult<RequestId> {
        let id = RequestId::generate();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO installation_requests
                (request_id, requester, role, package_name, requested_version, status, created_at, updated_at, verified)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 0)
            "#,
        )
        .bind(id.0.as_str())
        .bind(request.requester.0.as_str())
        .bind(request.role.as_str())
        .bind(request.package_name.as_str())
        .bind(request.requested_version.as_deref())
        .bind(RequestStatus::Pending.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(id)
    }

    async fn update_request(
        &self,
        id: &RequestId,
        update: RequestUpdate,
    ) -> LedgerResult<InstallationRequest> {
        let now = Utc::now();
        let terminal = update.status.is_some_and(|status| status.is_terminal());

        let result = sqlx::query(
            r#"
            UPDATE installation_requests
               SET status = COALESCE(?1, status),
                   error_detail = COALESCE(?2, error_detail),
                   raw_output = COALESCE(?3, raw_output),
                   installed_version = COALESCE(?4, installed_version),
                   verified = COALESCE(?5, verified),
                   completed_at = CASE WHEN ?6 THEN ?7 ELSE completed_at END,
                   updated_at = ?7
             WHERE request_id = ?8
               AND status NOT IN ('completed', 'denied', 'failed')
            "#,
        )
        .bind(update.status.map(|status| status.as_str()))
        .bind(update.error_detail.as_deref())
        .bind(update.raw_output.as_deref())
        .bind(update.installed_version.as_deref())
        .bind(update.verified)
        .bind(terminal)
        .bind(now)
        .bind(id.0.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        let record = self
            .fetch(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(id.clone()))?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::TerminalState {
                id: id.clone(),
                status: record.status,
            });
        }
        Ok(record)
    }

    async fn get(&self, id: &RequestId) -> LedgerResult<InstallationRequest> {
        self.fetch(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(id.clone()))
    }

    async fn list_by_requester(
        &self,
        requester: &RequesterId,
        limit: usize,
    ) -> LedgerResult<Vec<InstallationRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM installation_requests \
             WHERE requester = ?1 ORDER BY seq DESC LIMIT ?2"
        ))
        .bind(requester.0.as_str())
        .bind(to_i64(limit)?)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(row_to_request).collect()
    }

    async fn list(&self, limit: usize) -> LedgerResult<Vec<InstallationRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM installation_requests ORDER BY seq DESC LIMIT ?1"
        ))
        .bind(to_i64(limit)?)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(row_to_request).collect()
    }

    async fn statistics(&self) -> LedgerResult<RequestStatistics> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM installation_requests GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut stats = RequestStatistics::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(backend)?;
            let count: i64 = row.try_get("n").map_err(backend)?;
            let count = usize::try_from(count).unwrap_or_default();

            stats.total += count;
            match parse_status(&status)? {
                RequestStatus::Completed => stats.completed += count,
                RequestStatus::Denied => stats.denied += count,
                RequestStatus::Failed => stats.failed += count,
                _ => stats.in_progress += count,
            }
        }

        let finished = stats.completed + stats.denied + stats.failed;
        if finished > 0 {
            stats.success_rate = stats.completed as f64 / finished as f64;
        }
        Ok(stats)
    }
}

fn row_to_request(row: SqliteRow) -> LedgerResult<InstallationRequest> {
    let status: String = row.try_get("status").map_err(backend)?;
    Ok(InstallationRequest {
        request_id: RequestId(row.try_get("request_id").map_err(backend)?),
        requester: RequesterId(row.try_get("requester").map_err(backend)?),
        role: RoleId(row.try_get("role").map_err(backend)?),
        package_name: row.try_get("package_name").map_err(backend)?,
        requested_version: row.try_get("requested_version").map_err(backend)?,
        status: parse_status(&status)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
        completed_at: row.try_get("completed_at").map_err(backend)?,
        error_detail: row.try_get("error_detail").map_err(backend)?,
        raw_output: row.try_get("raw_output").map_err(backend)?,
        installed_version: row.try_get("installed_version").map_err(backend)?,
        verified: row.try_get("verified").map_err(backend)?,
    })
}

fn parse_status(raw: &str) -> LedgerResult<RequestStatus> {
    RequestStatus::from_str(raw)
        .map_err(|_| LedgerError::Backend(format!("unknown request status '{raw}'")))
}

fn to_i64(value: usize) -> LedgerResult<i64> {
    i64::try_from(value).map_err(|_| LedgerError::Backend("limit too large".to_string()))
}

fn backend(err: sqlx::Error) -> LedgerError {
    LedgerError::Backend(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_request(requester: &str, package: &str) -> NewRequest {
        NewRequest {
            requester: RequesterId::new(requester),
            role: RoleId::new("associate-software-engineer"),
            package_name: package.to_string(),
            requested_version: Some("1.26.0".to_string()),
        }
    }

    #[tokio::test]
    async fn records_round_the_lifecycle() {
        let store = SqliteRequestStore::in_memory().await.unwrap();
        let id = store.create_request(new_request("ada", "numpy")).await.unwrap();

        let pending = store.get(&id).await.unwrap();
        assert_eq!(pending.status, RequestStatus::Pending);
        assert_eq!(pending.requested_version.as_deref(), Some("1.26.0"));
        assert!(pending.completed_at.is_none());

        store
            .update_request(&id, RequestUpdate::status(RequestStatus::Installing))
            .await
            .unwrap();
        let done = store
            .update_request(
                &id,
                RequestUpdate::status(RequestStatus::Completed)
                    .with_output("Successfully installed numpy")
                    .with_installed_version("1.26.0")
                    .with_verified(true),
            )
            .await
            .unwrap();
        assert_eq!(done.status, RequestStatus::Completed);
        assert!(done.completed_at.is_some());
        assert!(done.verified);
        assert_eq!(done.raw_output.as_deref(), Some("Successfully installed numpy"));
        assert_eq!(done.installed_version.as_deref(), Some("1.26.0"));
    }

    #[tokio::test]
    async fn terminal_records_reject_updates() {
        let store = SqliteRequestStore::in_memory().await.unwrap();
        let id = store.create_request(new_request("ada", "numpy")).await.unwrap();
        store
            .update_request(
                &id,
                RequestUpdate::status(RequestStatus::Denied).with_error("not granted"),
            )
            .await
            .unwrap();

        let err = store
            .update_request(&id, RequestUpdate::status(RequestStatus::Installing))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::TerminalState {
                status: RequestStatus::Denied,
                ..
            }
        ));

        let missing = RequestId("req-missing".into());
        assert!(matches!(
            store.update_request(&missing, RequestUpdate::default()).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn history_and_statistics() {
        let store = SqliteRequestStore::in_memory().await.unwrap();
        let mut ids = Vec::new();
        for package in ["numpy", "pandas", "requests"] {
            ids.push(store.create_request(new_request("ada", package)).await.unwrap());
        }
        store.create_request(new_request("grace", "flask")).await.unwrap();

        store
            .update_request(&ids[0], RequestUpdate::status(RequestStatus::Completed))
            .await
            .unwrap();
        store
            .update_request(&ids[1], RequestUpdate::status(RequestStatus::Failed))
            .await
            .unwrap();

        let ada = store
            .list_by_requester(&RequesterId::new("ada"), 2)
            .await
            .unwrap();
        let names: Vec<_> = ada.iter().map(|r| r.package_name.as_str()).collect();
        assert_eq!(names, vec!["requests", "pandas"]);
        assert_eq!(store.list(10).await.unwrap().len(), 4);

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.in_progress, 2);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn records_survive_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.db");

        let id = {
            let store = SqliteRequestStore::open(&path, 2).await.unwrap();
            let id = store.create_request(new_request("ada", "numpy")).await.unwrap();
            store
                .update_request(&id, RequestUpdate::status(RequestStatus::Completed))
                .await
                .unwrap();
            store.pool().close().await;
            id
        };

        let reopened = SqliteRequestStore::open(&path, 2).await.unwrap();
        let record = reopened.get(&id).await.unwrap();
        assert_eq!(record.status, RequestStatus::Completed);
        assert_eq!(record.requester, RequesterId::new("ada"));
    }

    #[tokio::test]
    async fn concurrent_updates_to_distinct_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(
            SqliteRequestStore::open(dir.path().join("warden.db"), 4)
                .await
                .unwrap(),
        );

        let runs = (0..6).map(|i| {
            let store = store.clone();
            async move {
                let id = store
                    .create_request(new_request("ada", &format!("pkg-{i}")))
                    .await
                    .unwrap();
                for status in [
                    RequestStatus::CheckingPermission,
                    RequestStatus::Installing,
                    RequestStatus::Completed,
                ] {
                    store
                        .update_request(&id, RequestUpdate::status(status))
                        .await
                        .unwrap();
                }
                id
            }
        });
        let ids = futures::future::join_all(runs).await;

        for id in ids {
            assert_eq!(store.get(&id).await.unwrap().status, RequestStatus::Completed);
        }
        assert_eq!(store.statistics().await.unwrap().completed, 6);
    }
}
