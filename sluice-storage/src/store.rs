//! Store contracts
//!
//! The traits below are the seams between the orchestration layers and the
//! persistence backend. `PostgresStorage` implements all three; tests run
//! the same contracts against an in-memory store.

use crate::models::*;
use crate::{Result, TenantId};
use async_trait::async_trait;
use sluice_core::{DefinitionUpdate, ExecutionStatus};
use uuid::Uuid;

/// Persistence contract for data connections.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn create_connection(&self, tenant: &TenantId, new: NewConnection) -> Result<Connection>;

    async fn update_connection(
        &self,
        tenant: &TenantId,
        id: Uuid,
        update: ConnectionUpdate,
    ) -> Result<Connection>;

    /// Soft delete. The row stops participating in reads and uniqueness.
    async fn delete_connection(&self, tenant: &TenantId, id: Uuid) -> Result<()>;

    async fn get_connection(&self, tenant: &TenantId, id: Uuid) -> Result<Connection>;

    async fn list_connections(&self, tenant: &TenantId) -> Result<Vec<Connection>>;

    /// Open a connection's sealed password. The plaintext must not outlive
    /// connection-string assembly.
    fn decrypt_password(&self, connection: &Connection) -> Result<String>;
}

/// Persistence contract for job definitions and executions.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_definition(&self, tenant: &TenantId, new: NewDefinition)
        -> Result<JobDefinition>;

    async fn get_definition(&self, tenant: &TenantId, id: Uuid) -> Result<JobDefinition>;

    async fn list_definitions(&self, tenant: &TenantId) -> Result<Vec<JobDefinition>>;

    /// Apply a partial update. A status change to READY re-verifies the
    /// full READY invariant; a non-empty progress snapshot appends to the
    /// snapshot history.
    async fn update_definition(
        &self,
        tenant: &TenantId,
        id: Uuid,
        update: DefinitionUpdate,
    ) -> Result<JobDefinition>;

    /// Soft delete.
    async fn delete_definition(&self, tenant: &TenantId, id: Uuid) -> Result<()>;

    async fn list_definitions_with_stats(&self, tenant: &TenantId)
        -> Result<Vec<JobDefinitionStat>>;

    /// Snapshot history for a definition, newest first.
    async fn list_snapshots(
        &self,
        tenant: &TenantId,
        definition_id: Uuid,
    ) -> Result<Vec<JobDefinitionSnapshot>>;

    /// Insert a pending execution keyed by a caller-minted id. Fails with
    /// `NotReady` unless the definition is READY, atomically with the
    /// status check. Replay-safe: a duplicate id returns the existing row.
    async fn create_execution(
        &self,
        tenant: &TenantId,
        definition_id: Uuid,
        execution_id: Uuid,
    ) -> Result<JobExecution>;

    /// Move an execution through its lifecycle. `Running` stamps
    /// `run_started_at` and clears any stale message/logs; terminal
    /// statuses stamp `run_completed_at`. Returns the number of rows
    /// affected.
    async fn update_execution(
        &self,
        tenant: &TenantId,
        execution_id: Uuid,
        status: ExecutionStatus,
        error_message: Option<&str>,
        logs: Option<&str>,
    ) -> Result<u64>;

    async fn mark_execution_running(&self, tenant: &TenantId, execution_id: Uuid) -> Result<()> {
        self.update_execution(tenant, execution_id, ExecutionStatus::Running, None, None)
            .await?;
        Ok(())
    }

    /// Append captured logs to an execution without touching its status
    /// or metrics. Used when the callback already decided the terminal
    /// state and only the container output remains to be persisted.
    async fn append_logs(&self, tenant: &TenantId, execution_id: Uuid, logs: &str) -> Result<u64>;

    /// Apply an engine completion report. Returns `true` when the row
    /// transitioned. A repeated report with the same terminal status is a
    /// no-op returning `false`; a conflicting terminal status fails with
    /// `AlreadyExists`.
    async fn complete_execution(
        &self,
        tenant: &TenantId,
        execution_id: Uuid,
        status: ExecutionStatus,
        records_processed: i64,
        bytes_transferred: i64,
    ) -> Result<bool>;

    async fn get_execution(&self, tenant: &TenantId, execution_id: Uuid) -> Result<JobExecution>;

    /// Claim one orphaned pending execution for resumption after a process
    /// restart. Only rows older than `older_than_secs` are candidates, so
    /// freshly scheduled executions stay with the workflow that minted
    /// them. The claim atomically moves the row to running; at most one
    /// worker wins a given row. Worker-internal: this is the only
    /// operation that spans tenants, and the claimed row carries its own
    /// tenant for all subsequent calls.
    async fn claim_stale_pending_execution(
        &self,
        older_than_secs: i64,
    ) -> Result<Option<JobExecution>>;

    /// Latest execution of a definition by creation time.
    async fn last_execution(&self, tenant: &TenantId, definition_id: Uuid)
        -> Result<JobExecution>;

    async fn list_executions(
        &self,
        tenant: &TenantId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobExecution>>;

    /// Per-day status matrix over exactly `window_days` rows anchored on
    /// the current date, plus window-independent totals.
    async fn execution_stats(&self, tenant: &TenantId, window_days: i32) -> Result<ExecutionStat>;
}

/// Persistence contract for notifications.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(&self, params: CreateNotification) -> Result<Notification>;

    /// Recent notifications visible to a tenant, including global ones.
    async fn list_recent(&self, tenant: &TenantId, limit: i64) -> Result<Vec<Notification>>;

    /// Stamp `read_at`. Idempotent: an already-read notification keeps its
    /// original timestamp.
    async fn mark_read(&self, tenant: &TenantId, id: Uuid) -> Result<Notification>;
}
