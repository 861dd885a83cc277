//! Mock implementations of the storage and container contracts
//!
//! `MemoryStore` implements the same store traits as `PostgresStorage`
//! with the same observable semantics (tenant predicates, soft-delete
//! visibility, READY gating, terminal write-once). `MockRunner` scripts
//! container outcomes and can simulate the engine's completion callback.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use sluice_core::{DataFormat, DefinitionStatus, DefinitionUpdate, ExecutionStatus, ResolvedDefinition};
use sluice_runtime::container::{ContainerRunner, ContainerSpec, RunOutput};
use sluice_runtime::Heartbeat;
use sluice_storage::store::{ConnectionStore, JobStore, NotificationStore};
use sluice_storage::{
    Connection, ConnectionUpdate, CreateNotification, ExecutionStat, ExecutionStatDay,
    JobDefinition, JobDefinitionSnapshot, JobDefinitionStat, JobExecution, NewConnection,
    NewDefinition, Notification, TenantId,
};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type Result<T> = sluice_storage::Result<T>;
type Error = sluice_storage::Error;

struct StoredConnection {
    row: Connection,
    deleted_at: Option<DateTime<Utc>>,
}

struct StoredDefinition {
    row: JobDefinition,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    connections: Vec<StoredConnection>,
    definitions: Vec<StoredDefinition>,
    executions: Vec<JobExecution>,
    snapshots: Vec<JobDefinitionSnapshot>,
    notifications: Vec<Notification>,
}

/// In-memory store with the same contract as the PostgreSQL backend.
/// Passwords are stored as raw bytes; `decrypt_password` inverts that.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot count for a definition, for append-only assertions.
    pub fn snapshot_count(&self, definition_id: Uuid) -> usize {
        self.inner
            .lock()
            .snapshots
            .iter()
            .filter(|s| s.job_definition_id == definition_id)
            .count()
    }

    /// All notification rows, newest last.
    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().notifications.clone()
    }

    /// Backdate an execution's creation time, for resume-claim tests.
    pub fn age_execution(&self, execution_id: Uuid, by_secs: i64) {
        let mut inner = self.inner.lock();
        if let Some(row) = inner.executions.iter_mut().find(|e| e.id == execution_id) {
            row.created_at -= ChronoDuration::seconds(by_secs);
        }
    }

    fn validate_tenant_connection(inner: &Inner, tenant: &TenantId, id: Uuid) -> Result<()> {
        let live = inner.connections.iter().any(|c| {
            c.row.id == id && c.row.tenant_id == tenant.as_str() && c.deleted_at.is_none()
        });
        if live {
            Ok(())
        } else {
            Err(Error::TenantViolation(format!(
                "connection {id} not found for tenant {tenant}"
            )))
        }
    }

    fn ready_name_taken(inner: &Inner, tenant: &TenantId, name: &str, except: Option<Uuid>) -> bool {
        inner.definitions.iter().any(|d| {
            d.deleted_at.is_none()
                && d.row.tenant_id == tenant.as_str()
                && d.row.status == DefinitionStatus::Ready.as_str()
                && d.row.name == name
                && Some(d.row.id) != except
        })
    }

    fn record_snapshot(
        inner: &mut Inner,
        definition_id: Uuid,
        status: DefinitionStatus,
        snapshot: &serde_json::Value,
    ) {
        if snapshot.is_null() {
            return;
        }
        inner.snapshots.push(JobDefinitionSnapshot {
            id: Uuid::new_v4(),
            job_definition_id: definition_id,
            status: status.as_str().to_string(),
            snapshot: sqlx::types::Json(snapshot.clone()),
            created_at: Utc::now(),
        });
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn create_connection(&self, tenant: &TenantId, new: NewConnection) -> Result<Connection> {
        DataFormat::parse(&new.data_format)?;
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::ValidationError("connection name is required".to_string()));
        }

        let mut inner = self.inner.lock();
        let taken = inner.connections.iter().any(|c| {
            c.deleted_at.is_none() && c.row.tenant_id == tenant.as_str() && c.row.name == name
        });
        if taken {
            return Err(Error::AlreadyExists(format!(
                "connection named {name:?} already exists"
            )));
        }

        let now = Utc::now();
        let row = Connection {
            id: Uuid::new_v4(),
            tenant_id: tenant.as_str().to_string(),
            name,
            data_format: new.data_format,
            host: new.host,
            port: new.port,
            username: new.username,
            password: new.password.into_bytes(),
            db_name: new.db_name,
            status: "untested".to_string(),
            created_at: now,
            updated_at: now,
        };
        inner.connections.push(StoredConnection {
            row: row.clone(),
            deleted_at: None,
        });
        Ok(row)
    }

    async fn update_connection(
        &self,
        tenant: &TenantId,
        id: Uuid,
        update: ConnectionUpdate,
    ) -> Result<Connection> {
        let mut inner = self.inner.lock();
        let stored = inner
            .connections
            .iter_mut()
            .find(|c| {
                c.row.id == id && c.row.tenant_id == tenant.as_str() && c.deleted_at.is_none()
            })
            .ok_or_else(|| Error::NotFound(format!("connection {id} not found")))?;

        if let Some(name) = update.name {
            stored.row.name = name.trim().to_string();
        }
        if let Some(format) = update.data_format {
            DataFormat::parse(&format)?;
            stored.row.data_format = format;
        }
        if let Some(host) = update.host {
            stored.row.host = host;
        }
        if let Some(port) = update.port {
            stored.row.port = port;
        }
        if let Some(username) = update.username {
            stored.row.username = username;
        }
        if let Some(password) = update.password {
            stored.row.password = password.into_bytes();
        }
        if let Some(db_name) = update.db_name {
            stored.row.db_name = db_name;
        }
        if let Some(status) = update.status {
            stored.row.status = status;
        }
        stored.row.updated_at = Utc::now();
        Ok(stored.row.clone())
    }

    async fn delete_connection(&self, tenant: &TenantId, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock();
        let stored = inner
            .connections
            .iter_mut()
            .find(|c| {
                c.row.id == id && c.row.tenant_id == tenant.as_str() && c.deleted_at.is_none()
            })
            .ok_or_else(|| Error::NotFound(format!("connection {id} not found")))?;
        stored.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn get_connection(&self, tenant: &TenantId, id: Uuid) -> Result<Connection> {
        self.inner
            .lock()
            .connections
            .iter()
            .find(|c| {
                c.row.id == id && c.row.tenant_id == tenant.as_str() && c.deleted_at.is_none()
            })
            .map(|c| c.row.clone())
            .ok_or_else(|| Error::NotFound(format!("connection {id} not found")))
    }

    async fn list_connections(&self, tenant: &TenantId) -> Result<Vec<Connection>> {
        let mut rows: Vec<Connection> = self
            .inner
            .lock()
            .connections
            .iter()
            .filter(|c| c.row.tenant_id == tenant.as_str() && c.deleted_at.is_none())
            .map(|c| c.row.clone())
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    fn decrypt_password(&self, connection: &Connection) -> Result<String> {
        String::from_utf8(connection.password.clone())
            .map_err(|e| Error::Crypto(format!("invalid utf-8: {e}")))
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_definition(
        &self,
        tenant: &TenantId,
        new: NewDefinition,
    ) -> Result<JobDefinition> {
        let status = DefinitionStatus::parse(&new.status)?;
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::ValidationError("name is required".to_string()));
        }

        let mut inner = self.inner.lock();
        if let Some(source) = new.source_connection_id {
            Self::validate_tenant_connection(&inner, tenant, source)?;
        }
        if let Some(dest) = new.destination_connection_id {
            Self::validate_tenant_connection(&inner, tenant, dest)?;
        }

        if status == DefinitionStatus::Ready {
            let resolved = ResolvedDefinition {
                name: name.clone(),
                description: new.description.clone(),
                ast: new.ast.clone(),
                source_connection_id: new.source_connection_id.map(|id| id.to_string()),
                destination_connection_id: new.destination_connection_id.map(|id| id.to_string()),
            };
            let errors = resolved.validate();
            if !errors.is_empty() {
                return Err(Error::ValidationError(errors.join(", ")));
            }
            if Self::ready_name_taken(&inner, tenant, &name, None) {
                return Err(Error::AlreadyExists(format!(
                    "a READY definition named {name:?} already exists"
                )));
            }
        }

        let now = Utc::now();
        let row = JobDefinition {
            id: Uuid::new_v4(),
            tenant_id: tenant.as_str().to_string(),
            name,
            description: new.description,
            ast: new.ast.clone().map(sqlx::types::Json),
            source_connection_id: new.source_connection_id,
            destination_connection_id: new.destination_connection_id,
            status: status.as_str().to_string(),
            progress_snapshot: new.progress_snapshot.clone().map(sqlx::types::Json),
            created_at: now,
            updated_at: now,
        };
        if let Some(snapshot) = &new.progress_snapshot {
            Self::record_snapshot(&mut inner, row.id, status, snapshot);
        }
        inner.definitions.push(StoredDefinition {
            row: row.clone(),
            deleted_at: None,
        });
        Ok(row)
    }

    async fn get_definition(&self, tenant: &TenantId, id: Uuid) -> Result<JobDefinition> {
        self.inner
            .lock()
            .definitions
            .iter()
            .find(|d| {
                d.row.id == id && d.row.tenant_id == tenant.as_str() && d.deleted_at.is_none()
            })
            .map(|d| d.row.clone())
            .ok_or_else(|| Error::NotFound(format!("job definition {id} not found")))
    }

    async fn list_definitions(&self, tenant: &TenantId) -> Result<Vec<JobDefinition>> {
        let mut rows: Vec<JobDefinition> = self
            .inner
            .lock()
            .definitions
            .iter()
            .filter(|d| d.row.tenant_id == tenant.as_str() && d.deleted_at.is_none())
            .map(|d| d.row.clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn update_definition(
        &self,
        tenant: &TenantId,
        id: Uuid,
        update: DefinitionUpdate,
    ) -> Result<JobDefinition> {
        let mut inner = self.inner.lock();

        for override_id in [&update.source_connection_id, &update.destination_connection_id]
            .into_iter()
            .flatten()
        {
            let trimmed = override_id.trim();
            if !trimmed.is_empty() {
                let parsed = Uuid::parse_str(trimmed).map_err(|_| {
                    Error::ValidationError(format!("invalid connection id {trimmed:?}"))
                })?;
                Self::validate_tenant_connection(&inner, tenant, parsed)?;
            }
        }

        let current = inner
            .definitions
            .iter()
            .find(|d| {
                d.row.id == id && d.row.tenant_id == tenant.as_str() && d.deleted_at.is_none()
            })
            .map(|d| d.row.clone())
            .ok_or_else(|| Error::NotFound(format!("job definition {id} not found")))?;
        let current_status = DefinitionStatus::parse(&current.status)?;

        if let Some(new_status) = update.status {
            if new_status != current_status && !current_status.can_transition_to(new_status) {
                return Err(Error::ValidationError(format!(
                    "invalid status transition from {current_status} to {new_status}"
                )));
            }
            if new_status == DefinitionStatus::Ready {
                let resolved = ResolvedDefinition::resolve(
                    &current.name,
                    &current.description,
                    current.ast.as_ref().map(|json| &json.0),
                    current.source_connection_id.map(|c| c.to_string()).as_deref(),
                    current
                        .destination_connection_id
                        .map(|c| c.to_string())
                        .as_deref(),
                    &update,
                );
                let errors = resolved.validate();
                if !errors.is_empty() {
                    return Err(Error::ValidationError(errors.join(", ")));
                }
                let final_name = update.name.as_deref().unwrap_or(&current.name).trim();
                if Self::ready_name_taken(&inner, tenant, final_name, Some(id)) {
                    return Err(Error::AlreadyExists(format!(
                        "a READY definition named {final_name:?} already exists"
                    )));
                }
            }
        }

        if !update.has_changes() {
            return Ok(current);
        }

        let parse_ref = |raw: &str| -> Result<Option<Uuid>> {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Uuid::parse_str(trimmed).map(Some).map_err(|_| {
                    Error::ValidationError(format!("invalid connection id {trimmed:?}"))
                })
            }
        };
        let source_override = match &update.source_connection_id {
            Some(raw) => Some(parse_ref(raw)?),
            None => None,
        };
        let dest_override = match &update.destination_connection_id {
            Some(raw) => Some(parse_ref(raw)?),
            None => None,
        };

        let stored = inner
            .definitions
            .iter_mut()
            .find(|d| {
                d.row.id == id && d.row.tenant_id == tenant.as_str() && d.deleted_at.is_none()
            })
            .expect("definition disappeared while lock held");

        if let Some(name) = &update.name {
            stored.row.name = name.trim().to_string();
        }
        if let Some(description) = &update.description {
            stored.row.description = description.clone();
        }
        if let Some(ast) = &update.ast {
            stored.row.ast = Some(sqlx::types::Json(ast.clone()));
        }
        if let Some(source) = source_override {
            stored.row.source_connection_id = source;
        }
        if let Some(dest) = dest_override {
            stored.row.destination_connection_id = dest;
        }
        if let Some(status) = update.status {
            stored.row.status = status.as_str().to_string();
        }
        if let Some(snapshot) = &update.progress_snapshot {
            stored.row.progress_snapshot = Some(sqlx::types::Json(snapshot.clone()));
        }
        stored.row.updated_at = Utc::now();
        let updated = stored.row.clone();

        if let Some(snapshot) = &update.progress_snapshot {
            let snapshot_status = update.status.unwrap_or(current_status);
            Self::record_snapshot(&mut inner, id, snapshot_status, snapshot);
        }

        Ok(updated)
    }

    async fn delete_definition(&self, tenant: &TenantId, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock();
        let stored = inner
            .definitions
            .iter_mut()
            .find(|d| {
                d.row.id == id && d.row.tenant_id == tenant.as_str() && d.deleted_at.is_none()
            })
            .ok_or_else(|| Error::NotFound(format!("job definition {id} not found")))?;
        stored.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn list_definitions_with_stats(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<JobDefinitionStat>> {
        let definitions = self.list_definitions(tenant).await?;
        let inner = self.inner.lock();

        Ok(definitions
            .into_iter()
            .map(|definition| {
                let mut runs: Vec<&JobExecution> = inner
                    .executions
                    .iter()
                    .filter(|e| {
                        e.job_definition_id == definition.id && e.tenant_id == tenant.as_str()
                    })
                    .collect();
                runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

                let durations: Vec<f64> = runs
                    .iter()
                    .filter_map(|e| match (e.run_started_at, e.run_completed_at) {
                        (Some(start), Some(end)) => {
                            Some((end - start).num_milliseconds() as f64 / 1000.0)
                        }
                        _ => None,
                    })
                    .collect();

                JobDefinitionStat {
                    total_runs: runs.len() as i64,
                    last_run_status: runs.first().map(|e| e.status.clone()),
                    total_bytes_transferred: runs
                        .iter()
                        .filter_map(|e| e.bytes_transferred)
                        .sum(),
                    avg_duration_seconds: if durations.is_empty() {
                        None
                    } else {
                        Some(durations.iter().sum::<f64>() / durations.len() as f64)
                    },
                    definition,
                }
            })
            .collect())
    }

    async fn list_snapshots(
        &self,
        tenant: &TenantId,
        definition_id: Uuid,
    ) -> Result<Vec<JobDefinitionSnapshot>> {
        let inner = self.inner.lock();
        let owned = inner
            .definitions
            .iter()
            .any(|d| d.row.id == definition_id && d.row.tenant_id == tenant.as_str());
        if !owned {
            return Ok(Vec::new());
        }
        let mut rows: Vec<JobDefinitionSnapshot> = inner
            .snapshots
            .iter()
            .filter(|s| s.job_definition_id == definition_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn create_execution(
        &self,
        tenant: &TenantId,
        definition_id: Uuid,
        execution_id: Uuid,
    ) -> Result<JobExecution> {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner
            .executions
            .iter()
            .find(|e| e.id == execution_id && e.tenant_id == tenant.as_str())
        {
            return Ok(existing.clone());
        }

        let definition = inner
            .definitions
            .iter()
            .find(|d| {
                d.row.id == definition_id
                    && d.row.tenant_id == tenant.as_str()
                    && d.deleted_at.is_none()
            })
            .ok_or_else(|| Error::NotFound(format!("job definition {definition_id} not found")))?;
        if definition.row.status != DefinitionStatus::Ready.as_str() {
            return Err(Error::NotReady(format!(
                "current status {}",
                definition.row.status
            )));
        }

        let now = Utc::now();
        let row = JobExecution {
            id: execution_id,
            tenant_id: tenant.as_str().to_string(),
            job_definition_id: definition_id,
            status: ExecutionStatus::Pending.as_str().to_string(),
            created_at: now,
            updated_at: now,
            run_started_at: None,
            run_completed_at: None,
            error_message: None,
            logs: None,
            records_processed: None,
            bytes_transferred: None,
        };
        inner.executions.push(row.clone());
        Ok(row)
    }

    async fn update_execution(
        &self,
        tenant: &TenantId,
        execution_id: Uuid,
        status: ExecutionStatus,
        error_message: Option<&str>,
        logs: Option<&str>,
    ) -> Result<u64> {
        let mut inner = self.inner.lock();
        let Some(row) = inner
            .executions
            .iter_mut()
            .find(|e| e.id == execution_id && e.tenant_id == tenant.as_str())
        else {
            return Ok(0);
        };
        let current = ExecutionStatus::parse(&row.status)?;

        match status {
            ExecutionStatus::Running => {
                if current.is_terminal() {
                    return Ok(0);
                }
                row.status = status.as_str().to_string();
                row.run_started_at.get_or_insert_with(Utc::now);
                row.updated_at = Utc::now();
                row.error_message = None;
                row.logs = None;
                Ok(1)
            }
            ExecutionStatus::Succeeded | ExecutionStatus::Failed => {
                if current.is_terminal() && current != status {
                    return Ok(0);
                }
                row.status = status.as_str().to_string();
                row.run_completed_at.get_or_insert_with(Utc::now);
                row.updated_at = Utc::now();
                row.error_message = error_message
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string);
                if let Some(logs) = logs.filter(|l| !l.is_empty()) {
                    row.logs = Some(logs.to_string());
                }
                Ok(1)
            }
            ExecutionStatus::Pending => Err(Error::ValidationError(
                "executions cannot be reset to pending".to_string(),
            )),
        }
    }

    async fn append_logs(&self, tenant: &TenantId, execution_id: Uuid, logs: &str) -> Result<u64> {
        let mut inner = self.inner.lock();
        let Some(row) = inner
            .executions
            .iter_mut()
            .find(|e| e.id == execution_id && e.tenant_id == tenant.as_str())
        else {
            return Ok(0);
        };
        let mut combined = row.logs.take().unwrap_or_default();
        combined.push_str(logs);
        row.logs = Some(combined);
        row.updated_at = Utc::now();
        Ok(1)
    }

    async fn complete_execution(
        &self,
        tenant: &TenantId,
        execution_id: Uuid,
        status: ExecutionStatus,
        records_processed: i64,
        bytes_transferred: i64,
    ) -> Result<bool> {
        if !status.is_terminal() {
            return Err(Error::ValidationError(format!(
                "completion status must be terminal, got {status}"
            )));
        }

        let mut inner = self.inner.lock();
        let row = inner
            .executions
            .iter_mut()
            .find(|e| e.id == execution_id && e.tenant_id == tenant.as_str())
            .ok_or_else(|| Error::NotFound(format!("execution {execution_id} not found")))?;

        let current = ExecutionStatus::parse(&row.status)?;
        if current.is_terminal() {
            return if current == status {
                Ok(false)
            } else {
                Err(Error::AlreadyExists(format!(
                    "execution {execution_id} already completed as {current}"
                )))
            };
        }

        row.status = status.as_str().to_string();
        row.run_completed_at = Some(Utc::now());
        row.updated_at = Utc::now();
        row.records_processed = Some(records_processed);
        row.bytes_transferred = Some(bytes_transferred);
        Ok(true)
    }

    async fn get_execution(&self, tenant: &TenantId, execution_id: Uuid) -> Result<JobExecution> {
        self.inner
            .lock()
            .executions
            .iter()
            .find(|e| e.id == execution_id && e.tenant_id == tenant.as_str())
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("execution {execution_id} not found")))
    }

    async fn last_execution(
        &self,
        tenant: &TenantId,
        definition_id: Uuid,
    ) -> Result<JobExecution> {
        self.inner
            .lock()
            .executions
            .iter()
            .filter(|e| e.job_definition_id == definition_id && e.tenant_id == tenant.as_str())
            .max_by_key(|e| e.created_at)
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("no executions found for definition {definition_id}"))
            })
    }

    async fn list_executions(
        &self,
        tenant: &TenantId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobExecution>> {
        if limit <= 0 || limit > 1000 || offset < 0 {
            return Err(Error::ValidationError("invalid pagination".to_string()));
        }
        let mut rows: Vec<JobExecution> = self
            .inner
            .lock()
            .executions
            .iter()
            .filter(|e| e.tenant_id == tenant.as_str())
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn execution_stats(&self, tenant: &TenantId, window_days: i32) -> Result<ExecutionStat> {
        if !(1..=366).contains(&window_days) {
            return Err(Error::ValidationError(
                "window_days must be between 1 and 366".to_string(),
            ));
        }

        let inner = self.inner.lock();
        let today = Utc::now().date_naive();
        let first = today - ChronoDuration::days(window_days as i64 - 1);

        let per_day = (0..window_days as i64)
            .map(|offset| {
                let day = first + ChronoDuration::days(offset);
                let of_day = |status: &str| {
                    inner
                        .executions
                        .iter()
                        .filter(|e| {
                            e.tenant_id == tenant.as_str()
                                && e.created_at.date_naive() == day
                                && e.status == status
                        })
                        .count() as i64
                };
                ExecutionStatDay {
                    day,
                    succeeded: of_day("succeeded"),
                    failed: of_day("failed"),
                    running: of_day("running"),
                    pending: of_day("pending"),
                }
            })
            .collect();

        let of_status = |status: &str| {
            inner
                .executions
                .iter()
                .filter(|e| e.tenant_id == tenant.as_str() && e.status == status)
                .count() as i64
        };
        let total = inner
            .executions
            .iter()
            .filter(|e| e.tenant_id == tenant.as_str())
            .count() as i64;
        let succeeded = of_status("succeeded");

        Ok(ExecutionStat {
            total,
            succeeded,
            failed: of_status("failed"),
            running: of_status("running"),
            success_rate: if total > 0 {
                succeeded as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            total_definitions: inner
                .definitions
                .iter()
                .filter(|d| d.row.tenant_id == tenant.as_str() && d.deleted_at.is_none())
                .count() as i64,
            per_day,
        })
    }

    async fn claim_stale_pending_execution(
        &self,
        older_than_secs: i64,
    ) -> Result<Option<JobExecution>> {
        let mut inner = self.inner.lock();
        let cutoff = Utc::now() - ChronoDuration::seconds(older_than_secs);
        let Some(row) = inner
            .executions
            .iter_mut()
            .filter(|e| e.status == "pending" && e.created_at < cutoff)
            .min_by_key(|e| e.created_at)
        else {
            return Ok(None);
        };
        row.status = ExecutionStatus::Running.as_str().to_string();
        row.run_started_at.get_or_insert_with(Utc::now);
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create_notification(&self, params: CreateNotification) -> Result<Notification> {
        if params.event_type.trim().is_empty() {
            return Err(Error::ValidationError("event type is required".to_string()));
        }
        let row = Notification {
            id: Uuid::new_v4(),
            tenant_id: params
                .tenant_id
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            event_type: params.event_type,
            severity: params.severity,
            title: params.title,
            message: params.message,
            metadata: params.metadata.map(sqlx::types::Json),
            created_at: Utc::now(),
            read_at: None,
        };
        self.inner.lock().notifications.push(row.clone());
        Ok(row)
    }

    async fn list_recent(&self, tenant: &TenantId, limit: i64) -> Result<Vec<Notification>> {
        let limit = if (1..=100).contains(&limit) { limit } else { 25 };
        let mut rows: Vec<Notification> = self
            .inner
            .lock()
            .notifications
            .iter()
            .filter(|n| n.tenant_id.is_none() || n.tenant_id.as_deref() == Some(tenant.as_str()))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn mark_read(&self, tenant: &TenantId, id: Uuid) -> Result<Notification> {
        let mut inner = self.inner.lock();
        let row = inner
            .notifications
            .iter_mut()
            .find(|n| {
                n.id == id
                    && (n.tenant_id.is_none() || n.tenant_id.as_deref() == Some(tenant.as_str()))
            })
            .ok_or_else(|| Error::NotFound(format!("notification {id} not found")))?;
        row.read_at.get_or_insert_with(Utc::now);
        Ok(row.clone())
    }
}

type RunHook =
    Arc<dyn Fn(ContainerSpec) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Scripted container runner. Outcomes are queued with `push_exit`; an
/// optional hook runs "inside" the container, e.g. to simulate the engine
/// posting its completion callback.
#[derive(Default)]
pub struct MockRunner {
    outcomes: Mutex<VecDeque<sluice_runtime::Result<RunOutput>>>,
    hook: Mutex<Option<RunHook>>,
    runs: Mutex<Vec<ContainerSpec>>,
}

impl MockRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a successful container run.
    pub fn push_exit(&self, exit_code: i64, stdout: &str, stderr: &str) {
        self.outcomes.lock().push_back(Ok(RunOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }));
    }

    /// Queue a runner-level failure.
    pub fn push_error(&self, error: sluice_runtime::Error) {
        self.outcomes.lock().push_back(Err(error));
    }

    /// Run `hook` during every container run, before the scripted outcome
    /// is returned.
    pub fn set_hook<F, Fut>(&self, hook: F)
    where
        F: Fn(ContainerSpec) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.hook.lock() = Some(Arc::new(move |spec| Box::pin(hook(spec))));
    }

    /// Specs of every run observed, in order.
    pub fn runs(&self) -> Vec<ContainerSpec> {
        self.runs.lock().clone()
    }
}

#[async_trait]
impl ContainerRunner for MockRunner {
    async fn run(
        &self,
        spec: ContainerSpec,
        heartbeat: Heartbeat,
        cancel: CancellationToken,
    ) -> sluice_runtime::Result<RunOutput> {
        if cancel.is_cancelled() {
            return Err(sluice_runtime::Error::Cancelled);
        }
        heartbeat.ping("mock-run");
        self.runs.lock().push(spec.clone());

        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook(spec).await;
        }

        self.outcomes.lock().pop_front().unwrap_or_else(|| {
            Ok(RunOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        })
    }
}
