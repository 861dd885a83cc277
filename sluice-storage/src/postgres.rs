//! PostgreSQL storage implementation

use crate::crypto::SecretCipher;
use crate::models::*;
use crate::store::{ConnectionStore, JobStore, NotificationStore};
use crate::{Result, TenantId};
use async_trait::async_trait;
use sluice_core::{
    ConnectionStatus, DataFormat, DefinitionStatus, DefinitionUpdate, ExecutionStatus,
    ResolvedDefinition,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Configuration for the PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 30,
            idle_timeout_secs: None,
            max_lifetime_secs: None,
        }
    }
}

const CONNECTION_COLUMNS: &str = "id, tenant_id, name, data_format, host, port, username, \
     password, db_name, status, created_at, updated_at";

const DEFINITION_COLUMNS: &str = "id, tenant_id, name, description, ast, source_connection_id, \
     destination_connection_id, status, progress_snapshot, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, tenant_id, job_definition_id, status, created_at, \
     updated_at, run_started_at, run_completed_at, error_message, logs, records_processed, \
     bytes_transferred";

const NOTIFICATION_COLUMNS: &str =
    "id, tenant_id, event_type, severity, title, message, metadata, created_at, read_at";

/// PostgreSQL storage backend
pub struct PostgresStorage {
    pool: PgPool,
    cipher: SecretCipher,
}

impl PostgresStorage {
    /// Create a new PostgreSQL storage instance with default configuration
    pub async fn new(database_url: &str, cipher: SecretCipher) -> Result<Self> {
        Self::with_pool_config(database_url, cipher, PoolConfig::default()).await
    }

    /// Create a new PostgreSQL storage instance using a PoolConfig
    pub async fn with_pool_config(
        database_url: &str,
        cipher: SecretCipher,
        config: PoolConfig,
    ) -> Result<Self> {
        if config.min_connections == 0 {
            return Err(crate::Error::ValidationError(
                "min_connections must be > 0".to_string(),
            ));
        }
        if config.max_connections == 0 || config.max_connections < config.min_connections {
            return Err(crate::Error::ValidationError(
                "max_connections must be >= min_connections and > 0".to_string(),
            ));
        }

        let mut opts = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout_secs));

        if let Some(idle) = config.idle_timeout_secs {
            opts = opts.idle_timeout(std::time::Duration::from_secs(idle));
        }
        if let Some(max_life) = config.max_lifetime_secs {
            opts = opts.max_lifetime(std::time::Duration::from_secs(max_life));
        }

        let pool = opts.connect(database_url).await?;
        Ok(Self { pool, cipher })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ========== Helpers ==========

    fn is_unique_violation(e: &sqlx::Error) -> bool {
        matches!(
            e,
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
        )
    }

    fn validate_pagination_params(limit: i64, offset: i64) -> Result<()> {
        if limit <= 0 {
            return Err(crate::Error::ValidationError(
                "Limit must be greater than 0".to_string(),
            ));
        }
        if limit > 1000 {
            return Err(crate::Error::ValidationError(
                "Limit cannot exceed 1000".to_string(),
            ));
        }
        if offset < 0 {
            return Err(crate::Error::ValidationError(
                "Offset cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    fn warn_if_slow(start: Instant, tenant: &TenantId, operation: &str) {
        let elapsed = start.elapsed();
        if elapsed.as_millis() > 100 {
            warn!(
                tenant_id = %tenant.as_str(),
                operation,
                duration_ms = elapsed.as_millis(),
                "Slow database operation detected"
            );
        }
    }

    /// Assert that a connection id resolves to a live connection of the
    /// given tenant. Cross-tenant and dangling references are rejected.
    async fn validate_tenant_connection(&self, tenant: &TenantId, id: Uuid) -> Result<()> {
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM connections WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(tenant.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if exists.is_none() {
            return Err(crate::Error::TenantViolation(format!(
                "connection {id} not found for tenant {tenant}"
            )));
        }
        Ok(())
    }

    async fn definition_status(&self, tenant: &TenantId, id: Uuid) -> Result<DefinitionStatus> {
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM job_definitions \
             WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(tenant.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match status {
            Some(s) => Ok(DefinitionStatus::parse(&s)?),
            None => Err(crate::Error::NotFound(format!(
                "job definition {id} not found"
            ))),
        }
    }

    async fn record_definition_snapshot(
        &self,
        definition_id: Uuid,
        status: DefinitionStatus,
        snapshot: &serde_json::Value,
    ) -> Result<()> {
        if snapshot.is_null() {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO job_definition_snapshots (job_definition_id, status, snapshot) \
             VALUES ($1, $2, $3)",
        )
        .bind(definition_id)
        .bind(status.as_str())
        .bind(sqlx::types::Json(snapshot))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Per-definition run metrics used by `list_definitions_with_stats`.
    async fn fetch_definition_metrics(
        &self,
        tenant: &TenantId,
    ) -> Result<HashMap<Uuid, DefinitionMetricsRow>> {
        let rows: Vec<DefinitionMetricsRow> = sqlx::query_as(
            "WITH ranked AS ( \
                 SELECT job_definition_id, status, bytes_transferred, \
                        EXTRACT(EPOCH FROM (run_completed_at - run_started_at))::DOUBLE PRECISION \
                            AS duration_seconds, \
                        ROW_NUMBER() OVER ( \
                            PARTITION BY job_definition_id ORDER BY created_at DESC \
                        ) AS run_rank \
                 FROM job_executions \
                 WHERE tenant_id = $1 \
             ) \
             SELECT job_definition_id, \
                    COUNT(*)::BIGINT AS total_runs, \
                    MAX(CASE WHEN run_rank = 1 THEN status END) AS last_run_status, \
                    COALESCE(SUM(bytes_transferred), 0)::BIGINT AS total_bytes_transferred, \
                    AVG(duration_seconds)::DOUBLE PRECISION AS avg_duration_seconds \
             FROM ranked \
             GROUP BY job_definition_id",
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.job_definition_id, row))
            .collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DefinitionMetricsRow {
    job_definition_id: Uuid,
    total_runs: i64,
    last_run_status: Option<String>,
    total_bytes_transferred: i64,
    avg_duration_seconds: Option<f64>,
}

#[async_trait]
impl ConnectionStore for PostgresStorage {
    #[instrument(skip(self, new), fields(tenant_id = %tenant.as_str(), name = %new.name))]
    async fn create_connection(&self, tenant: &TenantId, new: NewConnection) -> Result<Connection> {
        let start = Instant::now();

        DataFormat::parse(&new.data_format)?;
        if new.name.trim().is_empty() {
            return Err(crate::Error::ValidationError(
                "connection name is required".to_string(),
            ));
        }
        let sealed = self.cipher.encrypt(&new.password)?;

        let sql = format!(
            "INSERT INTO connections \
                 (tenant_id, name, data_format, host, port, username, password, db_name, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {CONNECTION_COLUMNS}"
        );
        let connection: Connection = sqlx::query_as(&sql)
            .bind(tenant.as_str())
            .bind(new.name.trim())
            .bind(&new.data_format)
            .bind(&new.host)
            .bind(new.port)
            .bind(&new.username)
            .bind(&sealed)
            .bind(&new.db_name)
            .bind(ConnectionStatus::Untested.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if Self::is_unique_violation(&e) {
                    crate::Error::AlreadyExists(format!(
                        "connection named {:?} already exists",
                        new.name.trim()
                    ))
                } else {
                    e.into()
                }
            })?;

        Self::warn_if_slow(start, tenant, "create_connection");
        Ok(connection)
    }

    #[instrument(skip(self, update), fields(tenant_id = %tenant.as_str(), connection_id = %id))]
    async fn update_connection(
        &self,
        tenant: &TenantId,
        id: Uuid,
        update: ConnectionUpdate,
    ) -> Result<Connection> {
        if let Some(format) = &update.data_format {
            DataFormat::parse(format)?;
        }
        if let Some(status) = &update.status {
            ConnectionStatus::parse(status)?;
        }
        let sealed = match &update.password {
            Some(plain) => Some(self.cipher.encrypt(plain)?),
            None => None,
        };

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE connections SET updated_at = NOW()");
        if let Some(name) = &update.name {
            qb.push(", name = ").push_bind(name.trim().to_string());
        }
        if let Some(format) = &update.data_format {
            qb.push(", data_format = ").push_bind(format.clone());
        }
        if let Some(host) = &update.host {
            qb.push(", host = ").push_bind(host.clone());
        }
        if let Some(port) = update.port {
            qb.push(", port = ").push_bind(port);
        }
        if let Some(username) = &update.username {
            qb.push(", username = ").push_bind(username.clone());
        }
        if let Some(sealed) = sealed {
            qb.push(", password = ").push_bind(sealed);
        }
        if let Some(db_name) = &update.db_name {
            qb.push(", db_name = ").push_bind(db_name.clone());
        }
        if let Some(status) = &update.status {
            qb.push(", status = ").push_bind(status.clone());
        }
        qb.push(" WHERE id = ")
            .push_bind(id)
            .push(" AND tenant_id = ")
            .push_bind(tenant.as_str().to_string())
            .push(" AND deleted_at IS NULL");

        let result = qb.build().execute(&self.pool).await.map_err(|e| {
            if Self::is_unique_violation(&e) {
                crate::Error::AlreadyExists("connection name already exists".to_string())
            } else {
                crate::Error::from(e)
            }
        })?;
        if result.rows_affected() == 0 {
            return Err(crate::Error::NotFound(format!(
                "connection {id} not found"
            )));
        }

        self.get_connection(tenant, id).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant.as_str(), connection_id = %id))]
    async fn delete_connection(&self, tenant: &TenantId, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE connections SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(tenant.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(crate::Error::NotFound(format!(
                "connection {id} not found"
            )));
        }
        Ok(())
    }

    async fn get_connection(&self, tenant: &TenantId, id: Uuid) -> Result<Connection> {
        let sql = format!(
            "SELECT {CONNECTION_COLUMNS} FROM connections \
             WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL"
        );
        sqlx::query_as(&sql)
            .bind(id)
            .bind(tenant.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("connection {id} not found")))
    }

    async fn list_connections(&self, tenant: &TenantId) -> Result<Vec<Connection>> {
        let sql = format!(
            "SELECT {CONNECTION_COLUMNS} FROM connections \
             WHERE tenant_id = $1 AND deleted_at IS NULL \
             ORDER BY name"
        );
        Ok(sqlx::query_as(&sql)
            .bind(tenant.as_str())
            .fetch_all(&self.pool)
            .await?)
    }

    fn decrypt_password(&self, connection: &Connection) -> Result<String> {
        self.cipher.decrypt(&connection.password)
    }
}

#[async_trait]
impl JobStore for PostgresStorage {
    #[instrument(skip(self, new), fields(tenant_id = %tenant.as_str(), name = %new.name))]
    async fn create_definition(
        &self,
        tenant: &TenantId,
        new: NewDefinition,
    ) -> Result<JobDefinition> {
        let start = Instant::now();

        let status = DefinitionStatus::parse(&new.status)?;
        if new.name.trim().is_empty() {
            return Err(crate::Error::ValidationError("name is required".to_string()));
        }

        if let Some(source) = new.source_connection_id {
            self.validate_tenant_connection(tenant, source).await?;
        }
        if let Some(dest) = new.destination_connection_id {
            self.validate_tenant_connection(tenant, dest).await?;
        }

        if status == DefinitionStatus::Ready {
            let resolved = ResolvedDefinition {
                name: new.name.trim().to_string(),
                description: new.description.clone(),
                ast: new.ast.clone(),
                source_connection_id: new.source_connection_id.map(|id| id.to_string()),
                destination_connection_id: new.destination_connection_id.map(|id| id.to_string()),
            };
            let errors = resolved.validate();
            if !errors.is_empty() {
                return Err(crate::Error::ValidationError(errors.join(", ")));
            }
        }

        let sql = format!(
            "INSERT INTO job_definitions \
                 (tenant_id, name, description, ast, source_connection_id, \
                  destination_connection_id, status, progress_snapshot) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {DEFINITION_COLUMNS}"
        );
        let definition: JobDefinition = sqlx::query_as(&sql)
            .bind(tenant.as_str())
            .bind(new.name.trim())
            .bind(&new.description)
            .bind(new.ast.as_ref().map(sqlx::types::Json))
            .bind(new.source_connection_id)
            .bind(new.destination_connection_id)
            .bind(status.as_str())
            .bind(new.progress_snapshot.as_ref().map(sqlx::types::Json))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if Self::is_unique_violation(&e) {
                    crate::Error::AlreadyExists(format!(
                        "a READY definition named {:?} already exists",
                        new.name.trim()
                    ))
                } else {
                    e.into()
                }
            })?;

        if let Some(snapshot) = &new.progress_snapshot {
            self.record_definition_snapshot(definition.id, status, snapshot)
                .await?;
        }

        Self::warn_if_slow(start, tenant, "create_definition");
        Ok(definition)
    }

    async fn get_definition(&self, tenant: &TenantId, id: Uuid) -> Result<JobDefinition> {
        let sql = format!(
            "SELECT {DEFINITION_COLUMNS} FROM job_definitions \
             WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL"
        );
        sqlx::query_as(&sql)
            .bind(id)
            .bind(tenant.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("job definition {id} not found")))
    }

    async fn list_definitions(&self, tenant: &TenantId) -> Result<Vec<JobDefinition>> {
        let sql = format!(
            "SELECT {DEFINITION_COLUMNS} FROM job_definitions \
             WHERE tenant_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC"
        );
        Ok(sqlx::query_as(&sql)
            .bind(tenant.as_str())
            .fetch_all(&self.pool)
            .await?)
    }

    #[instrument(skip(self, update), fields(tenant_id = %tenant.as_str(), definition_id = %id))]
    async fn update_definition(
        &self,
        tenant: &TenantId,
        id: Uuid,
        update: DefinitionUpdate,
    ) -> Result<JobDefinition> {
        let start = Instant::now();
        let current = self.get_definition(tenant, id).await?;
        let current_status = DefinitionStatus::parse(&current.status)?;

        // Connection overrides must resolve within the tenant before any
        // column is touched.
        for override_id in [&update.source_connection_id, &update.destination_connection_id]
            .into_iter()
            .flatten()
        {
            let trimmed = override_id.trim();
            if !trimmed.is_empty() {
                let parsed = Uuid::parse_str(trimmed).map_err(|_| {
                    crate::Error::ValidationError(format!("invalid connection id {trimmed:?}"))
                })?;
                self.validate_tenant_connection(tenant, parsed).await?;
            }
        }

        if let Some(new_status) = update.status {
            if new_status != current_status && !current_status.can_transition_to(new_status) {
                return Err(crate::Error::ValidationError(format!(
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
                    return Err(crate::Error::ValidationError(errors.join(", ")));
                }
            }
        }

        if !update.has_changes() {
            return Ok(current);
        }

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE job_definitions SET updated_at = NOW()");
        if let Some(name) = &update.name {
            qb.push(", name = ").push_bind(name.trim().to_string());
        }
        if let Some(description) = &update.description {
            qb.push(", description = ").push_bind(description.clone());
        }
        if let Some(ast) = &update.ast {
            qb.push(", ast = ").push_bind(sqlx::types::Json(ast.clone()));
        }
        if let Some(source) = &update.source_connection_id {
            let trimmed = source.trim();
            if trimmed.is_empty() {
                qb.push(", source_connection_id = NULL");
            } else {
                qb.push(", source_connection_id = ")
                    .push_bind(Uuid::parse_str(trimmed).map_err(|_| {
                        crate::Error::ValidationError(format!("invalid connection id {trimmed:?}"))
                    })?);
            }
        }
        if let Some(dest) = &update.destination_connection_id {
            let trimmed = dest.trim();
            if trimmed.is_empty() {
                qb.push(", destination_connection_id = NULL");
            } else {
                qb.push(", destination_connection_id = ")
                    .push_bind(Uuid::parse_str(trimmed).map_err(|_| {
                        crate::Error::ValidationError(format!("invalid connection id {trimmed:?}"))
                    })?);
            }
        }
        if let Some(status) = update.status {
            qb.push(", status = ").push_bind(status.as_str());
        }
        if let Some(snapshot) = &update.progress_snapshot {
            qb.push(", progress_snapshot = ")
                .push_bind(sqlx::types::Json(snapshot.clone()));
        }
        qb.push(" WHERE id = ")
            .push_bind(id)
            .push(" AND tenant_id = ")
            .push_bind(tenant.as_str().to_string())
            .push(" AND deleted_at IS NULL");

        let result = qb.build().execute(&self.pool).await.map_err(|e| {
            if Self::is_unique_violation(&e) {
                crate::Error::AlreadyExists("a READY definition with this name already exists".to_string())
            } else {
                crate::Error::from(e)
            }
        })?;
        if result.rows_affected() == 0 {
            return Err(crate::Error::NotFound(format!(
                "job definition {id} not found"
            )));
        }

        if let Some(snapshot) = &update.progress_snapshot {
            if !snapshot.is_null() {
                let snapshot_status = update.status.unwrap_or(current_status);
                self.record_definition_snapshot(id, snapshot_status, snapshot)
                    .await?;
            }
        }

        Self::warn_if_slow(start, tenant, "update_definition");
        self.get_definition(tenant, id).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant.as_str(), definition_id = %id))]
    async fn delete_definition(&self, tenant: &TenantId, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job_definitions SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(tenant.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(crate::Error::NotFound(format!(
                "job definition {id} not found"
            )));
        }
        Ok(())
    }

    async fn list_definitions_with_stats(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<JobDefinitionStat>> {
        let definitions = self.list_definitions(tenant).await?;
        let mut metrics = self.fetch_definition_metrics(tenant).await?;

        Ok(definitions
            .into_iter()
            .map(|definition| match metrics.remove(&definition.id) {
                Some(row) => JobDefinitionStat {
                    definition,
                    total_runs: row.total_runs,
                    last_run_status: row.last_run_status,
                    total_bytes_transferred: row.total_bytes_transferred,
                    avg_duration_seconds: row.avg_duration_seconds,
                },
                None => JobDefinitionStat {
                    definition,
                    total_runs: 0,
                    last_run_status: None,
                    total_bytes_transferred: 0,
                    avg_duration_seconds: None,
                },
            })
            .collect())
    }

    async fn list_snapshots(
        &self,
        tenant: &TenantId,
        definition_id: Uuid,
    ) -> Result<Vec<JobDefinitionSnapshot>> {
        Ok(sqlx::query_as(
            "SELECT s.id, s.job_definition_id, s.status, s.snapshot, s.created_at \
             FROM job_definition_snapshots s \
             JOIN job_definitions d ON d.id = s.job_definition_id \
             WHERE s.job_definition_id = $1 AND d.tenant_id = $2 \
             ORDER BY s.created_at DESC",
        )
        .bind(definition_id)
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(
        skip(self),
        fields(
            tenant_id = %tenant.as_str(),
            definition_id = %definition_id,
            execution_id = %execution_id,
        )
    )]
    async fn create_execution(
        &self,
        tenant: &TenantId,
        definition_id: Uuid,
        execution_id: Uuid,
    ) -> Result<JobExecution> {
        let start = Instant::now();

        // Replay-safe: a retried workflow re-creating the same id observes
        // the existing row, regardless of what the definition looks like
        // by now.
        match self.get_execution(tenant, execution_id).await {
            Ok(existing) => return Ok(existing),
            Err(crate::Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let mut tx = self.pool.begin().await?;

        // The READY check and the insert must be one atomic unit so a
        // concurrent autosave cannot demote the definition in between.
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM job_definitions \
             WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL \
             FOR SHARE",
        )
        .bind(definition_id)
        .bind(tenant.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let status = status.ok_or_else(|| {
            crate::Error::NotFound(format!("job definition {definition_id} not found"))
        })?;
        if DefinitionStatus::parse(&status)? != DefinitionStatus::Ready {
            return Err(crate::Error::NotReady(format!("current status {status}")));
        }

        // Replay-safe: a retried workflow re-inserting the same id is a
        // no-op and observes the existing row.
        sqlx::query(
            "INSERT INTO job_executions (id, tenant_id, job_definition_id, status) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(execution_id)
        .bind(tenant.as_str())
        .bind(definition_id)
        .bind(ExecutionStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Self::warn_if_slow(start, tenant, "create_execution");
        self.get_execution(tenant, execution_id).await
    }

    #[instrument(
        skip(self, error_message, logs),
        fields(
            tenant_id = %tenant.as_str(),
            execution_id = %execution_id,
            status = %status,
        )
    )]
    async fn update_execution(
        &self,
        tenant: &TenantId,
        execution_id: Uuid,
        status: ExecutionStatus,
        error_message: Option<&str>,
        logs: Option<&str>,
    ) -> Result<u64> {
        let result = match status {
            ExecutionStatus::Running => {
                sqlx::query(
                    "UPDATE job_executions \
                        SET status = $1, \
                            run_started_at = COALESCE(run_started_at, NOW()), \
                            updated_at = NOW(), \
                            error_message = NULL, \
                            logs = NULL \
                      WHERE id = $2 AND tenant_id = $3 \
                        AND status IN ('pending', 'running')",
                )
                .bind(status.as_str())
                .bind(execution_id)
                .bind(tenant.as_str())
                .execute(&self.pool)
                .await?
            }
            ExecutionStatus::Succeeded | ExecutionStatus::Failed => {
                // A terminal write is allowed from a live state, or onto
                // the same terminal state when the reconcile step merges
                // logs after the callback already finished the row.
                sqlx::query(
                    "UPDATE job_executions \
                        SET status = $1, \
                            run_completed_at = COALESCE(run_completed_at, NOW()), \
                            updated_at = NOW(), \
                            error_message = NULLIF($2, ''), \
                            logs = COALESCE(NULLIF($3, ''), logs) \
                      WHERE id = $4 AND tenant_id = $5 \
                        AND (status IN ('pending', 'running') OR status = $1)",
                )
                .bind(status.as_str())
                .bind(error_message.unwrap_or_default())
                .bind(logs.unwrap_or_default())
                .bind(execution_id)
                .bind(tenant.as_str())
                .execute(&self.pool)
                .await?
            }
            ExecutionStatus::Pending => {
                return Err(crate::Error::ValidationError(
                    "executions cannot be reset to pending".to_string(),
                ))
            }
        };

        Ok(result.rows_affected())
    }

    async fn append_logs(&self, tenant: &TenantId, execution_id: Uuid, logs: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE job_executions \
                SET logs = COALESCE(logs, '') || $1, updated_at = NOW() \
              WHERE id = $2 AND tenant_id = $3",
        )
        .bind(logs)
        .bind(execution_id)
        .bind(tenant.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    #[instrument(
        skip(self),
        fields(
            tenant_id = %tenant.as_str(),
            execution_id = %execution_id,
            status = %status,
        )
    )]
    async fn complete_execution(
        &self,
        tenant: &TenantId,
        execution_id: Uuid,
        status: ExecutionStatus,
        records_processed: i64,
        bytes_transferred: i64,
    ) -> Result<bool> {
        if !status.is_terminal() {
            return Err(crate::Error::ValidationError(format!(
                "completion status must be terminal, got {status}"
            )));
        }

        let result = sqlx::query(
            "UPDATE job_executions \
                SET status = $1, \
                    run_completed_at = NOW(), \
                    updated_at = NOW(), \
                    records_processed = $2, \
                    bytes_transferred = $3 \
              WHERE id = $4 AND tenant_id = $5 \
                AND status IN ('pending', 'running')",
        )
        .bind(status.as_str())
        .bind(records_processed)
        .bind(bytes_transferred)
        .bind(execution_id)
        .bind(tenant.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Nothing matched: either the row is missing or it is already
        // terminal. A repeated report with the same status is a no-op; a
        // conflicting one is an error the endpoint maps to 409.
        let existing = self.get_execution(tenant, execution_id).await?;
        if existing.status == status.as_str() {
            Ok(false)
        } else {
            Err(crate::Error::AlreadyExists(format!(
                "execution {execution_id} already completed as {}",
                existing.status
            )))
        }
    }

    async fn get_execution(&self, tenant: &TenantId, execution_id: Uuid) -> Result<JobExecution> {
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions \
             WHERE id = $1 AND tenant_id = $2"
        );
        sqlx::query_as(&sql)
            .bind(execution_id)
            .bind(tenant.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("execution {execution_id} not found")))
    }

    async fn claim_stale_pending_execution(
        &self,
        older_than_secs: i64,
    ) -> Result<Option<JobExecution>> {
        let sql = "WITH candidate AS ( \
                 SELECT id FROM job_executions \
                 WHERE status = 'pending' \
                   AND created_at < NOW() - make_interval(secs => $1) \
                 ORDER BY created_at \
                 FOR UPDATE SKIP LOCKED \
                 LIMIT 1 \
             ) \
             UPDATE job_executions je \
                SET status = 'running', \
                    run_started_at = COALESCE(je.run_started_at, NOW()), \
                    updated_at = NOW() \
               FROM candidate \
              WHERE je.id = candidate.id \
             RETURNING je.id, je.tenant_id, je.job_definition_id, je.status, je.created_at, \
                       je.updated_at, je.run_started_at, je.run_completed_at, je.error_message, \
                       je.logs, je.records_processed, je.bytes_transferred";
        Ok(sqlx::query_as(sql)
            .bind(older_than_secs as f64)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn last_execution(
        &self,
        tenant: &TenantId,
        definition_id: Uuid,
    ) -> Result<JobExecution> {
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions \
             WHERE job_definition_id = $1 AND tenant_id = $2 \
             ORDER BY created_at DESC \
             LIMIT 1"
        );
        sqlx::query_as(&sql)
            .bind(definition_id)
            .bind(tenant.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                crate::Error::NotFound(format!(
                    "no executions found for definition {definition_id}"
                ))
            })
    }

    async fn list_executions(
        &self,
        tenant: &TenantId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobExecution>> {
        Self::validate_pagination_params(limit, offset)?;

        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions \
             WHERE tenant_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2 OFFSET $3"
        );
        Ok(sqlx::query_as(&sql)
            .bind(tenant.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant.as_str(), window_days))]
    async fn execution_stats(&self, tenant: &TenantId, window_days: i32) -> Result<ExecutionStat> {
        if !(1..=366).contains(&window_days) {
            return Err(crate::Error::ValidationError(
                "window_days must be between 1 and 366".to_string(),
            ));
        }
        let start = Instant::now();

        let per_day: Vec<ExecutionStatDay> = sqlx::query_as(
            "WITH days AS ( \
                 SELECT generate_series( \
                     current_date - make_interval(days => $1 - 1), \
                     current_date, \
                     '1 day'::interval \
                 )::date AS day \
             ) \
             SELECT days.day, \
                    COALESCE(SUM((je.status = 'succeeded')::int), 0)::BIGINT AS succeeded, \
                    COALESCE(SUM((je.status = 'failed')::int), 0)::BIGINT    AS failed, \
                    COALESCE(SUM((je.status = 'running')::int), 0)::BIGINT   AS running, \
                    COALESCE(SUM((je.status = 'pending')::int), 0)::BIGINT   AS pending \
             FROM days \
             LEFT JOIN job_executions je \
                    ON je.created_at::date = days.day AND je.tenant_id = $2 \
             GROUP BY days.day \
             ORDER BY days.day",
        )
        .bind(window_days)
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await?;

        let totals: (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*)::BIGINT, \
                    COALESCE(SUM((status = 'succeeded')::int), 0)::BIGINT, \
                    COALESCE(SUM((status = 'failed')::int), 0)::BIGINT, \
                    COALESCE(SUM((status = 'running')::int), 0)::BIGINT \
             FROM job_executions \
             WHERE tenant_id = $1",
        )
        .bind(tenant.as_str())
        .fetch_one(&self.pool)
        .await?;

        let total_definitions: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::BIGINT FROM job_definitions \
             WHERE tenant_id = $1 AND deleted_at IS NULL",
        )
        .bind(tenant.as_str())
        .fetch_one(&self.pool)
        .await?;

        let (total, succeeded, failed, running) = totals;
        let success_rate = if total > 0 {
            succeeded as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Self::warn_if_slow(start, tenant, "execution_stats");
        Ok(ExecutionStat {
            total,
            succeeded,
            failed,
            running,
            success_rate,
            total_definitions,
            per_day,
        })
    }
}

#[async_trait]
impl NotificationStore for PostgresStorage {
    #[instrument(skip(self, params), fields(event_type = %params.event_type))]
    async fn create_notification(&self, params: CreateNotification) -> Result<Notification> {
        if params.event_type.trim().is_empty() {
            return Err(crate::Error::ValidationError(
                "event type is required".to_string(),
            ));
        }

        let tenant_id = params
            .tenant_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let sql = format!(
            "INSERT INTO notifications (tenant_id, event_type, severity, title, message, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {NOTIFICATION_COLUMNS}"
        );
        Ok(sqlx::query_as(&sql)
            .bind(tenant_id)
            .bind(&params.event_type)
            .bind(&params.severity)
            .bind(&params.title)
            .bind(&params.message)
            .bind(params.metadata.as_ref().map(sqlx::types::Json))
            .fetch_one(&self.pool)
            .await?)
    }

    async fn list_recent(&self, tenant: &TenantId, limit: i64) -> Result<Vec<Notification>> {
        let limit = if (1..=100).contains(&limit) { limit } else { 25 };

        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE tenant_id IS NULL OR tenant_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2"
        );
        Ok(sqlx::query_as(&sql)
            .bind(tenant.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn mark_read(&self, tenant: &TenantId, id: Uuid) -> Result<Notification> {
        let sql = format!(
            "UPDATE notifications \
                SET read_at = COALESCE(read_at, NOW()) \
              WHERE id = $1 AND (tenant_id IS NULL OR tenant_id = $2) \
             RETURNING {NOTIFICATION_COLUMNS}"
        );
        sqlx::query_as(&sql)
            .bind(id)
            .bind(tenant.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("notification {id} not found")))
    }
}
