//! HTTP handlers for the orchestrator API
//!
//! Identity arrives as trusted gateway headers (`X-Tenant-Id`,
//! `X-User-Id`, `X-Roles`); token validation and RBAC live upstream. The
//! engine completion callback authenticates with the per-execution bearer
//! token minted by the workflow's prepare step.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sluice_core::{DefinitionStatus, DefinitionUpdate, ExecutionStatus, Identity, ResolvedDefinition, Role};
use sluice_notify::NotificationService;
use sluice_runtime::token::verify_callback_token;
use sluice_runtime::{ExecutionParams, ExecutionWorkflow};
use sluice_storage::store::{ConnectionStore, JobStore};
use sluice_storage::{ConnectionUpdate, NewConnection, NewDefinition, TenantId};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub connections: Arc<dyn ConnectionStore>,
    pub notifier: Arc<NotificationService>,
    pub workflow: Arc<ExecutionWorkflow>,
    pub jwt_secret: Arc<Vec<u8>>,
    pub workflow_permits: Arc<Semaphore>,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Launch an execution workflow on a background task, bounded by the
    /// worker's concurrency cap. Cancellation cascades from the shutdown
    /// token.
    pub fn spawn_workflow(&self, params: ExecutionParams) {
        let workflow = self.workflow.clone();
        let permits = self.workflow_permits.clone();
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let execution_id = params.execution_id;
            match workflow.run(params, cancel).await {
                Ok(()) => {
                    info!(execution_id = %execution_id, "Execution workflow completed");
                }
                Err(e) => {
                    error!(execution_id = %execution_id, error = %e, "Execution workflow failed");
                }
            }
        });
    }
}

/// Build the worker router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/connections", post(create_connection).get(list_connections))
        .route(
            "/api/connections/{id}",
            get(get_connection).put(update_connection).delete(delete_connection),
        )
        .route("/api/jobs/definitions", post(create_definition).get(list_definitions))
        .route("/api/jobs/definitions/draft", post(create_draft))
        .route("/api/jobs/definitions/stats", get(list_definitions_with_stats))
        .route(
            "/api/jobs/definitions/{id}",
            get(get_definition).patch(autosave_definition).delete(delete_definition),
        )
        .route("/api/jobs/definitions/{id}/validate", post(validate_definition))
        .route("/api/jobs/definitions/{id}/ready", post(mark_definition_ready))
        .route("/api/jobs/definitions/{id}/run", post(run_definition))
        .route("/api/jobs/definitions/{id}/status", get(definition_status))
        .route("/api/jobs/executions", get(list_executions))
        .route("/api/jobs/executions/stats", get(execution_stats))
        .route("/api/jobs/executions/{id}", get(get_execution))
        .route("/api/jobs/executions/{id}/complete", post(complete_execution))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/{id}/read", post(mark_notification_read))
        .with_state(state)
}

// ========== Errors ==========

/// API error mapped onto a response status.
#[derive(Debug)]
pub enum ApiError {
    Unauthenticated(&'static str),
    Forbidden,
    BadRequest(String),
    NotFound(&'static str),
    Conflict(String),
    Validation(Vec<String>),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Insufficient role").into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "valid": false, "errors": errors })),
            )
                .into_response(),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

fn storage_error(e: sluice_storage::Error, not_found: &'static str) -> ApiError {
    use sluice_storage::Error;

    match e {
        Error::NotFound(_) => ApiError::NotFound(not_found),
        Error::AlreadyExists(msg) => ApiError::Conflict(msg),
        Error::NotReady(msg) => ApiError::Conflict(format!("job definition not ready: {msg}")),
        Error::ValidationError(msg) | Error::TenantViolation(msg) => ApiError::BadRequest(msg),
        Error::Database(e) => ApiError::Internal(e.to_string()),
        Error::Crypto(msg) | Error::Migration(msg) => ApiError::Internal(msg),
    }
}

// ========== Identity ==========

/// Read the gateway-injected identity headers. A missing tenant is
/// unauthenticated; roles normalize with a viewer default.
fn identity_from_headers(headers: &HeaderMap) -> Result<Identity, ApiError> {
    let tenant = headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthenticated("Missing tenant context"))?;
    let user = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let roles: Vec<String> = headers
        .get("x-roles")
        .and_then(|v| v.to_str().ok())
        .map(|raw| raw.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    Ok(Identity::new(tenant, user, &roles))
}

fn require_role(identity: &Identity, required: Role) -> Result<TenantId, ApiError> {
    if !identity.has_at_least(required) {
        return Err(ApiError::Forbidden);
    }
    Ok(TenantId::new(identity.tenant_id.clone()))
}

fn tenant_of(identity: &Identity) -> TenantId {
    TenantId::new(identity.tenant_id.clone())
}

// ========== Health ==========

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

// ========== Connections ==========

#[derive(Debug, Deserialize)]
struct CreateConnectionPayload {
    name: String,
    data_format: String,
    host: String,
    port: i32,
    username: String,
    password: String,
    db_name: String,
}

async fn create_connection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateConnectionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = require_role(&identity, Role::Editor)?;

    let connection = state
        .connections
        .create_connection(
            &tenant,
            NewConnection {
                name: payload.name,
                data_format: payload.data_format,
                host: payload.host,
                port: payload.port,
                username: payload.username,
                password: payload.password,
                db_name: payload.db_name,
            },
        )
        .await
        .map_err(|e| storage_error(e, "Connection not found"))?;

    Ok((StatusCode::CREATED, Json(connection)))
}

#[derive(Debug, Deserialize)]
struct UpdateConnectionPayload {
    name: Option<String>,
    data_format: Option<String>,
    host: Option<String>,
    port: Option<i32>,
    username: Option<String>,
    password: Option<String>,
    db_name: Option<String>,
    status: Option<String>,
}

async fn update_connection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<UpdateConnectionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = require_role(&identity, Role::Editor)?;

    let connection = state
        .connections
        .update_connection(
            &tenant,
            id,
            ConnectionUpdate {
                name: payload.name,
                data_format: payload.data_format,
                host: payload.host,
                port: payload.port,
                username: payload.username,
                password: payload.password,
                db_name: payload.db_name,
                status: payload.status,
            },
        )
        .await
        .map_err(|e| storage_error(e, "Connection not found"))?;

    Ok(Json(connection))
}

async fn delete_connection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = require_role(&identity, Role::Admin)?;

    state
        .connections
        .delete_connection(&tenant, id)
        .await
        .map_err(|e| storage_error(e, "Connection not found"))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_connection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = tenant_of(&identity);

    let connection = state
        .connections
        .get_connection(&tenant, id)
        .await
        .map_err(|e| storage_error(e, "Connection not found"))?;
    Ok(Json(connection))
}

async fn list_connections(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = tenant_of(&identity);

    let connections = state
        .connections
        .list_connections(&tenant)
        .await
        .map_err(|e| storage_error(e, "Connection not found"))?;
    Ok(Json(connections))
}

// ========== Definitions ==========

#[derive(Debug, Default, Deserialize)]
struct CreateDefinitionPayload {
    name: String,
    #[serde(default)]
    description: String,
    ast: Option<serde_json::Value>,
    source_connection_id: Option<Uuid>,
    destination_connection_id: Option<Uuid>,
    progress_snapshot: Option<serde_json::Value>,
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UpdateDefinitionPayload {
    name: Option<String>,
    description: Option<String>,
    ast: Option<serde_json::Value>,
    source_connection_id: Option<String>,
    destination_connection_id: Option<String>,
    progress_snapshot: Option<serde_json::Value>,
    status: Option<String>,
}

impl UpdateDefinitionPayload {
    fn has_changes(&self) -> bool {
        self.name.is_some()
            || self.description.is_some()
            || self.ast.is_some()
            || self.source_connection_id.is_some()
            || self.destination_connection_id.is_some()
            || self.progress_snapshot.is_some()
            || self.status.is_some()
    }

    fn into_update(self, status: Option<DefinitionStatus>) -> DefinitionUpdate {
        DefinitionUpdate {
            name: self.name,
            description: self.description,
            ast: self.ast,
            source_connection_id: self.source_connection_id,
            destination_connection_id: self.destination_connection_id,
            status,
            progress_snapshot: self.progress_snapshot,
        }
    }
}

async fn create_definition(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateDefinitionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    create_definition_with_status(state, headers, payload, None).await
}

async fn create_draft(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateDefinitionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    create_definition_with_status(state, headers, payload, Some(DefinitionStatus::Draft)).await
}

async fn create_definition_with_status(
    state: AppState,
    headers: HeaderMap,
    payload: CreateDefinitionPayload,
    forced_status: Option<DefinitionStatus>,
) -> Result<(StatusCode, Json<sluice_storage::JobDefinition>), ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = require_role(&identity, Role::Editor)?;

    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Name is required".to_string()));
    }

    let status = match forced_status {
        Some(status) => status,
        None => DefinitionStatus::parse(payload.status.as_deref().unwrap_or_default())
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
    };

    let definition = state
        .jobs
        .create_definition(
            &tenant,
            NewDefinition {
                name,
                description: payload.description,
                ast: payload.ast,
                source_connection_id: payload.source_connection_id,
                destination_connection_id: payload.destination_connection_id,
                status: status.as_str().to_string(),
                progress_snapshot: payload.progress_snapshot,
            },
        )
        .await
        .map_err(|e| match e {
            sluice_storage::Error::ValidationError(msg) => {
                ApiError::Validation(msg.split(", ").map(str::to_string).collect())
            }
            other => storage_error(other, "Job definition not found"),
        })?;

    Ok((StatusCode::CREATED, Json(definition)))
}

async fn list_definitions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = tenant_of(&identity);

    let definitions = state
        .jobs
        .list_definitions(&tenant)
        .await
        .map_err(|e| storage_error(e, "Job definition not found"))?;
    Ok(Json(definitions))
}

async fn list_definitions_with_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = tenant_of(&identity);

    let stats = state
        .jobs
        .list_definitions_with_stats(&tenant)
        .await
        .map_err(|e| storage_error(e, "Job definition not found"))?;
    Ok(Json(stats))
}

async fn get_definition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = tenant_of(&identity);

    let definition = state
        .jobs
        .get_definition(&tenant, id)
        .await
        .map_err(|e| storage_error(e, "Job definition not found"))?;
    Ok(Json(definition))
}

/// Autosave: apply a partial update. Any field change on a READY
/// definition demotes it to DRAFT unless the payload pins a status.
async fn autosave_definition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<UpdateDefinitionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = require_role(&identity, Role::Editor)?;

    if let Some(name) = &payload.name {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("Name cannot be empty".to_string()));
        }
    }

    let current = state
        .jobs
        .get_definition(&tenant, id)
        .await
        .map_err(|e| storage_error(e, "Job definition not found"))?;

    let status = match &payload.status {
        Some(raw) => {
            Some(DefinitionStatus::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))?)
        }
        None if current.status == DefinitionStatus::Ready.as_str() && payload.has_changes() => {
            Some(DefinitionStatus::Draft)
        }
        None => None,
    };

    let definition = state
        .jobs
        .update_definition(&tenant, id, payload.into_update(status))
        .await
        .map_err(|e| storage_error(e, "Job definition not found"))?;
    Ok(Json(definition))
}

/// Request validation: overlay the payload on the persisted definition,
/// collect missing-field errors, and move to VALIDATING when clean.
async fn validate_definition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    payload: Option<Json<UpdateDefinitionPayload>>,
) -> Result<impl IntoResponse, ApiError> {
    resolve_and_transition(state, id, headers, payload, DefinitionStatus::Validating).await
}

/// Validation succeeded: same resolution as `validate_definition`, but the
/// definition lands in READY and a validation-complete notification goes
/// out.
async fn mark_definition_ready(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    payload: Option<Json<UpdateDefinitionPayload>>,
) -> Result<impl IntoResponse, ApiError> {
    resolve_and_transition(state, id, headers, payload, DefinitionStatus::Ready).await
}

async fn resolve_and_transition(
    state: AppState,
    id: Uuid,
    headers: HeaderMap,
    payload: Option<Json<UpdateDefinitionPayload>>,
    target: DefinitionStatus,
) -> Result<Json<serde_json::Value>, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = require_role(&identity, Role::Editor)?;
    let payload = payload.map(|Json(p)| p).unwrap_or_default();

    let current = state
        .jobs
        .get_definition(&tenant, id)
        .await
        .map_err(|e| storage_error(e, "Job definition not found"))?;

    let update = DefinitionUpdate {
        name: payload.name.clone(),
        description: payload.description.clone(),
        ast: payload.ast.clone(),
        source_connection_id: payload.source_connection_id.clone(),
        destination_connection_id: payload.destination_connection_id.clone(),
        status: Some(target),
        progress_snapshot: payload.progress_snapshot.clone(),
    };

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
        return Err(ApiError::Validation(errors));
    }

    let definition = state
        .jobs
        .update_definition(&tenant, id, update)
        .await
        .map_err(|e| storage_error(e, "Job definition not found"))?;

    if target == DefinitionStatus::Ready {
        if let Err(e) = state
            .notifier
            .notify_validation_complete(&tenant, definition.id, &definition.name)
            .await
        {
            warn!(
                job_definition_id = %definition.id,
                error = %e,
                "failed to publish validation notification"
            );
        }
    }

    Ok(Json(json!({ "valid": true, "definition": definition })))
}

async fn delete_definition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = require_role(&identity, Role::Admin)?;

    state
        .jobs
        .delete_definition(&tenant, id)
        .await
        .map_err(|e| storage_error(e, "Job definition not found"))?;
    Ok(StatusCode::NO_CONTENT)
}

// ========== Executions ==========

/// Start a run: mint the execution id here so retried scheduling cannot
/// double-execute, then hand the workflow to a background task.
async fn run_definition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = require_role(&identity, Role::Editor)?;

    // Surface a clean 409 up front instead of burying NotReady in the
    // workflow logs; the workflow re-checks atomically regardless.
    let definition = state
        .jobs
        .get_definition(&tenant, id)
        .await
        .map_err(|e| storage_error(e, "Job definition not found"))?;
    if definition.status != DefinitionStatus::Ready.as_str() {
        return Err(ApiError::Conflict(format!(
            "job definition not ready: current status {}",
            definition.status
        )));
    }

    let execution_id = Uuid::new_v4();
    state.spawn_workflow(ExecutionParams {
        tenant_id: tenant,
        execution_id,
        job_definition_id: id,
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Job execution started.",
            "execution_id": execution_id,
        })),
    ))
}

async fn definition_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = tenant_of(&identity);

    let execution = state
        .jobs
        .last_execution(&tenant, id)
        .await
        .map_err(|e| storage_error(e, "Job execution not found"))?;
    Ok(Json(execution))
}

#[derive(Debug, Deserialize)]
struct ListExecutionsQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionsQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = tenant_of(&identity);

    let executions = state
        .jobs
        .list_executions(
            &tenant,
            query.limit.unwrap_or(20),
            query.offset.unwrap_or(0),
        )
        .await
        .map_err(|e| storage_error(e, "Job execution not found"))?;
    Ok(Json(executions))
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    days: Option<i32>,
}

async fn execution_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = tenant_of(&identity);

    let stats = state
        .jobs
        .execution_stats(&tenant, query.days.unwrap_or(31))
        .await
        .map_err(|e| storage_error(e, "Job execution not found"))?;
    Ok(Json(stats))
}

async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = tenant_of(&identity);

    let execution = state
        .jobs
        .get_execution(&tenant, id)
        .await
        .map_err(|e| storage_error(e, "Job execution not found"))?;
    Ok(Json(execution))
}

// ========== Completion callback ==========

#[derive(Debug, Deserialize, Serialize)]
pub struct CompleteRequest {
    pub status: String,
    #[serde(default)]
    pub records_processed: i64,
    #[serde(default)]
    pub bytes_transferred: i64,
}

/// Engine completion report. Authorized by the short-lived token minted at
/// prepare time: `sub` must equal the path's execution id and `tid` the
/// execution's tenant. Idempotent: a repeated report with the same
/// terminal status is a no-op; a conflicting one returns 409.
async fn complete_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<CompleteRequest>,
) -> Result<StatusCode, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthenticated("Missing bearer token"))?;

    let claims = verify_callback_token(token, &state.jwt_secret)
        .map_err(|_| ApiError::Unauthenticated("Invalid callback token"))?;
    if claims.sub != execution_id.to_string() {
        return Err(ApiError::Unauthenticated("Token not bound to execution"));
    }
    let tenant = TenantId::new(claims.tid);

    let status = ExecutionStatus::parse(&body.status)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if !status.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "completion status must be succeeded or failed, got {status}"
        )));
    }

    let applied = state
        .jobs
        .complete_execution(
            &tenant,
            execution_id,
            status,
            body.records_processed,
            body.bytes_transferred,
        )
        .await
        .map_err(|e| storage_error(e, "Job execution not found"))?;

    if applied {
        notify_completion(&state, &tenant, execution_id).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Emit the terminal-status notification for a freshly completed
/// execution. Best-effort: a failure here never fails the callback.
async fn notify_completion(state: &AppState, tenant: &TenantId, execution_id: Uuid) {
    let execution = match state.jobs.get_execution(tenant, execution_id).await {
        Ok(execution) => execution,
        Err(e) => {
            warn!(execution_id = %execution_id, error = %e, "failed to reload execution for notification");
            return;
        }
    };
    let definition_name = state
        .jobs
        .get_definition(tenant, execution.job_definition_id)
        .await
        .map(|d| d.name)
        .unwrap_or_default();

    let result = match ExecutionStatus::parse(&execution.status) {
        Ok(ExecutionStatus::Succeeded) => {
            state
                .notifier
                .notify_execution_succeeded(
                    tenant,
                    execution.job_definition_id,
                    execution_id,
                    &definition_name,
                    execution.records_processed.unwrap_or(0),
                    execution.bytes_transferred.unwrap_or(0),
                )
                .await
        }
        Ok(ExecutionStatus::Failed) => {
            state
                .notifier
                .notify_execution_failed(
                    tenant,
                    execution.job_definition_id,
                    execution_id,
                    &definition_name,
                    execution.error_message.as_deref().unwrap_or_default(),
                )
                .await
        }
        _ => return,
    };
    if let Err(e) = result {
        warn!(execution_id = %execution_id, error = %e, "failed to publish completion notification");
    }
}

// ========== Notifications ==========

#[derive(Debug, Deserialize)]
struct ListNotificationsQuery {
    limit: Option<i64>,
}

async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<ListNotificationsQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = tenant_of(&identity);

    let notifications = state
        .notifier
        .list_recent(&tenant, query.limit.unwrap_or(25))
        .await
        .map_err(|e| match e {
            sluice_notify::Error::Storage(e) => storage_error(e, "Notification not found"),
            sluice_notify::Error::InvalidEvent(msg) => ApiError::BadRequest(msg),
        })?;
    Ok(Json(notifications))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let tenant = tenant_of(&identity);

    let notification = state
        .notifier
        .mark_read(&tenant, id)
        .await
        .map_err(|e| match e {
            sluice_notify::Error::Storage(e) => storage_error(e, "Notification not found"),
            sluice_notify::Error::InvalidEvent(msg) => ApiError::BadRequest(msg),
        })?;
    Ok(Json(notification))
}
