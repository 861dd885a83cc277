//! Database models for Sluice metadata

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Stored data-connection endpoint. The password column holds AES-GCM
/// ciphertext and is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Connection {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub data_format: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: Vec<u8>,
    pub db_name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a connection. `password` is plaintext here and
/// is encrypted before it touches the database.
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub name: String,
    pub data_format: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    pub password: String,
    pub db_name: String,
}

/// Partial update for a connection; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
    pub name: Option<String>,
    pub data_format: Option<String>,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db_name: Option<String>,
    pub status: Option<String>,
}

/// Job definition row. Connection references are same-tenant by invariant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobDefinition {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub description: String,
    pub ast: Option<sqlx::types::Json<serde_json::Value>>,
    pub source_connection_id: Option<Uuid>,
    pub destination_connection_id: Option<Uuid>,
    pub status: String,
    pub progress_snapshot: Option<sqlx::types::Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a definition.
#[derive(Debug, Clone, Default)]
pub struct NewDefinition {
    pub name: String,
    pub description: String,
    pub ast: Option<serde_json::Value>,
    pub source_connection_id: Option<Uuid>,
    pub destination_connection_id: Option<Uuid>,
    pub status: String,
    pub progress_snapshot: Option<serde_json::Value>,
}

/// Append-only autosave history entry for a definition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobDefinitionSnapshot {
    pub id: Uuid,
    pub job_definition_id: Uuid,
    pub status: String,
    pub snapshot: sqlx::types::Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A single run attempt of a definition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobExecution {
    pub id: Uuid,
    pub tenant_id: String,
    pub job_definition_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub run_started_at: Option<DateTime<Utc>>,
    pub run_completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub logs: Option<String>,
    pub records_processed: Option<i64>,
    pub bytes_transferred: Option<i64>,
}

/// Lifecycle event addressed to a tenant; a null tenant denotes a
/// system-global event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub tenant_id: Option<String>,
    pub event_type: String,
    pub severity: String,
    pub title: String,
    pub message: String,
    pub metadata: Option<sqlx::types::Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Parameters for persisting a notification.
#[derive(Debug, Clone, Default)]
pub struct CreateNotification {
    pub tenant_id: Option<String>,
    pub event_type: String,
    pub severity: String,
    pub title: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
}

/// Execution counts for a single day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExecutionStatDay {
    pub day: NaiveDate,
    pub succeeded: i64,
    pub failed: i64,
    pub running: i64,
    pub pending: i64,
}

/// Aggregated execution stats over a window, plus per-day details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStat {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub running: i64,
    pub success_rate: f64,
    pub total_definitions: i64,
    pub per_day: Vec<ExecutionStatDay>,
}

/// A definition with its run metrics. Definitions that have never run
/// report zero runs and no last status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinitionStat {
    #[serde(flatten)]
    pub definition: JobDefinition,
    pub total_runs: i64,
    pub last_run_status: Option<String>,
    pub total_bytes_transferred: i64,
    pub avg_duration_seconds: Option<f64>,
}
