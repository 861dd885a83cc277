//! # Sluice Notify
//!
//! Tenant-scoped notification pipeline. Publishing persists the
//! notification row first (the durable record), then fans the event out to
//! every registered sink. Sink failures are logged and never surfaced to
//! the publisher.

pub mod sinks;

pub use sinks::{EmailNotifier, Mailer, Notifier, PushNotifier};

use serde_json::json;
use sluice_storage::store::NotificationStore;
use sluice_storage::{CreateNotification, Notification, TenantId};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Result type for notification operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for notification operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] sluice_storage::Error),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

/// Lifecycle event types. The snake_case strings are part of the wire
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    ValidationComplete,
    ExecutionStarted,
    ExecutionSucceeded,
    ExecutionFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ValidationComplete => "validation_complete",
            EventType::ExecutionStarted => "execution_started",
            EventType::ExecutionSucceeded => "execution_succeeded",
            EventType::ExecutionFailed => "execution_failed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event to publish. A `None` tenant denotes a system-global event.
#[derive(Debug, Clone)]
pub struct Event {
    pub tenant_id: Option<String>,
    pub event_type: EventType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
}

/// Persists lifecycle events and fans them out to registered sinks.
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    sinks: Vec<Arc<dyn Notifier>>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>, sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { store, sinks }
    }

    /// Persist the notification, then deliver it to every sink with
    /// fire-and-forget semantics: a failing sink is logged and skipped.
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn publish(&self, event: Event) -> Result<Notification> {
        let title = if event.title.trim().is_empty() {
            event.event_type.as_str().to_string()
        } else {
            event.title.trim().to_string()
        };

        let notification = self
            .store
            .create_notification(CreateNotification {
                tenant_id: event
                    .tenant_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string),
                event_type: event.event_type.as_str().to_string(),
                severity: event.severity.as_str().to_string(),
                title,
                message: event.message.trim().to_string(),
                metadata: event.metadata,
            })
            .await?;

        for sink in &self.sinks {
            if let Err(e) = sink.notify(&notification).await {
                warn!(
                    sink = sink.name(),
                    notification_id = %notification.id,
                    error = %e,
                    "notification sink delivery failed"
                );
            }
        }

        Ok(notification)
    }

    pub async fn notify_validation_complete(
        &self,
        tenant: &TenantId,
        definition_id: Uuid,
        definition_name: &str,
    ) -> Result<()> {
        self.publish(Event {
            tenant_id: Some(tenant.as_str().to_string()),
            event_type: EventType::ValidationComplete,
            severity: Severity::Info,
            title: "Validation complete".to_string(),
            message: format!("Job definition {definition_name:?} is ready."),
            metadata: Some(json!({
                "job_definition_id": definition_id,
                "job_definition": definition_name,
            })),
        })
        .await?;
        Ok(())
    }

    pub async fn notify_execution_started(
        &self,
        tenant: &TenantId,
        definition_id: Uuid,
        execution_id: Uuid,
        definition_name: &str,
    ) -> Result<()> {
        let name = fallback_name(definition_name, definition_id);
        self.publish(Event {
            tenant_id: Some(tenant.as_str().to_string()),
            event_type: EventType::ExecutionStarted,
            severity: Severity::Info,
            title: format!("Execution started: {name}"),
            message: format!("Job {name} execution {execution_id} has started."),
            metadata: Some(json!({
                "job_definition_id": definition_id,
                "job_definition": name,
                "execution_id": execution_id,
            })),
        })
        .await?;
        Ok(())
    }

    pub async fn notify_execution_succeeded(
        &self,
        tenant: &TenantId,
        definition_id: Uuid,
        execution_id: Uuid,
        definition_name: &str,
        records_processed: i64,
        bytes_transferred: i64,
    ) -> Result<()> {
        let name = fallback_name(definition_name, definition_id);
        let mut metadata = json!({
            "job_definition_id": definition_id,
            "job_definition": name,
            "execution_id": execution_id,
        });
        if records_processed > 0 {
            metadata["records_processed"] = json!(records_processed);
        }
        if bytes_transferred > 0 {
            metadata["bytes_transferred"] = json!(bytes_transferred);
        }
        self.publish(Event {
            tenant_id: Some(tenant.as_str().to_string()),
            event_type: EventType::ExecutionSucceeded,
            severity: Severity::Info,
            title: format!("Execution succeeded: {name}"),
            message: format!("Job {name} execution {execution_id} completed successfully."),
            metadata: Some(metadata),
        })
        .await?;
        Ok(())
    }

    pub async fn notify_execution_failed(
        &self,
        tenant: &TenantId,
        definition_id: Uuid,
        execution_id: Uuid,
        definition_name: &str,
        reason: &str,
    ) -> Result<()> {
        let name = fallback_name(definition_name, definition_id);
        let reason = match reason.trim() {
            "" => "Unknown error",
            trimmed => trimmed,
        };
        self.publish(Event {
            tenant_id: Some(tenant.as_str().to_string()),
            event_type: EventType::ExecutionFailed,
            severity: Severity::Error,
            title: format!("Execution failed: {name}"),
            message: format!("Job {name} execution {execution_id} failed: {reason}"),
            metadata: Some(json!({
                "job_definition_id": definition_id,
                "job_definition": name,
                "execution_id": execution_id,
                "reason": reason,
            })),
        })
        .await?;
        Ok(())
    }

    /// Recent notifications for a tenant, including global ones.
    /// `limit` outside `1..=100` falls back to 25.
    pub async fn list_recent(&self, tenant: &TenantId, limit: i64) -> Result<Vec<Notification>> {
        Ok(self.store.list_recent(tenant, limit).await?)
    }

    /// Idempotently mark a notification as read.
    pub async fn mark_read(&self, tenant: &TenantId, id: Uuid) -> Result<Notification> {
        Ok(self.store.mark_read(tenant, id).await?)
    }
}

fn fallback_name(name: &str, definition_id: Uuid) -> String {
    match name.trim() {
        "" => definition_id.to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sluice_storage::store::NotificationStore;

    #[derive(Default)]
    struct RecordingStore {
        rows: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl NotificationStore for RecordingStore {
        async fn create_notification(
            &self,
            params: CreateNotification,
        ) -> sluice_storage::Result<Notification> {
            let notification = Notification {
                id: Uuid::new_v4(),
                tenant_id: params.tenant_id,
                event_type: params.event_type,
                severity: params.severity,
                title: params.title,
                message: params.message,
                metadata: params.metadata.map(sqlx::types::Json),
                created_at: chrono::Utc::now(),
                read_at: None,
            };
            self.rows.lock().push(notification.clone());
            Ok(notification)
        }

        async fn list_recent(
            &self,
            tenant: &TenantId,
            limit: i64,
        ) -> sluice_storage::Result<Vec<Notification>> {
            let limit = if (1..=100).contains(&limit) { limit } else { 25 };
            Ok(self
                .rows
                .lock()
                .iter()
                .rev()
                .filter(|n| {
                    n.tenant_id.is_none() || n.tenant_id.as_deref() == Some(tenant.as_str())
                })
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn mark_read(
            &self,
            tenant: &TenantId,
            id: Uuid,
        ) -> sluice_storage::Result<Notification> {
            let mut rows = self.rows.lock();
            let row = rows
                .iter_mut()
                .find(|n| {
                    n.id == id
                        && (n.tenant_id.is_none()
                            || n.tenant_id.as_deref() == Some(tenant.as_str()))
                })
                .ok_or_else(|| {
                    sluice_storage::Error::NotFound(format!("notification {id} not found"))
                })?;
            row.read_at.get_or_insert_with(chrono::Utc::now);
            Ok(row.clone())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl Notifier for FailingSink {
        async fn notify(&self, _notification: &Notification) -> Result<()> {
            Err(Error::InvalidEvent("sink down".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn service_with(sinks: Vec<Arc<dyn Notifier>>) -> (Arc<RecordingStore>, NotificationService) {
        let store = Arc::new(RecordingStore::default());
        let service = NotificationService::new(store.clone(), sinks);
        (store, service)
    }

    #[tokio::test]
    async fn test_publish_persists_before_fanout() {
        let (store, service) = service_with(vec![Arc::new(FailingSink)]);
        let tenant = TenantId::new("tenant-a");

        let result = service
            .notify_execution_started(&tenant, Uuid::new_v4(), Uuid::new_v4(), "daily_sync")
            .await;

        // The failing sink must not surface to the publisher, and the row
        // must exist regardless.
        assert!(result.is_ok());
        assert_eq!(store.rows.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_defaults_title_to_event_name() {
        let (store, service) = service_with(vec![]);
        service
            .publish(Event {
                tenant_id: Some("tenant-a".to_string()),
                event_type: EventType::ExecutionFailed,
                severity: Severity::Error,
                title: "   ".to_string(),
                message: String::new(),
                metadata: None,
            })
            .await
            .unwrap();

        assert_eq!(store.rows.lock()[0].title, "execution_failed");
    }

    #[tokio::test]
    async fn test_succeeded_metadata_omits_zero_metrics() {
        let (store, service) = service_with(vec![]);
        let tenant = TenantId::new("tenant-a");
        service
            .notify_execution_succeeded(&tenant, Uuid::new_v4(), Uuid::new_v4(), "sync", 0, 0)
            .await
            .unwrap();

        let rows = store.rows.lock();
        let metadata = &rows[0].metadata.as_ref().unwrap().0;
        assert!(metadata.get("records_processed").is_none());
        assert!(metadata.get("bytes_transferred").is_none());
    }

    #[tokio::test]
    async fn test_failed_reason_defaults_to_unknown() {
        let (store, service) = service_with(vec![]);
        let tenant = TenantId::new("tenant-a");
        service
            .notify_execution_failed(&tenant, Uuid::new_v4(), Uuid::new_v4(), "sync", "  ")
            .await
            .unwrap();

        assert!(store.rows.lock()[0].message.contains("Unknown error"));
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let (_store, service) = service_with(vec![]);
        let tenant = TenantId::new("tenant-a");
        let notification = service
            .publish(Event {
                tenant_id: Some(tenant.as_str().to_string()),
                event_type: EventType::ValidationComplete,
                severity: Severity::Info,
                title: "t".to_string(),
                message: String::new(),
                metadata: None,
            })
            .await
            .unwrap();

        let first = service.mark_read(&tenant, notification.id).await.unwrap();
        let second = service.mark_read(&tenant, notification.id).await.unwrap();
        assert_eq!(first.read_at, second.read_at);
        assert!(first.read_at.is_some());
    }
}
