//! Notification pipeline: durable persist-then-fanout and sink behavior
//! against a real HTTP endpoint.

mod common;

use common::harness;
use sluice_notify::{Event, EventType, NotificationService, Notifier, PushNotifier, Severity};
use sluice_storage::TenantId;
use sluice_tests::mocks::MemoryStore;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn event(tenant: &TenantId) -> Event {
    Event {
        tenant_id: Some(tenant.as_str().to_string()),
        event_type: EventType::ExecutionSucceeded,
        severity: Severity::Info,
        title: "Execution succeeded: daily_sync".to_string(),
        message: "Job daily_sync finished.".to_string(),
        metadata: None,
    }
}

#[tokio::test]
async fn push_sink_delivers_to_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/sluice"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let sink: Arc<dyn Notifier> =
        Arc::new(PushNotifier::new(Some(format!("{}/hooks/sluice", server.uri()))));
    let service = NotificationService::new(store.clone(), vec![sink]);

    let tenant = TenantId::new("tenant-acme");
    service.publish(event(&tenant)).await.unwrap();

    // The row is durable regardless of sink outcome.
    assert_eq!(store.notifications().len(), 1);
    server.verify().await;
}

#[tokio::test]
async fn failing_push_sink_never_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let sink: Arc<dyn Notifier> = Arc::new(PushNotifier::new(Some(server.uri())));
    let service = NotificationService::new(store.clone(), vec![sink]);

    let tenant = TenantId::new("tenant-acme");
    let published = service.publish(event(&tenant)).await;

    assert!(published.is_ok());
    assert_eq!(store.notifications().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn workflow_lifecycle_emits_started_and_terminal_events() {
    let h = harness();
    let tenant = sluice_tests::fixtures::tenant::acme();
    let (definition_id, _, _) = common::ready_definition(&h.store, &tenant, "noisy").await;

    h.runner.push_exit(0, "ok\n", "");
    let params = sluice_runtime::ExecutionParams {
        tenant_id: tenant.clone(),
        execution_id: uuid::Uuid::new_v4(),
        job_definition_id: definition_id,
    };
    h.workflow
        .run(params, tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();

    let events: Vec<String> = h
        .store
        .notifications()
        .into_iter()
        .map(|n| n.event_type)
        .collect();
    assert!(events.contains(&"execution_started".to_string()));
    assert!(events.contains(&"execution_succeeded".to_string()));
}
