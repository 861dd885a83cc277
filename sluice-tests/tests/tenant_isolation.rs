//! Tenant isolation: no operation under one tenant ever observes rows
//! created under another, even when ids collide.

mod common;

use common::{harness, ready_definition};
use sluice_core::{DefinitionUpdate, ExecutionStatus};
use sluice_storage::store::{ConnectionStore, JobStore, NotificationStore};
use sluice_storage::{ConnectionUpdate, CreateNotification, Error};
use sluice_tests::fixtures::{self, tenant};
use uuid::Uuid;

#[tokio::test]
async fn connections_are_tenant_scoped() {
    let h = harness();
    let acme = tenant::acme();
    let globex = tenant::globex();

    let connection = h
        .store
        .create_connection(&acme, fixtures::postgres_connection("shared-name"))
        .await
        .unwrap();

    // Reads, updates, and deletes under the other tenant all miss.
    assert!(matches!(
        h.store.get_connection(&globex, connection.id).await,
        Err(Error::NotFound(_))
    ));
    assert!(h.store.list_connections(&globex).await.unwrap().is_empty());
    assert!(matches!(
        h.store
            .update_connection(
                &globex,
                connection.id,
                ConnectionUpdate {
                    host: Some("stolen".to_string()),
                    ..Default::default()
                },
            )
            .await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        h.store.delete_connection(&globex, connection.id).await,
        Err(Error::NotFound(_))
    ));

    // The name is free for the other tenant.
    h.store
        .create_connection(&globex, fixtures::postgres_connection("shared-name"))
        .await
        .unwrap();

    // And the row is untouched for its owner.
    let mine = h.store.get_connection(&acme, connection.id).await.unwrap();
    assert_eq!(mine.host, "db.internal");
}

#[tokio::test]
async fn definitions_are_tenant_scoped() {
    let h = harness();
    let acme = tenant::acme();
    let globex = tenant::globex();

    let (definition_id, _, _) = ready_definition(&h.store, &acme, "isolated").await;

    assert!(matches!(
        h.store.get_definition(&globex, definition_id).await,
        Err(Error::NotFound(_))
    ));
    assert!(h.store.list_definitions(&globex).await.unwrap().is_empty());
    assert!(matches!(
        h.store
            .update_definition(
                &globex,
                definition_id,
                DefinitionUpdate {
                    description: Some("defaced".to_string()),
                    ..Default::default()
                },
            )
            .await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        h.store.delete_definition(&globex, definition_id).await,
        Err(Error::NotFound(_))
    ));
    assert!(h
        .store
        .list_definitions_with_stats(&globex)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn executions_are_tenant_scoped() {
    let h = harness();
    let acme = tenant::acme();
    let globex = tenant::globex();

    let (definition_id, _, _) = ready_definition(&h.store, &acme, "exec-iso").await;
    let execution = h
        .store
        .create_execution(&acme, definition_id, Uuid::new_v4())
        .await
        .unwrap();

    assert!(matches!(
        h.store.get_execution(&globex, execution.id).await,
        Err(Error::NotFound(_))
    ));
    assert!(h.store.list_executions(&globex, 100, 0).await.unwrap().is_empty());
    assert!(matches!(
        h.store.last_execution(&globex, definition_id).await,
        Err(Error::NotFound(_))
    ));

    // Completion under the wrong tenant cannot touch the row.
    assert!(matches!(
        h.store
            .complete_execution(&globex, execution.id, ExecutionStatus::Succeeded, 1, 1)
            .await,
        Err(Error::NotFound(_))
    ));
    let row = h.store.get_execution(&acme, execution.id).await.unwrap();
    assert_eq!(row.status, "pending");

    // A status move under the wrong tenant affects zero rows.
    let rows = h
        .store
        .update_execution(&globex, execution.id, ExecutionStatus::Running, None, None)
        .await
        .unwrap();
    assert_eq!(rows, 0);

    // Creating an execution against another tenant's definition misses.
    assert!(matches!(
        h.store
            .create_execution(&globex, definition_id, Uuid::new_v4())
            .await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn stats_do_not_leak_across_tenants() {
    let h = harness();
    let acme = tenant::acme();
    let globex = tenant::globex();

    let (definition_id, _, _) = ready_definition(&h.store, &acme, "stats-iso").await;
    for _ in 0..3 {
        let execution = h
            .store
            .create_execution(&acme, definition_id, Uuid::new_v4())
            .await
            .unwrap();
        h.store
            .update_execution(&acme, execution.id, ExecutionStatus::Running, None, None)
            .await
            .unwrap();
        h.store
            .update_execution(&acme, execution.id, ExecutionStatus::Succeeded, None, None)
            .await
            .unwrap();
    }

    let foreign = h.store.execution_stats(&globex, 7).await.unwrap();
    assert_eq!(foreign.total, 0);
    assert_eq!(foreign.total_definitions, 0);
    assert!(foreign.per_day.iter().all(|day| day.succeeded == 0
        && day.failed == 0
        && day.running == 0
        && day.pending == 0));

    let own = h.store.execution_stats(&acme, 7).await.unwrap();
    assert_eq!(own.total, 3);
    assert_eq!(own.succeeded, 3);
}

#[tokio::test]
async fn notifications_respect_tenant_and_global_scope() {
    let h = harness();
    let acme = tenant::acme();
    let globex = tenant::globex();

    let scoped = h
        .store
        .create_notification(CreateNotification {
            tenant_id: Some(acme.as_str().to_string()),
            event_type: "execution_failed".to_string(),
            severity: "error".to_string(),
            title: "private".to_string(),
            message: String::new(),
            metadata: None,
        })
        .await
        .unwrap();
    let global = h
        .store
        .create_notification(CreateNotification {
            tenant_id: None,
            event_type: "validation_complete".to_string(),
            severity: "info".to_string(),
            title: "for everyone".to_string(),
            message: String::new(),
            metadata: None,
        })
        .await
        .unwrap();

    // The other tenant sees only the global row.
    let visible = h.store.list_recent(&globex, 25).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, global.id);

    // And cannot mark the scoped one read.
    assert!(matches!(
        h.store.mark_read(&globex, scoped.id).await,
        Err(Error::NotFound(_))
    ));
    h.store.mark_read(&acme, scoped.id).await.unwrap();
}
