//! Shared harness for workflow and endpoint tests

use sluice_notify::NotificationService;
use sluice_runtime::{Activities, ExecutionWorkflow};
use sluice_storage::store::{ConnectionStore, JobStore};
use sluice_storage::TenantId;
use sluice_tests::builders::DefinitionBuilder;
use sluice_tests::fixtures;
use sluice_tests::mocks::{MemoryStore, MockRunner};
use std::sync::Arc;
use uuid::Uuid;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub runner: Arc<MockRunner>,
    pub workflow: Arc<ExecutionWorkflow>,
    pub notifier: Arc<NotificationService>,
    // Held so the scratch directory outlives the test.
    #[allow(dead_code)]
    pub temp: tempfile::TempDir,
}

pub fn harness() -> Harness {
    let store = MemoryStore::new();
    let runner = MockRunner::new();
    let temp = tempfile::tempdir().expect("create scratch dir");
    let notifier = Arc::new(NotificationService::new(store.clone(), vec![]));
    let activities = Arc::new(Activities::new(
        store.clone(),
        store.clone(),
        runner.clone(),
        Some(notifier.clone()),
        fixtures::engine_settings(temp.path()),
    ));
    let workflow = Arc::new(ExecutionWorkflow::new(activities));

    Harness {
        store,
        runner,
        workflow,
        notifier,
        temp,
    }
}

/// Create a READY definition with a postgres source and mysql destination
/// under `tenant`. Returns `(definition_id, source_id, dest_id)`.
pub async fn ready_definition(
    store: &Arc<MemoryStore>,
    tenant: &TenantId,
    name: &str,
) -> (Uuid, Uuid, Uuid) {
    let source = store
        .create_connection(tenant, fixtures::postgres_connection(&format!("{name}-src")))
        .await
        .expect("create source connection");
    let dest = store
        .create_connection(tenant, fixtures::mysql_connection(&format!("{name}-dst")))
        .await
        .expect("create dest connection");

    let definition = store
        .create_definition(
            tenant,
            DefinitionBuilder::new(name)
                .simple_ast()
                .connections(source.id, dest.id)
                .status("READY")
                .build(),
        )
        .await
        .expect("create ready definition");

    (definition.id, source.id, dest.id)
}
