//! Definition lifecycle: draft, autosave, validation, READY invariant,
//! and the append-only snapshot history.

mod common;

use common::harness;
use serde_json::json;
use sluice_core::{DefinitionStatus, DefinitionUpdate, ResolvedDefinition};
use sluice_storage::store::{ConnectionStore, JobStore};
use sluice_tests::builders::DefinitionBuilder;
use sluice_tests::fixtures::{self, tenant};

fn resolved(definition: &sluice_storage::JobDefinition, update: &DefinitionUpdate) -> ResolvedDefinition {
    ResolvedDefinition::resolve(
        &definition.name,
        &definition.description,
        definition.ast.as_ref().map(|json| &json.0),
        definition
            .source_connection_id
            .map(|c| c.to_string())
            .as_deref(),
        definition
            .destination_connection_id
            .map(|c| c.to_string())
            .as_deref(),
        update,
    )
}

#[tokio::test]
async fn draft_to_ready_happy_path() {
    let h = harness();
    let tenant = tenant::acme();

    // Start from a bare draft named daily_sync.
    let draft = h
        .store
        .create_definition(&tenant, DefinitionBuilder::new("daily_sync").build())
        .await
        .unwrap();
    assert_eq!(draft.status, "DRAFT");

    // Autosave the AST, then attach connections.
    let conn_x = h
        .store
        .create_connection(&tenant, fixtures::postgres_connection("conn_x"))
        .await
        .unwrap();
    let conn_y = h
        .store
        .create_connection(&tenant, fixtures::mysql_connection("conn_y"))
        .await
        .unwrap();

    let autosaved = h
        .store
        .update_definition(
            &tenant,
            draft.id,
            DefinitionUpdate {
                ast: Some(json!({"steps": []})),
                source_connection_id: Some(conn_x.id.to_string()),
                destination_connection_id: Some(conn_y.id.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(autosaved.status, "DRAFT");

    // Request validation: the resolved fields are complete, so the
    // definition moves to VALIDATING.
    let update = DefinitionUpdate {
        status: Some(DefinitionStatus::Validating),
        ..Default::default()
    };
    assert!(resolved(&autosaved, &update).validate().is_empty());
    let validating = h
        .store
        .update_definition(&tenant, draft.id, update)
        .await
        .unwrap();
    assert_eq!(validating.status, "VALIDATING");

    // Validation succeeded: mark ready.
    let ready = h
        .store
        .update_definition(
            &tenant,
            draft.id,
            DefinitionUpdate {
                status: Some(DefinitionStatus::Ready),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(ready.status, "READY");
}

#[tokio::test]
async fn ready_create_rejects_missing_ast() {
    let h = harness();
    let tenant = tenant::acme();

    let conn_x = h
        .store
        .create_connection(&tenant, fixtures::postgres_connection("conn_x"))
        .await
        .unwrap();
    let conn_y = h
        .store
        .create_connection(&tenant, fixtures::mysql_connection("conn_y"))
        .await
        .unwrap();

    let err = h
        .store
        .create_definition(
            &tenant,
            DefinitionBuilder::new("no_ast")
                .connections(conn_x.id, conn_y.id)
                .status("READY")
                .build(),
        )
        .await
        .unwrap_err();

    match err {
        sluice_storage::Error::ValidationError(msg) => {
            assert!(msg.contains("ast is required"), "got {msg:?}");
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    // No row was written.
    assert!(h.store.list_definitions(&tenant).await.unwrap().is_empty());
}

#[tokio::test]
async fn cross_tenant_connection_reference_rejected() {
    let h = harness();
    let acme = tenant::acme();
    let globex = tenant::globex();

    let foreign = h
        .store
        .create_connection(&globex, fixtures::postgres_connection("conn_z"))
        .await
        .unwrap();
    let local = h
        .store
        .create_connection(&acme, fixtures::mysql_connection("local"))
        .await
        .unwrap();

    // Creation under tenant A referencing tenant B's connection fails.
    let err = h
        .store
        .create_definition(
            &acme,
            DefinitionBuilder::new("leaky")
                .simple_ast()
                .connections(foreign.id, local.id)
                .status("READY")
                .build(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, sluice_storage::Error::TenantViolation(_)));

    // Same for an update on an existing draft; the row must not change.
    let draft = h
        .store
        .create_definition(&acme, DefinitionBuilder::new("leaky").build())
        .await
        .unwrap();
    let err = h
        .store
        .update_definition(
            &acme,
            draft.id,
            DefinitionUpdate {
                source_connection_id: Some(foreign.id.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, sluice_storage::Error::TenantViolation(_)));

    let unchanged = h.store.get_definition(&acme, draft.id).await.unwrap();
    assert_eq!(unchanged.source_connection_id, None);
}

#[tokio::test]
async fn ready_demotes_to_draft_on_autosave() {
    let h = harness();
    let tenant = tenant::acme();
    let (definition_id, _, _) = common::ready_definition(&h.store, &tenant, "demote").await;

    let demoted = h
        .store
        .update_definition(
            &tenant,
            definition_id,
            DefinitionUpdate {
                description: Some("tweaked".to_string()),
                status: Some(DefinitionStatus::Draft),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(demoted.status, "DRAFT");
}

#[tokio::test]
async fn draft_cannot_jump_straight_to_ready() {
    let h = harness();
    let tenant = tenant::acme();

    let draft = h
        .store
        .create_definition(
            &tenant,
            DefinitionBuilder::new("impatient").simple_ast().build(),
        )
        .await
        .unwrap();

    let err = h
        .store
        .update_definition(
            &tenant,
            draft.id,
            DefinitionUpdate {
                status: Some(DefinitionStatus::Ready),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, sluice_storage::Error::ValidationError(_)));
}

#[tokio::test]
async fn snapshots_are_append_only() {
    let h = harness();
    let tenant = tenant::acme();

    let draft = h
        .store
        .create_definition(
            &tenant,
            DefinitionBuilder::new("snapshotted")
                .progress_snapshot(json!({"step": 1}))
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(h.store.snapshot_count(draft.id), 1);

    for step in 2..=4 {
        h.store
            .update_definition(
                &tenant,
                draft.id,
                DefinitionUpdate {
                    progress_snapshot: Some(json!({"step": step})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
    assert_eq!(h.store.snapshot_count(draft.id), 4);

    // History is never rewritten: every entry is distinct and ordered.
    let snapshots = h.store.list_snapshots(&tenant, draft.id).await.unwrap();
    assert_eq!(snapshots.len(), 4);
    let mut ids: Vec<_> = snapshots.iter().map(|s| s.id).collect();
    ids.dedup();
    assert_eq!(ids.len(), 4);

    // An update without a snapshot appends nothing.
    h.store
        .update_definition(
            &tenant,
            draft.id,
            DefinitionUpdate {
                description: Some("no snapshot here".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(h.store.snapshot_count(draft.id), 4);
}

#[tokio::test]
async fn ready_name_unique_per_tenant() {
    let h = harness();
    let acme = tenant::acme();
    let globex = tenant::globex();

    common::ready_definition(&h.store, &acme, "nightly").await;

    // Same name under the same tenant is rejected while READY.
    let conn_a = h
        .store
        .create_connection(&acme, fixtures::postgres_connection("extra-src"))
        .await
        .unwrap();
    let conn_b = h
        .store
        .create_connection(&acme, fixtures::mysql_connection("extra-dst"))
        .await
        .unwrap();
    let err = h
        .store
        .create_definition(
            &acme,
            DefinitionBuilder::new("nightly")
                .simple_ast()
                .connections(conn_a.id, conn_b.id)
                .status("READY")
                .build(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, sluice_storage::Error::AlreadyExists(_)));

    // Drafts may reuse the name, and other tenants are unaffected.
    h.store
        .create_definition(&acme, DefinitionBuilder::new("nightly").build())
        .await
        .unwrap();
    common::ready_definition(&h.store, &globex, "nightly").await;
}

#[tokio::test]
async fn missing_fields_are_all_collected() {
    let empty = ResolvedDefinition::default();
    assert_eq!(
        empty.validate(),
        vec![
            "name is required",
            "ast is required",
            "source_connection_id is required",
            "destination_connection_id is required",
        ]
    );
}

#[tokio::test]
async fn soft_deleted_definition_disappears() {
    let h = harness();
    let tenant = tenant::acme();
    let (definition_id, _, _) = common::ready_definition(&h.store, &tenant, "gone").await;

    h.store.delete_definition(&tenant, definition_id).await.unwrap();

    assert!(matches!(
        h.store.get_definition(&tenant, definition_id).await,
        Err(sluice_storage::Error::NotFound(_))
    ));
    assert!(h.store.list_definitions(&tenant).await.unwrap().is_empty());

    // The freed name is reusable by a new READY definition.
    let src = h
        .store
        .create_connection(&tenant, fixtures::postgres_connection("reuse-src"))
        .await
        .unwrap();
    let dst = h
        .store
        .create_connection(&tenant, fixtures::mysql_connection("reuse-dst"))
        .await
        .unwrap();
    h.store
        .create_definition(
            &tenant,
            DefinitionBuilder::new("gone")
                .simple_ast()
                .connections(src.id, dst.id)
                .status("READY")
                .build(),
        )
        .await
        .unwrap();
}
