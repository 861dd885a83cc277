//! Completion callback endpoint: token binding, idempotency, and the
//! conflict hardening for late reports.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{harness, ready_definition, Harness};
use serde_json::json;
use sluice_core::ExecutionStatus;
use sluice_runtime::token::mint_callback_token;
use sluice_storage::store::JobStore;
use sluice_storage::TenantId;
use sluice_worker::handlers::{router, AppState};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

const JWT_SECRET: &[u8] = b"test-jwt-secret";

fn app(h: &Harness) -> axum::Router {
    router(AppState {
        jobs: h.store.clone(),
        connections: h.store.clone(),
        notifier: h.notifier.clone(),
        workflow: h.workflow.clone(),
        jwt_secret: Arc::new(JWT_SECRET.to_vec()),
        workflow_permits: Arc::new(Semaphore::new(4)),
        shutdown: CancellationToken::new(),
    })
}

fn complete_request(execution_id: Uuid, token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/jobs/executions/{execution_id}/complete"))
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn running_execution(h: &Harness, tenant: &TenantId) -> Uuid {
    let (definition_id, _, _) = ready_definition(&h.store, tenant, &format!("cb-{}", Uuid::new_v4())).await;
    let execution = h
        .store
        .create_execution(tenant, definition_id, Uuid::new_v4())
        .await
        .unwrap();
    h.store
        .update_execution(tenant, execution.id, ExecutionStatus::Running, None, None)
        .await
        .unwrap();
    execution.id
}

#[tokio::test]
async fn valid_report_completes_execution() {
    let h = harness();
    let tenant = sluice_tests::fixtures::tenant::acme();
    let execution_id = running_execution(&h, &tenant).await;
    let token = mint_callback_token(execution_id, tenant.as_str(), JWT_SECRET).unwrap();

    let response = app(&h)
        .oneshot(complete_request(
            execution_id,
            &token,
            json!({ "status": "succeeded", "records_processed": 1000, "bytes_transferred": 12345 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let execution = h.store.get_execution(&tenant, execution_id).await.unwrap();
    assert_eq!(execution.status, "succeeded");
    assert_eq!(execution.records_processed, Some(1000));
    assert_eq!(execution.bytes_transferred, Some(12345));

    // The completion emitted exactly one notification.
    let events: Vec<_> = h
        .store
        .notifications()
        .into_iter()
        .filter(|n| n.event_type == "execution_succeeded")
        .collect();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let h = harness();
    let tenant = sluice_tests::fixtures::tenant::acme();
    let execution_id = running_execution(&h, &tenant).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/jobs/executions/{execution_id}/complete"))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "status": "succeeded" }).to_string()))
        .unwrap();

    let response = app(&h).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_signed_with_wrong_key_is_unauthorized() {
    let h = harness();
    let tenant = sluice_tests::fixtures::tenant::acme();
    let execution_id = running_execution(&h, &tenant).await;
    let token = mint_callback_token(execution_id, tenant.as_str(), b"wrong-key").unwrap();

    let response = app(&h)
        .oneshot(complete_request(execution_id, &token, json!({ "status": "succeeded" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_bound_to_other_execution_is_unauthorized() {
    let h = harness();
    let tenant = sluice_tests::fixtures::tenant::acme();
    let execution_id = running_execution(&h, &tenant).await;
    let other = Uuid::new_v4();
    let token = mint_callback_token(other, tenant.as_str(), JWT_SECRET).unwrap();

    let response = app(&h)
        .oneshot(complete_request(execution_id, &token, json!({ "status": "succeeded" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_execution_is_not_found() {
    let h = harness();
    let tenant = sluice_tests::fixtures::tenant::acme();
    let execution_id = Uuid::new_v4();
    let token = mint_callback_token(execution_id, tenant.as_str(), JWT_SECRET).unwrap();

    let response = app(&h)
        .oneshot(complete_request(execution_id, &token, json!({ "status": "succeeded" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_tenant_in_token_is_not_found() {
    let h = harness();
    let tenant = sluice_tests::fixtures::tenant::acme();
    let execution_id = running_execution(&h, &tenant).await;

    // Well-formed token, but minted for a different tenant: the execution
    // is not visible in that tenant's scope.
    let token = mint_callback_token(
        execution_id,
        sluice_tests::fixtures::tenant::globex().as_str(),
        JWT_SECRET,
    )
    .unwrap();

    let response = app(&h)
        .oneshot(complete_request(execution_id, &token, json!({ "status": "succeeded" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let untouched = h.store.get_execution(&tenant, execution_id).await.unwrap();
    assert_eq!(untouched.status, "running");
}

#[tokio::test]
async fn repeated_report_is_noop_conflicting_report_is_409() {
    let h = harness();
    let tenant = sluice_tests::fixtures::tenant::acme();
    let execution_id = running_execution(&h, &tenant).await;
    let token = mint_callback_token(execution_id, tenant.as_str(), JWT_SECRET).unwrap();

    let body = json!({ "status": "succeeded", "records_processed": 10, "bytes_transferred": 20 });
    let response = app(&h)
        .oneshot(complete_request(execution_id, &token, body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Same status again: idempotent no-op, no duplicate notification.
    let notifications_before = h.store.notifications().len();
    let response = app(&h)
        .oneshot(complete_request(execution_id, &token, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(h.store.notifications().len(), notifications_before);

    // Conflicting terminal status: 409, row untouched.
    let response = app(&h)
        .oneshot(complete_request(execution_id, &token, json!({ "status": "failed" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let row = h.store.get_execution(&tenant, execution_id).await.unwrap();
    assert_eq!(row.status, "succeeded");
    assert_eq!(row.records_processed, Some(10));
}

#[tokio::test]
async fn non_terminal_status_is_rejected() {
    let h = harness();
    let tenant = sluice_tests::fixtures::tenant::acme();
    let execution_id = running_execution(&h, &tenant).await;
    let token = mint_callback_token(execution_id, tenant.as_str(), JWT_SECRET).unwrap();

    let response = app(&h)
        .oneshot(complete_request(execution_id, &token, json!({ "status": "running" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
