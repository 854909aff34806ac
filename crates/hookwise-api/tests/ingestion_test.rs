//! Integration tests for the webhook ingestion endpoint.
//!
//! Drive `POST /ingest/{integration_id}` through the router, asserting on
//! persisted events, signature flags, and delivery hand-off. Requires
//! PostgreSQL via `TEST_DATABASE_URL`.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use hookwise_api::create_test_router;
use hookwise_core::{Clock, EventSource, IntegrationStatus, Provider, Task};
use hookwise_testing::{fixtures, RecordingQueue, TestEnv};
use tower::ServiceExt;
use uuid::Uuid;

fn router(env: &TestEnv, queue: Arc<RecordingQueue>) -> Router {
    create_test_router(Arc::new(env.storage().clone()), queue, env.clock_handle())
}

async fn body_json(response: axum::response::Response) -> Result<serde_json::Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn signed_github_webhook_is_accepted_and_handed_off() -> Result<()> {
    let env = TestEnv::new().await?;
    let integration = env.create_integration(Provider::Github, "https://dest.example").await?;

    let payload = fixtures::github_push_payload("acme/widgets");
    let body = serde_json::to_vec(&payload)?;
    let signature = fixtures::github_signature_header(&integration.signing_secret, &body);

    let queue = Arc::new(RecordingQueue::new());
    let app = router(&env, queue.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/ingest/{}", integration.id))
                .header("content-type", "application/json")
                .header("X-Hub-Signature-256", signature)
                .header("X-GitHub-Event", "push")
                .header("X-GitHub-Delivery", "72d3162e-cc78")
                .body(Body::from(body.clone()))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await?, serde_json::json!({"received": true}));

    let events = env.storage().events.find_by_integration(integration.id, None).await?;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert!(event.signature_valid);
    assert_eq!(event.event_type, "push");
    assert_eq!(event.provider_event_id.as_deref(), Some("72d3162e-cc78"));
    assert_eq!(event.source, EventSource::Webhook);
    assert_eq!(event.payload.0, payload);
    // Headers were captured lower-cased.
    assert!(event.headers().contains_key("x-github-event"));

    let handed_off = queue.tasks().into_iter().any(|task| {
        matches!(task, Task::WebhookReceived { event_id, .. } if event_id == event.id)
    });
    assert!(handed_off, "webhook/received must be emitted");

    Ok(())
}

#[tokio::test]
async fn unknown_integration_is_rejected_with_404() -> Result<()> {
    let env = TestEnv::new().await?;
    let queue = Arc::new(RecordingQueue::new());
    let app = router(&env, queue.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/ingest/{}", Uuid::new_v4()))
                .header("content-type", "application/json")
                .body(Body::from("{}"))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(queue.tasks().is_empty());

    Ok(())
}

#[tokio::test]
async fn paused_integration_is_rejected_with_409() -> Result<()> {
    let env = TestEnv::new().await?;
    let integration = env.create_integration(Provider::Github, "https://dest.example").await?;
    env.storage().integrations.set_status(integration.id, IntegrationStatus::Paused).await?;

    let queue = Arc::new(RecordingQueue::new());
    let app = router(&env, queue.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/ingest/{}", integration.id))
                .header("content-type", "application/json")
                .body(Body::from("{}"))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(env.storage().events.find_by_integration(integration.id, None).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn invalid_signature_is_stored_with_durable_flag() -> Result<()> {
    let env = TestEnv::new().await?;
    let integration = env.create_integration(Provider::Shopify, "https://dest.example").await?;

    let payload = fixtures::shopify_order_payload(450_789_469);
    let body = serde_json::to_vec(&payload)?;

    let queue = Arc::new(RecordingQueue::new());
    let app = router(&env, queue.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/ingest/{}", integration.id))
                .header("content-type", "application/json")
                .header("X-Shopify-Hmac-Sha256", "definitely-not-a-digest")
                .header("X-Shopify-Topic", "orders/create")
                .header("X-Shopify-Webhook-Id", "b54557e4")
                .body(Body::from(body))?,
        )
        .await?;

    // The producer still observes success; the flag is what matters.
    assert_eq!(response.status(), StatusCode::OK);

    let events = env.storage().events.find_by_integration(integration.id, None).await?;
    assert_eq!(events.len(), 1);
    assert!(!events[0].signature_valid);
    assert_eq!(events[0].event_type, "orders/create");
    assert_eq!(queue.count_topic("webhook/received"), 1);

    Ok(())
}

#[tokio::test]
async fn stripe_metadata_is_extracted_from_the_payload() -> Result<()> {
    let env = TestEnv::new().await?;
    let integration = env.create_integration(Provider::Stripe, "https://dest.example").await?;

    let payload = fixtures::stripe_payload("evt_meta_1", "cus_9");
    let body = serde_json::to_vec(&payload)?;
    let timestamp = env.clock_handle().now_utc().timestamp();
    let signature =
        fixtures::stripe_signature_header(&integration.signing_secret, timestamp, &body);

    let queue = Arc::new(RecordingQueue::new());
    let app = router(&env, queue.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/ingest/{}", integration.id))
                .header("content-type", "application/json")
                .header("Stripe-Signature", signature)
                .body(Body::from(body))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);

    let events = env.storage().events.find_by_integration(integration.id, None).await?;
    assert!(events[0].signature_valid);
    assert_eq!(events[0].event_type, "charge.succeeded");
    assert_eq!(events[0].provider_event_id.as_deref(), Some("evt_meta_1"));

    Ok(())
}

#[tokio::test]
async fn unparseable_bodies_are_stored_raw() -> Result<()> {
    let env = TestEnv::new().await?;
    let integration = env.create_integration(Provider::Shopify, "https://dest.example").await?;

    let body = b"this is not json".to_vec();
    let signature = fixtures::shopify_hmac_header(&integration.signing_secret, &body);

    let queue = Arc::new(RecordingQueue::new());
    let app = router(&env, queue.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/ingest/{}", integration.id))
                .header("X-Shopify-Hmac-Sha256", signature)
                .header("X-Shopify-Topic", "orders/create")
                .body(Body::from(body))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);

    let events = env.storage().events.find_by_integration(integration.id, None).await?;
    assert!(events[0].signature_valid);
    assert_eq!(
        events[0].payload.0,
        serde_json::json!({"raw": "this is not json"})
    );

    Ok(())
}

#[tokio::test]
async fn responses_carry_a_request_id() -> Result<()> {
    let env = TestEnv::new().await?;
    let queue = Arc::new(RecordingQueue::new());
    let app = router(&env, queue);

    let response = app
        .oneshot(Request::builder().method("GET").uri("/live").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("X-Request-Id"));

    Ok(())
}
