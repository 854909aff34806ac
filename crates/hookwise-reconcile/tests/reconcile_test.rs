//! Integration tests for reconciliation gap filling.
//!
//! Mock the provider APIs with wiremock and assert on synthesized events,
//! run audit rows, and delivery hand-off. Requires PostgreSQL via
//! `TEST_DATABASE_URL`.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use hookwise_core::{
    Clock, EventSource, Integration, IntegrationId, IntegrationStatus, Provider, Task,
};
use hookwise_reconcile::{ReconcileConfig, Reconciler};
use hookwise_testing::{RecordingQueue, TestEnv};
use uuid::Uuid;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

async fn create_integration_with_credential(
    env: &TestEnv,
    provider: Provider,
) -> Result<Integration> {
    let now = env.clock_handle().now_utc();
    let integration = Integration {
        id: IntegrationId::new(),
        owner_id: Uuid::new_v4(),
        name: format!("reconcilable-{}", Uuid::new_v4().simple()),
        provider,
        signing_secret: "whsec_test_secret".to_string(),
        destination_url: "https://dest.example/hook".to_string(),
        status: IntegrationStatus::Active,
        reconciliation_credential: Some("sk_test_credential".to_string()),
        forward_invalid_signature: true,
        created_at: now,
        updated_at: now,
    };
    env.storage().integrations.create(&integration).await?;
    Ok(integration)
}

fn reconciler(env: &TestEnv, queue: Arc<RecordingQueue>, server: &MockServer) -> Reconciler {
    Reconciler::new(
        env.storage().clone(),
        queue,
        env.clock_handle(),
        ReconcileConfig {
            stripe_api_base: server.uri(),
            shopify_api_base: server.uri(),
            ..ReconcileConfig::default()
        },
    )
}

#[tokio::test]
async fn stripe_gap_is_detected_and_filled() -> Result<()> {
    let env = TestEnv::new().await?;
    let server = MockServer::start().await;
    let integration = create_integration_with_credential(&env, Provider::Stripe).await?;

    Mock::given(matchers::method("GET"))
        .and(matchers::path("/v1/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "object": "list",
            "data": [{
                "id": "evt_missing_1",
                "type": "charge.succeeded",
                "created": Utc::now().timestamp(),
                "data": {"object": {"id": "ch_1", "amount": 100}}
            }],
            "has_more": false
        })))
        .mount(&server)
        .await;

    let queue = Arc::new(RecordingQueue::new());
    let run = reconciler(&env, queue.clone(), &server)
        .reconcile_integration(&integration)
        .await?
        .expect("stripe integrations reconcile");

    assert_eq!(run.provider_events_found, 1);
    assert_eq!(run.gaps_detected, 1);
    assert_eq!(run.gaps_resolved, 1);

    let events = env.storage().events.find_by_integration(integration.id, None).await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, EventSource::Reconciliation);
    assert!(events[0].signature_valid);
    assert!(events[0].headers().is_empty());
    assert_eq!(events[0].provider_event_id.as_deref(), Some("evt_missing_1"));
    assert_eq!(events[0].event_type, "charge.succeeded");

    assert_eq!(queue.count_topic("webhook/received"), 1);

    // The run row is queryable for the audit trail.
    let runs =
        env.storage().reconciliation_runs.find_by_integration(integration.id, None).await?;
    assert_eq!(runs.len(), 1);

    Ok(())
}

#[tokio::test]
async fn known_events_produce_no_gaps() -> Result<()> {
    let env = TestEnv::new().await?;
    let server = MockServer::start().await;
    let integration = create_integration_with_credential(&env, Provider::Stripe).await?;

    // Locally present already.
    env.insert_event(integration.id, serde_json::json!({"id": "evt_known"}), Some("evt_known"))
        .await?;

    Mock::given(matchers::method("GET"))
        .and(matchers::path("/v1/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "object": "list",
            "data": [{
                "id": "evt_known",
                "type": "charge.succeeded",
                "created": Utc::now().timestamp(),
                "data": {}
            }],
            "has_more": false
        })))
        .mount(&server)
        .await;

    let queue = Arc::new(RecordingQueue::new());
    let run = reconciler(&env, queue.clone(), &server)
        .reconcile_integration(&integration)
        .await?
        .expect("stripe integrations reconcile");

    assert_eq!(run.provider_events_found, 1);
    assert_eq!(run.local_events_found, 1);
    assert_eq!(run.gaps_detected, 0);
    assert_eq!(run.gaps_resolved, 0);
    assert!(queue.tasks().is_empty());

    Ok(())
}

#[tokio::test]
async fn stripe_pagination_follows_the_cursor() -> Result<()> {
    let env = TestEnv::new().await?;
    let server = MockServer::start().await;
    let integration = create_integration_with_credential(&env, Provider::Stripe).await?;

    let created = Utc::now().timestamp();
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/v1/events"))
        .and(matchers::query_param("starting_after", "evt_page1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "object": "list",
            "data": [{"id": "evt_page2", "type": "charge.succeeded", "created": created, "data": {}}],
            "has_more": false
        })))
        .mount(&server)
        .await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/v1/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "object": "list",
            "data": [{"id": "evt_page1", "type": "charge.succeeded", "created": created, "data": {}}],
            "has_more": true
        })))
        .mount(&server)
        .await;

    let queue = Arc::new(RecordingQueue::new());
    let run = reconciler(&env, queue.clone(), &server)
        .reconcile_integration(&integration)
        .await?
        .expect("stripe integrations reconcile");

    assert_eq!(run.provider_events_found, 2);
    assert_eq!(run.gaps_resolved, 2);

    Ok(())
}

#[tokio::test]
async fn shopify_orders_synthesize_events_across_pages() -> Result<()> {
    let env = TestEnv::new().await?;
    let server = MockServer::start().await;
    let integration = create_integration_with_credential(&env, Provider::Shopify).await?;

    let next_url = format!("{}/admin/api/2024-01/orders.json?page_info=p2", server.uri());
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/admin/api/2024-01/orders.json"))
        .and(matchers::query_param("page_info", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "orders": [{"id": 1002, "total_price": "20.00"}]
        })))
        .mount(&server)
        .await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/admin/api/2024-01/orders.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "orders": [{"id": 1001, "total_price": "10.00"}]
                }))
                .append_header("Link", format!(r#"<{next_url}>; rel="next""#).as_str()),
        )
        .mount(&server)
        .await;

    let queue = Arc::new(RecordingQueue::new());
    let run = reconciler(&env, queue.clone(), &server)
        .reconcile_integration(&integration)
        .await?
        .expect("shopify integrations reconcile");

    assert_eq!(run.provider_events_found, 2);
    assert_eq!(run.gaps_resolved, 2);

    let events = env.storage().events.find_by_integration(integration.id, None).await?;
    let mut ids: Vec<_> =
        events.iter().filter_map(|e| e.provider_event_id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["shopify:order:1001", "shopify:order:1002"]);
    assert!(events.iter().all(|e| e.event_type == "orders/create"));

    // The handed-off tasks target the integration's destination.
    let received: Vec<_> = queue
        .tasks()
        .into_iter()
        .filter(|t| matches!(t, Task::WebhookReceived { .. }))
        .collect();
    assert_eq!(received.len(), 2);

    Ok(())
}

#[tokio::test]
async fn github_integrations_have_no_reconciliation() -> Result<()> {
    let env = TestEnv::new().await?;
    let server = MockServer::start().await;
    let integration = create_integration_with_credential(&env, Provider::Github).await?;

    let queue = Arc::new(RecordingQueue::new());
    let run =
        reconciler(&env, queue.clone(), &server).reconcile_integration(&integration).await?;

    assert!(run.is_none());
    assert!(queue.tasks().is_empty());
    assert!(env
        .storage()
        .reconciliation_runs
        .find_by_integration(integration.id, None)
        .await?
        .is_empty());

    Ok(())
}

#[tokio::test]
async fn run_cycle_covers_all_reconcilable_integrations() -> Result<()> {
    let env = TestEnv::new().await?;
    let server = MockServer::start().await;
    let integration = create_integration_with_credential(&env, Provider::Stripe).await?;
    // No credential: skipped by the cycle.
    env.create_integration(Provider::Stripe, "https://dest.example").await?;

    Mock::given(matchers::method("GET"))
        .and(matchers::path("/v1/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "object": "list", "data": [], "has_more": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let queue = Arc::new(RecordingQueue::new());
    reconciler(&env, queue, &server).run_cycle().await?;

    let runs =
        env.storage().reconciliation_runs.find_by_integration(integration.id, None).await?;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].gaps_detected, 0);

    server.verify().await;
    Ok(())
}
