//! End-to-end pipeline test: outage, circuit trip, recovery, replay.
//!
//! Walks one destination through the full mitigation arc: repeated 503s
//! open the circuit, later events park in the replay queue, health probes
//! recover the breaker, and the replay engine drains the backlog in
//! arrival order. Requires PostgreSQL via `TEST_DATABASE_URL`.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use hookwise_core::{CircuitState, Provider, ReplayStatus};
use hookwise_delivery::{
    circuit::CircuitConfig, CircuitBreaker, DeliveryClient, DeliveryOutcome, DeliveryWorker,
    HealthProber, ProberConfig, ReplayConfig, ReplayEngine, WorkerConfig,
};
use hookwise_testing::{RecordingQueue, TestEnv};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn outage_recovery_and_ordered_replay() -> Result<()> {
    let env = TestEnv::new().await?;
    let server = MockServer::start().await;

    // The destination returns 503 for the first five sends, then recovers.
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .up_to_n_times(5)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;
    Mock::given(matchers::method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let destination = format!("{}/hook", server.uri());
    let integration = env.create_integration(Provider::Stripe, &destination).await?;
    let endpoint = env.create_endpoint(integration.id).await?;

    let queue = Arc::new(RecordingQueue::new());
    let client = Arc::new(DeliveryClient::with_defaults()?);
    let breaker = Arc::new(CircuitBreaker::new(
        env.storage().clone(),
        CircuitConfig::default(),
        env.clock_handle(),
    ));
    let worker = DeliveryWorker::new(
        env.storage().clone(),
        client.clone(),
        breaker.clone(),
        queue.clone(),
        env.clock_handle(),
        WorkerConfig::default(),
    );
    let prober = HealthProber::new(
        env.storage().clone(),
        client.clone(),
        breaker.clone(),
        queue.clone(),
        env.clock_handle(),
        ProberConfig::default(),
    );
    let replay = ReplayEngine::new(
        env.storage().clone(),
        client,
        breaker,
        env.clock_handle(),
        ReplayConfig::default(),
    );

    // Phase 1: five consecutive 503s open the circuit.
    for i in 0..5 {
        env.clock.advance(Duration::from_millis(10));
        let event = env
            .insert_event(
                integration.id,
                serde_json::json!({"data": {"object": {"id": format!("ch_{i}"), "customer": "cus_1"}}}),
                Some(&format!("evt_outage_{i}")),
            )
            .await?;
        let outcome = worker.handle_received(event.id, integration.id, &destination).await?;
        assert_eq!(outcome, DeliveryOutcome::RetryScheduled { attempt: 2 });
    }

    let stored = env.storage().endpoints.find_by_id(endpoint.id).await?.unwrap();
    assert_eq!(stored.circuit_state, CircuitState::Open);
    assert_eq!(queue.count_topic("endpoint/circuit-opened"), 1);

    // Phase 2: eight more events park in the replay queue, in order.
    for i in 0..8 {
        env.clock.advance(Duration::from_millis(10));
        let event = env
            .insert_event(
                integration.id,
                serde_json::json!({"data": {"object": {"id": format!("ch_q{i}"), "customer": "cus_1"}}}),
                Some(&format!("evt_queued_{i}")),
            )
            .await?;
        let outcome = worker.handle_received(event.id, integration.id, &destination).await?;
        assert_eq!(outcome, DeliveryOutcome::Queued { position: i64::from(i) + 1 });
    }

    // Phase 3: three healthy probes move the circuit to half-open.
    for _ in 0..3 {
        env.clock.advance(Duration::from_secs(60));
        prober.probe_cycle().await?;
    }
    let stored = env.storage().endpoints.find_by_id(endpoint.id).await?.unwrap();
    assert_eq!(stored.circuit_state, CircuitState::HalfOpen);
    assert_eq!(queue.count_topic("endpoint/replay-started"), 1);

    // Phase 4: the replay engine drains all eight in position order.
    let summary = replay.drain(endpoint.id).await?;
    assert_eq!(summary.delivered, 8);
    assert!(!summary.aborted);

    let items = env.storage().replay_queue.find_by_endpoint(endpoint.id).await?;
    assert_eq!(items.len(), 8);
    assert!(items.iter().all(|item| item.status == ReplayStatus::Delivered));
    for pair in items.windows(2) {
        assert!(pair[0].position < pair[1].position);
        assert!(pair[0].delivered_at.unwrap() <= pair[1].delivered_at.unwrap());
    }

    Ok(())
}
