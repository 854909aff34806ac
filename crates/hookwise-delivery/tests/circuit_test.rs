//! Integration tests for the database-backed circuit breaker.
//!
//! Exercise the transition table against real endpoint rows and delivery
//! history. Requires a PostgreSQL instance via `TEST_DATABASE_URL`.

use std::time::Duration;

use anyhow::Result;
use hookwise_core::{CircuitState, Endpoint, Provider};
use hookwise_delivery::{circuit::CircuitConfig, CircuitBreaker};
use hookwise_testing::TestEnv;

fn breaker(env: &TestEnv) -> CircuitBreaker {
    CircuitBreaker::new(env.storage().clone(), CircuitConfig::default(), env.clock_handle())
}

async fn record_outcome(
    env: &TestEnv,
    breaker: &CircuitBreaker,
    endpoint: &Endpoint,
    success: bool,
) -> Result<hookwise_delivery::CircuitTransition> {
    // Distinct timestamps keep the window ordering deterministic.
    env.clock.advance(Duration::from_millis(10));
    let event = env
        .insert_event(endpoint.integration_id, serde_json::json!({"n": 1}), None)
        .await?;
    env.insert_delivery(event.id, endpoint.id, success, 1, 50).await?;
    Ok(breaker.record_delivery(endpoint.id, success).await?)
}

async fn record_failure(
    env: &TestEnv,
    breaker: &CircuitBreaker,
    endpoint: &Endpoint,
) -> Result<hookwise_delivery::CircuitTransition> {
    record_outcome(env, breaker, endpoint, false).await
}

async fn record_success(
    env: &TestEnv,
    breaker: &CircuitBreaker,
    endpoint: &Endpoint,
) -> Result<hookwise_delivery::CircuitTransition> {
    record_outcome(env, breaker, endpoint, true).await
}

#[tokio::test]
async fn five_consecutive_failures_open_the_circuit() -> Result<()> {
    let env = TestEnv::new().await?;
    let integration = env.create_integration(Provider::Github, "https://dest.example").await?;
    let endpoint = env.create_endpoint(integration.id).await?;
    let breaker = breaker(&env);

    for _ in 0..4 {
        let transition = record_failure(&env, &breaker, &endpoint).await?;
        assert_eq!(transition.current, CircuitState::Closed);
    }

    let transition = record_failure(&env, &breaker, &endpoint).await?;
    assert!(transition.opened());

    let stored = env.storage().endpoints.find_by_id(endpoint.id).await?.unwrap();
    assert_eq!(stored.circuit_state, CircuitState::Open);
    assert_eq!(stored.consecutive_failures, 5);
    assert_eq!(stored.consecutive_successes, 0);

    Ok(())
}

#[tokio::test]
async fn low_success_rate_opens_with_full_enough_window() -> Result<()> {
    let env = TestEnv::new().await?;
    let integration = env.create_integration(Provider::Github, "https://dest.example").await?;
    let endpoint = env.create_endpoint(integration.id).await?;
    let breaker = breaker(&env);

    // Two successes then three failures: the failure streak (3) never
    // reaches 5, but the window of 5 sits at 40% success.
    record_success(&env, &breaker, &endpoint).await?;
    record_success(&env, &breaker, &endpoint).await?;
    record_failure(&env, &breaker, &endpoint).await?;
    record_failure(&env, &breaker, &endpoint).await?;
    let transition = record_failure(&env, &breaker, &endpoint).await?;

    assert!(transition.opened());
    let stored = env.storage().endpoints.find_by_id(endpoint.id).await?.unwrap();
    assert!(stored.success_rate < 50.0);

    Ok(())
}

#[tokio::test]
async fn success_resets_the_failure_streak() -> Result<()> {
    let env = TestEnv::new().await?;
    let integration = env.create_integration(Provider::Github, "https://dest.example").await?;
    let endpoint = env.create_endpoint(integration.id).await?;
    let breaker = breaker(&env);

    record_failure(&env, &breaker, &endpoint).await?;
    record_failure(&env, &breaker, &endpoint).await?;
    record_success(&env, &breaker, &endpoint).await?;

    let stored = env.storage().endpoints.find_by_id(endpoint.id).await?.unwrap();
    assert_eq!(stored.circuit_state, CircuitState::Closed);
    assert_eq!(stored.consecutive_failures, 0);
    assert_eq!(stored.consecutive_successes, 1);

    Ok(())
}

#[tokio::test]
async fn health_checks_are_ignored_unless_open() -> Result<()> {
    let env = TestEnv::new().await?;
    let integration = env.create_integration(Provider::Github, "https://dest.example").await?;
    let endpoint = env.create_endpoint(integration.id).await?;
    let breaker = breaker(&env);

    for _ in 0..5 {
        let transition = breaker.record_health_check(endpoint.id, true).await?;
        assert_eq!(transition.current, CircuitState::Closed);
    }

    let stored = env.storage().endpoints.find_by_id(endpoint.id).await?.unwrap();
    assert_eq!(stored.consecutive_health_check_successes, 0);
    // The probe timestamp still advances.
    assert!(stored.last_health_check_at.is_some());

    Ok(())
}

#[tokio::test]
async fn three_probe_successes_recover_an_open_circuit() -> Result<()> {
    let env = TestEnv::new().await?;
    let integration = env.create_integration(Provider::Github, "https://dest.example").await?;
    let endpoint = env.create_endpoint_in_state(integration.id, CircuitState::Open).await?;
    let breaker = breaker(&env);

    env.clock.advance(Duration::from_secs(1));
    assert!(!breaker.record_health_check(endpoint.id, true).await?.recovered());
    assert!(!breaker.record_health_check(endpoint.id, true).await?.recovered());
    let transition = breaker.record_health_check(endpoint.id, true).await?;
    assert!(transition.recovered());

    let stored = env.storage().endpoints.find_by_id(endpoint.id).await?.unwrap();
    assert_eq!(stored.circuit_state, CircuitState::HalfOpen);
    assert_eq!(stored.consecutive_failures, 0);
    assert_eq!(stored.consecutive_successes, 0);
    assert_eq!(stored.consecutive_health_check_successes, 0);
    assert!(stored.state_changed_at > endpoint.state_changed_at);

    Ok(())
}

#[tokio::test]
async fn failed_probe_resets_the_recovery_streak() -> Result<()> {
    let env = TestEnv::new().await?;
    let integration = env.create_integration(Provider::Github, "https://dest.example").await?;
    let endpoint = env.create_endpoint_in_state(integration.id, CircuitState::Open).await?;
    let breaker = breaker(&env);

    breaker.record_health_check(endpoint.id, true).await?;
    breaker.record_health_check(endpoint.id, true).await?;
    breaker.record_health_check(endpoint.id, false).await?;
    breaker.record_health_check(endpoint.id, true).await?;
    breaker.record_health_check(endpoint.id, true).await?;

    // The failure broke the streak; still two short of recovery.
    let stored = env.storage().endpoints.find_by_id(endpoint.id).await?.unwrap();
    assert_eq!(stored.circuit_state, CircuitState::Open);
    assert_eq!(stored.consecutive_health_check_successes, 2);

    Ok(())
}

#[tokio::test]
async fn half_open_closes_after_ten_successes() -> Result<()> {
    let env = TestEnv::new().await?;
    let integration = env.create_integration(Provider::Github, "https://dest.example").await?;
    let endpoint = env.create_endpoint_in_state(integration.id, CircuitState::HalfOpen).await?;
    let breaker = breaker(&env);

    for _ in 0..9 {
        let transition = record_success(&env, &breaker, &endpoint).await?;
        assert_eq!(transition.current, CircuitState::HalfOpen);
    }

    let transition = record_success(&env, &breaker, &endpoint).await?;
    assert_eq!(transition.previous, CircuitState::HalfOpen);
    assert_eq!(transition.current, CircuitState::Closed);

    Ok(())
}

#[tokio::test]
async fn half_open_reopens_after_two_failures() -> Result<()> {
    let env = TestEnv::new().await?;
    let integration = env.create_integration(Provider::Github, "https://dest.example").await?;
    let endpoint = env.create_endpoint_in_state(integration.id, CircuitState::HalfOpen).await?;
    let breaker = breaker(&env);

    let transition = record_failure(&env, &breaker, &endpoint).await?;
    assert_eq!(transition.current, CircuitState::HalfOpen);

    let transition = record_failure(&env, &breaker, &endpoint).await?;
    assert!(transition.opened());

    Ok(())
}

#[tokio::test]
async fn replay_positions_allocate_monotonically() -> Result<()> {
    let env = TestEnv::new().await?;
    let integration = env.create_integration(Provider::Stripe, "https://dest.example").await?;
    let endpoint = env.create_endpoint_in_state(integration.id, CircuitState::Open).await?;
    let breaker = breaker(&env);

    let mut positions = Vec::new();
    for i in 0..3 {
        let event = env
            .insert_event(integration.id, serde_json::json!({"n": i}), None)
            .await?;
        positions
            .push(breaker.enqueue_for_replay(endpoint.id, event.id, Some("stripe:object:x")).await?);
    }

    assert_eq!(positions, vec![1, 2, 3]);
    assert_eq!(breaker.next_replay_position(endpoint.id).await?, 4);

    let items = env.storage().replay_queue.find_by_endpoint(endpoint.id).await?;
    assert_eq!(items.len(), 3);
    assert!(items.windows(2).all(|w| w[0].position < w[1].position));
    assert!(items.windows(2).all(|w| w[0].created_at <= w[1].created_at));

    Ok(())
}

#[tokio::test]
async fn trip_forces_open_and_is_idempotent() -> Result<()> {
    let env = TestEnv::new().await?;
    let integration = env.create_integration(Provider::Github, "https://dest.example").await?;
    let endpoint = env.create_endpoint(integration.id).await?;
    let breaker = breaker(&env);

    let transition = breaker.trip(endpoint.id).await?;
    assert!(transition.opened());

    let again = breaker.trip(endpoint.id).await?;
    assert_eq!(again.previous, CircuitState::Open);
    assert!(!again.changed());

    Ok(())
}
