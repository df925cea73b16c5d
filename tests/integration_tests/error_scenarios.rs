//! Error scenario integration tests
//!
//! Tests various failure modes and error handling:
//! 1. Document store unreachable at startup
//! 2. Store recovery after an outage
//! 3. Render service errors
//! 4. Delivery rejections
//! 5. Closed connection manager

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ratecast::error::ErrorCategory;
use ratecast::processor::DrainOutcome;
use ratecast::storage::{ConnectionState, StoreError};

use super::fixtures::{noon_request, quick_policy, render_reply, templates_dir, Harness};

// ============================================================================
// Store Outage Tests
// ============================================================================

#[tokio::test]
async fn test_unreachable_store_gives_up_after_bounded_attempts() {
    let harness = Harness::with_policy(quick_policy());
    harness.store.set_reachable(false);

    let err = harness.queue.depth().await.unwrap_err();
    assert!(err.is_connectivity());
    assert!(
        matches!(err, StoreError::CannotConnect { attempts: 5, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(harness.manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_queue_depth_reads_zero_during_outage() {
    let harness = Harness::with_policy(quick_policy());
    harness.store.set_reachable(false);

    assert_eq!(harness.queue.depth_or_zero().await, 0);
}

#[tokio::test]
async fn test_producer_surfaces_connectivity_errors() {
    let harness = Harness::with_policy(quick_policy());
    harness.seed_rates().await;
    harness.seed_user_subscription(&["nbp-usd"], false).await;
    harness.store.set_reachable(false);

    let err = harness
        .producer()
        .run(&noon_request("subscriptions-users"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Connectivity);
}

#[tokio::test]
async fn test_store_recovers_after_outage() {
    let harness = Harness::with_policy(quick_policy());
    harness.store.set_reachable(false);
    assert!(harness.queue.depth().await.is_err());

    harness.store.set_reachable(true);
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
    assert_eq!(harness.manager.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_closed_manager_refuses_work() {
    let harness = Harness::new();
    assert_eq!(harness.queue.depth().await.unwrap(), 0);

    harness.manager.close().await;
    let err = harness.queue.depth().await.unwrap_err();
    assert!(matches!(err, StoreError::NotConnected));
}

// ============================================================================
// Render and Delivery Error Tests
// ============================================================================

#[tokio::test]
async fn test_render_error_drops_item_without_sending() {
    let harness = Harness::new();
    harness.seed_rates().await;
    harness.seed_user_subscription(&["nbp-usd"], false).await;
    harness
        .producer()
        .run(&noon_request("subscriptions-users"))
        .await
        .unwrap();

    let service = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/render"))
        .respond_with(ResponseTemplate::new(500).set_body_string("renderer crashed"))
        .expect(1)
        .mount(&service)
        .await;
    Mock::given(method("POST"))
        .and(path("/bottoken/sendPhoto"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(0)
        .mount(&service)
        .await;

    let dir = templates_dir();
    let processor = harness.processor(&service.uri(), dir.path());

    assert_eq!(processor.drain_one().await.unwrap(), DrainOutcome::RenderFailed);
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_template_drops_item() {
    let harness = Harness::new();
    harness.seed_rates().await;
    harness.seed_user_subscription(&["nbp-usd"], false).await;
    harness
        .producer()
        .run(&noon_request("subscriptions-users"))
        .await
        .unwrap();

    let service = MockServer::start().await;
    let empty_dir = tempfile::TempDir::new().unwrap();
    let processor = harness.processor(&service.uri(), empty_dir.path());

    assert_eq!(processor.drain_one().await.unwrap(), DrainOutcome::RenderFailed);
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
    assert!(service.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_delivery_still_consumes_item() {
    let harness = Harness::new();
    harness.seed_rates().await;
    harness.seed_user_subscription(&["nbp-usd"], false).await;
    harness
        .producer()
        .run(&noon_request("subscriptions-users"))
        .await
        .unwrap();

    let service = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/render"))
        .respond_with(ResponseTemplate::new(200).set_body_json(render_reply()))
        .mount(&service)
        .await;
    Mock::given(method("POST"))
        .and(path("/bottoken/sendPhoto"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"ok": false, "description": "chat not found"})),
        )
        .expect(1)
        .mount(&service)
        .await;

    let dir = templates_dir();
    let processor = harness.processor(&service.uri(), dir.path());

    assert_eq!(processor.drain_one().await.unwrap(), DrainOutcome::Delivered);
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
    assert_eq!(processor.drain_one().await.unwrap(), DrainOutcome::Empty);
}
