//! End-to-end pipeline integration tests
//!
//! Tests the complete workflow:
//! 1. Subscription resolution for a time slot
//! 2. Rate diff against the previous slot
//! 3. Queue item persistence
//! 4. Render through the image service (mocked)
//! 5. Telegram delivery (mocked)

use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ratecast::processor::DrainOutcome;
use ratecast::scheduler::ProducerOutcome;
use ratecast::storage::queue::Claimed;
use std::time::Duration;

use super::fixtures::{noon_request, render_reply, templates_dir, Harness};

// ============================================================================
// Complete Pipeline Tests
// ============================================================================

#[tokio::test]
async fn test_produce_then_drain_delivers_photo() {
    let harness = Harness::new();
    harness.seed_rates().await;
    harness.seed_user_subscription(&["nbp-usd", "nbp-eur"], false).await;

    let service = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/render"))
        .and(body_partial_json(json!({"data": {"type": "png", "encoding": "base64"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(render_reply()))
        .expect(1)
        .mount(&service)
        .await;
    Mock::given(method("POST"))
        .and(path("/bottoken/sendPhoto"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&service)
        .await;

    // Produce
    let report = harness
        .producer()
        .run(&noon_request("subscriptions-users"))
        .await
        .unwrap();
    assert_eq!(report.outcome, ProducerOutcome::Completed);
    assert_eq!(report.matched, 1);
    assert_eq!(report.enqueued, 1);
    assert_eq!(harness.queue.depth().await.unwrap(), 1);

    // Inspect without leasing
    let Some(Claimed::Item(_, item)) = harness.queue.peek_one().await.unwrap() else {
        panic!("expected a queued item");
    };
    assert_eq!(item.keys, vec!["nbp-usd".to_string(), "nbp-eur".to_string()]);
    let usd = item
        .content
        .records
        .iter()
        .find(|record| record.key == "nbp-usd")
        .unwrap();
    assert!(usd.diff.starts_with('+'), "diff was {}", usd.diff);
    assert!(usd.has_change());
    assert_eq!(item.content.chat_id, Some(json!(4242)));

    // Drain
    let dir = templates_dir();
    let processor = harness.processor(&service.uri(), dir.path());
    assert_eq!(processor.drain_one().await.unwrap(), DrainOutcome::Delivered);
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
    assert_eq!(processor.drain_one().await.unwrap(), DrainOutcome::Empty);
}

#[tokio::test]
async fn test_unchanged_rates_are_skipped_before_queueing() {
    let harness = Harness::new();
    harness.seed_rates().await;
    harness.seed_user_subscription(&["nbp-eur"], true).await;

    let report = harness
        .producer()
        .run(&noon_request("subscriptions-users"))
        .await
        .unwrap();

    assert_eq!(report.enqueued, 0);
    assert_eq!(report.skipped_unchanged, 1);
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_deprecated_keys_are_not_rendered() {
    let harness = Harness::new();
    harness.seed_rates().await;
    harness.seed_user_subscription(&["nbp-usd", "old-chf"], false).await;

    harness
        .producer()
        .run(&noon_request("subscriptions-users"))
        .await
        .unwrap();

    let Some(Claimed::Item(_, item)) = harness.queue.peek_one().await.unwrap() else {
        panic!("expected a queued item");
    };
    let keys: Vec<&str> = item.content.records.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["nbp-usd"]);
}

#[tokio::test]
async fn test_other_slot_produces_nothing() {
    let harness = Harness::new();
    harness.seed_rates().await;
    harness.seed_user_subscription(&["nbp-usd"], false).await;

    let request = noon_request("subscriptions-users").with_time("13:00");
    let report = harness.producer().run(&request).await.unwrap();

    assert_eq!(report.outcome, ProducerOutcome::NoMatch);
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_remove_queued_item_by_subscription_id() {
    let harness = Harness::new();
    harness.seed_rates().await;
    let id = harness.seed_user_subscription(&["nbp-usd"], false).await;

    harness
        .producer()
        .run(&noon_request("subscriptions-users"))
        .await
        .unwrap();
    assert_eq!(harness.queue.depth().await.unwrap(), 1);

    assert_eq!(harness.queue.delete_by_subscription_id(&id).await.unwrap(), 1);
    assert_eq!(harness.queue.delete_by_subscription_id(&id).await.unwrap(), 0);
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_processor_loop_drains_queue() {
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
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&service)
        .await;

    let dir = templates_dir();
    let processor = harness.processor(&service.uri(), dir.path());
    let runner = processor.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    let mut depth = 1;
    for _ in 0..50 {
        depth = harness.queue.depth().await.unwrap();
        if depth == 0 && !processor.is_draining() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    processor.stop().await;
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(depth, 0);

    let requests = service.received_requests().await.unwrap();
    let sends = requests
        .iter()
        .filter(|request| request.url.path() == "/bottoken/sendPhoto")
        .count();
    assert_eq!(sends, 1);
    let renders: Vec<Value> = requests
        .iter()
        .filter(|request| request.url.path() == "/api/render")
        .map(|request| serde_json::from_slice(&request.body).unwrap())
        .collect();
    assert_eq!(renders.len(), 1);
    assert!(renders[0]["data"]["html"].as_str().unwrap().contains("DATE_TIME"));
}
