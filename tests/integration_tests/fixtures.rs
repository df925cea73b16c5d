//! Test fixtures for integration tests
//!
//! Seeds a memory store with rate keys, recorded values and subscriptions,
//! and wires producers and processors against it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{NaiveDate, NaiveDateTime, TimeZone};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ratecast::config::{Config, Environment};
use ratecast::delivery::Senders;
use ratecast::processor::{ContentProcessor, HttpRenderer, ProcessorSettings};
use ratecast::resolver::SubscriptionResolver;
use ratecast::scheduler::{ProduceRequest, Producer};
use ratecast::storage::connection::ConnectionPolicy;
use ratecast::storage::memory::{MemoryConnector, MemoryStore};
use ratecast::storage::rates::StoreRateSource;
use ratecast::storage::repository::{
    FeedRepository, RenderSettingsRepository, SubscriptionRepository,
};
use ratecast::storage::{Collection, ConnectionManager, ContentQueue, DocumentStore, StoreLayout};

/// Bytes the mocked render service returns
pub const RENDERED_PNG: &[u8] = b"\x89PNG rendered";

/// Minimal template; the mocked service ignores it
pub const TEMPLATE_HTML: &str = "<div>{{DATE_TIME}}</div>";

/// `{image, imagePath}` reply of the render service
pub fn render_reply() -> Value {
    json!({
        "image": STANDARD.encode(RENDERED_PNG),
        "imagePath": "/images/rendered.png"
    })
}

/// Tuesday 5 March 2024 in Warsaw local time
pub fn warsaw(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 5)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

fn warsaw_millis(hour: u32, minute: u32) -> f64 {
    chrono_tz::Europe::Warsaw
        .from_local_datetime(&warsaw(hour, minute))
        .unwrap()
        .timestamp_millis() as f64
}

pub fn noon_request(collection: &str) -> ProduceRequest {
    ProduceRequest::new("pl", collection)
        .with_time("12:00")
        .with_datetime(warsaw(12, 0))
}

/// Connect attempts fail fast
pub fn quick_policy() -> ConnectionPolicy {
    ConnectionPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(5),
        ..ConnectionPolicy::default()
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub manager: Arc<ConnectionManager>,
    pub layout: StoreLayout,
    pub queue: ContentQueue,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(ConnectionPolicy::default())
    }

    pub fn with_policy(policy: ConnectionPolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(MemoryConnector::new(store.clone())),
            policy,
        ));
        let layout = StoreLayout::for_environment(Environment::Prod);
        let queue = ContentQueue::new(manager.clone(), layout.queue());
        Self {
            store,
            manager,
            layout,
            queue,
        }
    }

    pub async fn insert(&self, collection: &Collection, value: Value) {
        let Value::Object(document) = value else {
            panic!("fixture is not an object");
        };
        self.store.insert_one(collection, document).await.unwrap();
    }

    /// USD moved from 4.00 at 08:00 to 4.05 at 12:00; EUR did not move
    pub async fn seed_rates(&self) {
        let keys = self.layout.rate_keys("pl");
        self.insert(&keys, json!({"key": "nbp-usd", "bank": "NBP", "currency": "USD", "operation": "avg"}))
            .await;
        self.insert(&keys, json!({"key": "nbp-eur", "bank": "NBP", "currency": "EUR", "operation": "avg"}))
            .await;
        self.insert(&keys, json!({"key": "old-chf", "isDeprecated": true})).await;

        let values = self.layout.rate_values("pl");
        for (key, value, hour) in [
            ("nbp-usd", 4.0, 8),
            ("nbp-usd", 4.05, 12),
            ("nbp-eur", 4.3, 8),
            ("nbp-eur", 4.3, 12),
            ("old-chf", 4.5, 12),
        ] {
            self.insert(
                &values,
                json!({"key": key, "value": value, "timestamp": warsaw_millis(hour, 0)}),
            )
            .await;
        }
    }

    /// A direct-message subscription due at noon
    pub async fn seed_user_subscription(&self, keys: &[&str], do_not_post_if_no_changes: bool) -> String {
        let id = ratecast::storage::ObjectId::new();
        self.insert(
            &self.layout.app("subscriptions-users"),
            json!({
                "_id": id.to_value(),
                "country": "pl",
                "platform": "subscriptions-users",
                "time": "12:00",
                "times": ["08:00", "12:00"],
                "keys": keys,
                "name": "Noon rates",
                "userId": 4242,
                "doNotPostIfNoChanges": do_not_post_if_no_changes
            }),
        )
        .await;
        id.as_str().to_string()
    }

    pub fn producer(&self) -> Producer {
        let resolver = SubscriptionResolver::new(
            SubscriptionRepository::new(self.manager.clone(), self.layout.clone()),
            Arc::new(StoreRateSource::new(self.manager.clone(), self.layout.clone())),
        );
        Producer::new(
            resolver,
            RenderSettingsRepository::new(self.manager.clone(), &self.layout),
            self.queue.clone(),
            BTreeMap::from([("pl".to_string(), chrono_tz::Europe::Warsaw)]),
        )
        .with_silence(true)
    }

    /// Processor talking to `service_uri` for rendering and Telegram
    pub fn processor(&self, service_uri: &str, templates_dir: &Path) -> ContentProcessor {
        let mut config = Config::default();
        config.render.image_host = service_uri.to_string();
        config.render.video_host = service_uri.to_string();
        config.render.templates_dir = templates_dir.to_path_buf();
        config.render.media_folder = templates_dir.to_path_buf();
        config.render.timeout_secs = 5;
        config.delivery.telegram_api_base = service_uri.to_string();
        config.delivery.bot_token = Some("token".to_string());
        config.delivery.timeout_secs = 5;

        ContentProcessor::new(
            self.queue.clone(),
            FeedRepository::new(self.manager.clone(), &self.layout),
            Arc::new(HttpRenderer::from_config(&config.render).unwrap()),
            Senders::from_config(&config).unwrap(),
            ProcessorSettings {
                owner: "integration".to_string(),
                lease: Duration::from_secs(60),
                poll_interval: Duration::from_secs(1),
            },
        )
    }
}

/// Templates directory holding the users template
pub fn templates_dir() -> tempfile::TempDir {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("subscriptions-users.hbs"), TEMPLATE_HTML).unwrap();
    dir
}
