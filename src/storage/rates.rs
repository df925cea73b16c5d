//! Exchange-rate lookups
//!
//! Rate keys (bank, currency, operation) are configured per country; recorded
//! values carry the key, a numeric value and a millisecond timestamp.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    from_document, Collection, ConnectionManager, Document, Filter, FindOptions, SortOrder,
    StoreLayout, StoreResult,
};
use crate::models::RateSnapshot;

/// Source of current and historical rate values
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Most recent value of every active key for `country`
    async fn latest(&self, country: &str) -> StoreResult<Vec<RateSnapshot>>;

    /// First value of each key recorded at or after `timestamp_ms`
    ///
    /// Keys without such a value are omitted.
    async fn at_or_after(
        &self,
        country: &str,
        keys: &[String],
        timestamp_ms: i64,
    ) -> StoreResult<Vec<RateSnapshot>>;
}

/// [`RateSource`] reading from the document store
#[derive(Clone)]
pub struct StoreRateSource {
    manager: Arc<ConnectionManager>,
    layout: StoreLayout,
}

impl StoreRateSource {
    pub fn new(manager: Arc<ConnectionManager>, layout: StoreLayout) -> Self {
        Self { manager, layout }
    }

    /// Key documents not flagged `isDeprecated`
    async fn active_keys(&self, country: &str) -> StoreResult<Vec<Document>> {
        let collection = self.layout.rate_keys(country);
        let store = self.manager.ensure_connection().await?;
        let keys = self.manager.observe(
            store
                .find(&collection, &Filter::All, FindOptions::default())
                .await,
        )?;
        Ok(keys
            .into_iter()
            .filter(|key| key.get("isDeprecated") != Some(&Value::Bool(true)))
            .collect())
    }

    async fn first_value(
        &self,
        collection: &Collection,
        filter: Filter,
        options: FindOptions,
    ) -> StoreResult<Option<Document>> {
        let store = self.manager.ensure_connection().await?;
        let mut found = self
            .manager
            .observe(store.find(collection, &filter, options.limit(1)).await)?;
        Ok(found.pop())
    }
}

fn snapshot(collection: &Collection, mut value: Document, overlay: Document) -> Option<RateSnapshot> {
    value.remove("_id");
    for (field, content) in overlay {
        if field != "_id" {
            value.insert(field, content);
        }
    }
    match from_document(collection, value) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!(collection = %collection, error = %e, "Skipping unreadable rate value");
            None
        }
    }
}

#[async_trait]
impl RateSource for StoreRateSource {
    async fn latest(&self, country: &str) -> StoreResult<Vec<RateSnapshot>> {
        let keys = self.active_keys(country).await?;
        let values = self.layout.rate_values(country);

        let lookups = keys.into_iter().map(|key_doc| {
            let values = values.clone();
            async move {
                let Some(key) = key_doc.get("key").and_then(Value::as_str).map(str::to_string)
                else {
                    return Ok(None);
                };
                let found = self
                    .first_value(
                        &values,
                        Filter::eq("key", key.as_str()),
                        FindOptions::sorted("timestamp", SortOrder::Descending),
                    )
                    .await?;
                Ok::<_, super::StoreError>(match found {
                    Some(value) => snapshot(&values, value, key_doc),
                    None => {
                        debug!(key, "No recorded value for rate key");
                        None
                    }
                })
            }
        });

        Ok(try_join_all(lookups).await?.into_iter().flatten().collect())
    }

    async fn at_or_after(
        &self,
        country: &str,
        keys: &[String],
        timestamp_ms: i64,
    ) -> StoreResult<Vec<RateSnapshot>> {
        let values = self.layout.rate_values(country);

        let lookups = keys.iter().map(|key| {
            let values = values.clone();
            async move {
                let filter = Filter::And(vec![
                    Filter::eq("key", key.as_str()),
                    Filter::gte("timestamp", timestamp_ms as f64),
                ]);
                let found = self
                    .first_value(
                        &values,
                        filter,
                        FindOptions::sorted("timestamp", SortOrder::Ascending),
                    )
                    .await?;
                let mut overlay = Document::new();
                overlay.insert("key".to_string(), Value::from(key.as_str()));
                Ok::<_, super::StoreError>(found.and_then(|value| snapshot(&values, value, overlay)))
            }
        });

        Ok(try_join_all(lookups).await?.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::storage::connection::ConnectionPolicy;
    use crate::storage::memory::{MemoryConnector, MemoryStore};
    use crate::storage::DocumentStore;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    async fn seeded() -> StoreRateSource {
        let store = Arc::new(MemoryStore::new());
        let layout = StoreLayout::for_environment(Environment::Dev);

        for key in [
            json!({"key": "usd_buy", "bank": "NBP", "currency": "USD", "currencyBase": "PLN", "operation": "buy"}),
            json!({"key": "eur_sell", "bank": "NBP", "currency": "EUR", "operation": "sell"}),
            json!({"key": "old", "isDeprecated": true}),
        ] {
            store.insert_one(&layout.rate_keys("pl"), doc(key)).await.unwrap();
        }

        for (key, value, ts) in [
            ("usd_buy", 3.95, 1_000),
            ("usd_buy", 4.01, 3_000),
            ("usd_buy", 3.98, 2_000),
            ("eur_sell", 4.30, 1_500),
            ("old", 1.0, 9_000),
        ] {
            store
                .insert_one(
                    &layout.rate_values("pl"),
                    doc(json!({"key": key, "value": value, "timestamp": ts})),
                )
                .await
                .unwrap();
        }

        let manager = Arc::new(ConnectionManager::new(
            Arc::new(MemoryConnector::new(store)),
            ConnectionPolicy::default(),
        ));
        StoreRateSource::new(manager, layout)
    }

    #[tokio::test]
    async fn test_latest_skips_deprecated_and_merges_metadata() {
        let source = seeded().await;
        let latest = source.latest("pl").await.unwrap();

        assert_eq!(latest.len(), 2);
        let usd = latest.iter().find(|r| r.key == "usd_buy").unwrap();
        assert_eq!(usd.value, 4.01);
        assert_eq!(usd.currency_base.as_deref(), Some("PLN"));
        assert_eq!(usd.operation.as_deref(), Some("buy"));
    }

    #[tokio::test]
    async fn test_at_or_after_picks_first_value_past_target() {
        let source = seeded().await;
        let keys = vec!["usd_buy".to_string(), "eur_sell".to_string()];

        let diff = source.at_or_after("pl", &keys, 1_800).await.unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].key, "usd_buy");
        assert_eq!(diff[0].value, 3.98);
    }

    #[tokio::test]
    async fn test_unknown_country_is_empty() {
        let source = seeded().await;
        assert!(source.latest("de").await.unwrap().is_empty());
    }
}
