//! Typed repositories over the shared document store
//!
//! Every repository holds the shared [`ConnectionManager`] and asks it for a
//! handle per operation, so a reconnect is picked up transparently.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │          Producer / Drain loop / Fan-out                 │
//! └──────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │ SubscriptionRepository, RenderSettingsRepository,        │
//! │ FeedRepository, ContentQueue, StoreRateSource            │
//! └──────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │    ConnectionManager ──> DocumentStore (postgres/memory) │
//! └──────────────────────────────────────────────────────────┘
//! ```

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    from_document, to_document, Collection, ConnectionManager, Document, Filter, FindOptions,
    ObjectId, StoreLayout, StoreResult,
};
use crate::models::{QueueItem, RenderSettings, Subscription};

fn decode_all<T: serde::de::DeserializeOwned>(
    collection: &Collection,
    documents: Vec<Document>,
) -> Vec<T> {
    documents
        .into_iter()
        .filter_map(|doc| match from_document(collection, doc) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(collection = %collection, error = %e, "Skipping undecodable document");
                None
            }
        })
        .collect()
}

// ============================================================================
// Subscriptions
// ============================================================================

/// Read access to subscription collections
#[derive(Clone)]
pub struct SubscriptionRepository {
    manager: Arc<ConnectionManager>,
    layout: StoreLayout,
}

impl SubscriptionRepository {
    pub fn new(manager: Arc<ConnectionManager>, layout: StoreLayout) -> Self {
        Self { manager, layout }
    }

    /// Subscriptions in `collection` for `country` firing at `time`
    ///
    /// A subscription whose `time` is a list matches when it contains the slot.
    pub async fn find_for_slot(
        &self,
        collection: &str,
        country: &str,
        time: &str,
    ) -> StoreResult<Vec<Subscription>> {
        let filter = Filter::And(vec![
            Filter::eq("time", time),
            Filter::eq("country", country),
        ]);
        self.find(collection, &filter).await
    }

    /// Every subscription in `collection` for `country`, regardless of time
    pub async fn find_by_country(
        &self,
        collection: &str,
        country: &str,
    ) -> StoreResult<Vec<Subscription>> {
        self.find(collection, &Filter::eq("country", country)).await
    }

    /// One subscription by id; `None` when absent
    pub async fn find_by_id(
        &self,
        collection: &str,
        id: &ObjectId,
    ) -> StoreResult<Option<Subscription>> {
        let target = self.layout.app(collection);
        let store = self.manager.ensure_connection().await?;
        match self
            .manager
            .observe(store.find_one(&target, &Filter::Id(id.clone())).await)?
        {
            Some(doc) => from_document(&target, doc).map(Some),
            None => Ok(None),
        }
    }

    /// Remove every document from `collection`
    pub async fn clear(&self, collection: &str) -> StoreResult<u64> {
        let target = self.layout.app(collection);
        let store = self.manager.ensure_connection().await?;
        let removed = self
            .manager
            .observe(store.delete_many(&target, &Filter::All).await)?;
        debug!(collection = %target, removed, "Cleared collection");
        Ok(removed)
    }

    async fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Subscription>> {
        let target = self.layout.app(collection);
        let store = self.manager.ensure_connection().await?;
        let documents = self
            .manager
            .observe(store.find(&target, filter, FindOptions::default()).await)?;
        Ok(decode_all(&target, documents))
    }
}

// ============================================================================
// Render settings
// ============================================================================

/// The single shared render-settings document
#[derive(Clone)]
pub struct RenderSettingsRepository {
    manager: Arc<ConnectionManager>,
    collection: Collection,
}

impl RenderSettingsRepository {
    pub fn new(manager: Arc<ConnectionManager>, layout: &StoreLayout) -> Self {
        Self {
            manager,
            collection: layout.render_settings(),
        }
    }

    /// Current settings; `None` when no document exists
    pub async fn load(&self) -> StoreResult<Option<RenderSettings>> {
        let store = self.manager.ensure_connection().await?;
        match self
            .manager
            .observe(store.find_one(&self.collection, &Filter::All).await)?
        {
            Some(doc) => from_document(&self.collection, doc).map(Some),
            None => Ok(None),
        }
    }

    /// Current settings, falling back to defaults when absent or unreadable
    pub async fn load_or_default(&self) -> RenderSettings {
        match self.load().await {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                debug!(collection = %self.collection, "No render settings stored, using defaults");
                RenderSettings::default()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load render settings, using defaults");
                RenderSettings::default()
            }
        }
    }
}

// ============================================================================
// Feed
// ============================================================================

/// Append-only record of posted content
#[derive(Clone)]
pub struct FeedRepository {
    manager: Arc<ConnectionManager>,
    collection: Collection,
}

impl FeedRepository {
    pub fn new(manager: Arc<ConnectionManager>, layout: &StoreLayout) -> Self {
        Self {
            manager,
            collection: layout.feed(),
        }
    }

    /// Record a posted item with the current time; the item's own id is not kept
    pub async fn append(&self, item: &QueueItem) -> StoreResult<ObjectId> {
        let mut document = to_document(item)?;
        document.remove("_id");
        document.insert(
            "timestamp".to_string(),
            Value::from(chrono::Utc::now().timestamp_millis()),
        );

        let store = self.manager.ensure_connection().await?;
        self.manager
            .observe(store.insert_one(&self.collection, document).await)
    }

    /// Number of feed entries
    pub async fn count(&self) -> StoreResult<u64> {
        let store = self.manager.ensure_connection().await?;
        self.manager
            .observe(store.count(&self.collection, &Filter::All).await)
    }
}
