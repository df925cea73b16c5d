//! Durable processing queue
//!
//! Producers append [`QueueItem`]s; the drain loop leases the oldest one,
//! processes it and deletes it. Items are never retried: a consumed item is
//! removed whether or not its deliveries succeeded.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    from_document, take_id, to_document, Collection, ConnectionManager, Document, Filter,
    FindOptions, ObjectId, StoreResult,
};
use crate::models::{QueueItem, SubscriptionRef};

/// A leased queue document
#[derive(Debug)]
pub enum Claimed {
    /// Decoded item, with its document id
    Item(ObjectId, Box<QueueItem>),
    /// Document that does not decode as an item
    Malformed(Option<ObjectId>, String),
}

/// Queue repository over the shared connection
#[derive(Clone)]
pub struct ContentQueue {
    manager: Arc<ConnectionManager>,
    collection: Collection,
}

impl ContentQueue {
    pub fn new(manager: Arc<ConnectionManager>, collection: Collection) -> Self {
        Self {
            manager,
            collection,
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Append an item, returning its document id
    pub async fn enqueue(&self, item: &QueueItem) -> StoreResult<ObjectId> {
        let store = self.manager.ensure_connection().await?;
        let mut document = to_document(item)?;
        document.remove("_id");
        let id = self
            .manager
            .observe(store.insert_one(&self.collection, document).await)?;
        debug!(
            id = %id,
            subscription_id = %item.subscription_id,
            platform = %item.platform,
            "Enqueued item"
        );
        Ok(id)
    }

    /// Oldest item without leasing it
    pub async fn peek_one(&self) -> StoreResult<Option<Claimed>> {
        let store = self.manager.ensure_connection().await?;
        let found = self.manager.observe(
            store
                .find(&self.collection, &Filter::All, FindOptions::default().limit(1))
                .await,
        )?;
        Ok(found.into_iter().next().map(|doc| self.decode(doc)))
    }

    /// Lease the oldest unclaimed item to `owner` for `lease`
    pub async fn claim_one(&self, owner: &str, lease: Duration) -> StoreResult<Option<Claimed>> {
        let store = self.manager.ensure_connection().await?;
        let claimed = self
            .manager
            .observe(store.claim_one(&self.collection, owner, lease).await)?;
        Ok(claimed.map(|doc| self.decode(doc)))
    }

    /// Remove one item referencing `subscription_id` in either id form
    ///
    /// A missing item is not an error.
    pub async fn delete_by_subscription_id(&self, subscription_id: &str) -> StoreResult<u64> {
        let store = self.manager.ensure_connection().await?;
        let removed = self.manager.observe(
            store
                .delete_one(&self.collection, &SubscriptionRef::filter_for(subscription_id))
                .await,
        )?;
        if removed == 0 {
            debug!(subscription_id, "No queued item to delete");
        }
        Ok(removed)
    }

    /// Remove one document by its own id
    pub async fn delete(&self, id: &ObjectId) -> StoreResult<u64> {
        let store = self.manager.ensure_connection().await?;
        self.manager.observe(
            store
                .delete_one(&self.collection, &Filter::Id(id.clone()))
                .await,
        )
    }

    /// Number of queued items
    pub async fn depth(&self) -> StoreResult<u64> {
        let store = self.manager.ensure_connection().await?;
        self.manager
            .observe(store.count(&self.collection, &Filter::All).await)
    }

    /// Queue depth for status reporting; failures read as empty
    pub async fn depth_or_zero(&self) -> u64 {
        match self.depth().await {
            Ok(depth) => depth,
            Err(e) => {
                warn!(error = %e, collection = %self.collection, "Failed to count queue");
                0
            }
        }
    }

    fn decode(&self, mut document: Document) -> Claimed {
        let id = take_id(&mut document);
        match (id, from_document::<QueueItem>(&self.collection, document)) {
            (Some(id), Ok(mut item)) => {
                item.id = Some(id.clone());
                Claimed::Item(id, Box::new(item))
            }
            (id, Err(e)) => Claimed::Malformed(id, e.to_string()),
            (None, Ok(_)) => Claimed::Malformed(None, "document has no id".to_string()),
        }
    }
}
