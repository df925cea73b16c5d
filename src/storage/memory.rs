//! In-process document store
//!
//! Backs `memory://` store URLs and the test suites. Documents live in
//! insertion order per collection; claims use the same lease rules as the
//! PostgreSQL backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::connection::StoreConnector;
use super::{
    Collection, Document, DocumentStore, Filter, FindOptions, ObjectId, SharedStore, SortOrder,
    StoreError, StoreResult,
};

#[derive(Debug, Clone)]
struct Stored {
    id: ObjectId,
    body: Document,
    claim: Option<(String, DateTime<Utc>)>,
}

impl Stored {
    fn to_document(&self) -> Document {
        let mut document = self.body.clone();
        document.insert("_id".to_string(), self.id.to_value());
        document
    }

    fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match &self.claim {
            None => true,
            Some((_, until)) => *until <= now,
        }
    }
}

/// Document store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<Collection, Vec<Stored>>>,
    unreachable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail, simulating a backend that stopped answering
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: &Collection) -> usize {
        self.lock().get(collection).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, collection: &Collection) -> bool {
        self.len(collection) == 0
    }

    fn check_reachable(&self) -> StoreResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("memory store marked unreachable".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Collection, Vec<Stored>>> {
        // A poisoned lock only means another test thread panicked mid-operation
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn sort_key(document: &Document, field: &str) -> f64 {
    document.get(field).and_then(Value::as_f64).unwrap_or(f64::MIN)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_reachable()
    }

    async fn find(
        &self,
        collection: &Collection,
        filter: &Filter,
        options: FindOptions,
    ) -> StoreResult<Vec<Document>> {
        self.check_reachable()?;
        let guard = self.lock();
        let Some(stored) = guard.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<&Stored> = stored
            .iter()
            .filter(|s| filter.matches(&s.id, &s.body))
            .collect();

        if let Some((field, order)) = &options.sort {
            matched.sort_by(|a, b| {
                let ordering = sort_key(&a.body, field).total_cmp(&sort_key(&b.body, field));
                match order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }

        let limit = options.limit.unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .take(limit)
            .map(Stored::to_document)
            .collect())
    }

    async fn insert_one(
        &self,
        collection: &Collection,
        mut document: Document,
    ) -> StoreResult<ObjectId> {
        self.check_reachable()?;
        let id = super::take_id(&mut document).unwrap_or_default();
        self.lock()
            .entry(collection.clone())
            .or_default()
            .push(Stored {
                id: id.clone(),
                body: document,
                claim: None,
            });
        Ok(id)
    }

    async fn delete_one(&self, collection: &Collection, filter: &Filter) -> StoreResult<u64> {
        self.check_reachable()?;
        let mut guard = self.lock();
        let Some(stored) = guard.get_mut(collection) else {
            return Ok(0);
        };

        match stored.iter().position(|s| filter.matches(&s.id, &s.body)) {
            Some(index) => {
                stored.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &Collection, filter: &Filter) -> StoreResult<u64> {
        self.check_reachable()?;
        let mut guard = self.lock();
        let Some(stored) = guard.get_mut(collection) else {
            return Ok(0);
        };

        let before = stored.len();
        stored.retain(|s| !filter.matches(&s.id, &s.body));
        Ok((before - stored.len()) as u64)
    }

    async fn count(&self, collection: &Collection, filter: &Filter) -> StoreResult<u64> {
        self.check_reachable()?;
        let guard = self.lock();
        Ok(guard.get(collection).map_or(0, |stored| {
            stored
                .iter()
                .filter(|s| filter.matches(&s.id, &s.body))
                .count() as u64
        }))
    }

    async fn claim_one(
        &self,
        collection: &Collection,
        claimant: &str,
        lease: Duration,
    ) -> StoreResult<Option<Document>> {
        self.check_reachable()?;
        let now = Utc::now();
        let until = now + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero());

        let mut guard = self.lock();
        let Some(stored) = guard.get_mut(collection) else {
            return Ok(None);
        };

        Ok(stored
            .iter_mut()
            .find(|s| s.is_claimable(now))
            .map(|s| {
                s.claim = Some((claimant.to_string(), until));
                s.to_document()
            }))
    }
}

/// Connector handing out one shared [`MemoryStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    fn describe(&self) -> String {
        "memory://".to_string()
    }

    async fn connect(&self) -> StoreResult<SharedStore> {
        self.store.ping().await?;
        Ok(self.store.clone() as SharedStore)
    }
}
