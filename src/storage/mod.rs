//! Document storage
//!
//! Subscriptions, queue items, render settings and rate snapshots are schemaless
//! JSON documents grouped into collections, each collection living in a logical
//! database selected by the deployment environment.
//!
//! - [`DocumentStore`] - async interface every backend implements
//! - [`postgres`] - JSONB-backed store on `tokio-postgres` + `deadpool-postgres`
//! - [`memory`] - in-process store for local runs and tests
//! - [`connection`] - resilient shared handle with reconnect and health tracking
//! - [`queue`], [`repository`], [`rates`] - typed access on top of the raw store

pub mod connection;
pub mod memory;
pub mod postgres;
pub mod queue;
pub mod rates;
pub mod repository;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Environment;

pub use connection::{ConnectionManager, ConnectionState, StoreConnector};
pub use queue::ContentQueue;

/// A stored JSON object
pub type Document = Map<String, Value>;

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Queue of rendering jobs
pub const QUEUE_COLLECTION: &str = "processing-q";
/// Shared render settings document
pub const RENDER_SETTINGS_COLLECTION: &str = "render_settings";
/// Posting feed written after successful deliveries
pub const FEED_COLLECTION: &str = "subscriptions-feed";
/// Ad-hoc content collection cleared after every producer run
pub const CONTENT_MANAGER_COLLECTION: &str = "content-manager";

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by document stores and the connection manager
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Every connect attempt failed
    #[error("Cannot connect to document store after {attempts} attempts: {reason}")]
    CannotConnect { attempts: u32, reason: String },

    /// The store handle was closed
    #[error("Document store is not connected")]
    NotConnected,

    /// A single connect attempt failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The backend rejected or failed a query
    #[error("Query on {collection} failed: {reason}")]
    Query { collection: String, reason: String },

    /// A stored document could not be decoded
    #[error("Invalid document in {collection}: {reason}")]
    InvalidDocument { collection: String, reason: String },

    /// Malformed object id
    #[error("Invalid object id '{0}'")]
    InvalidId(String),

    /// Unusable store URL
    #[error("Invalid store URL: {0}")]
    InvalidUrl(String),

    /// JSON encoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Create a query error for a collection
    pub fn query(collection: &Collection, reason: impl fmt::Display) -> Self {
        Self::Query {
            collection: collection.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a decoding error for a collection
    pub fn invalid_document(collection: &Collection, reason: impl fmt::Display) -> Self {
        Self::InvalidDocument {
            collection: collection.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for failures of the link to the store rather than of a single query
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::CannotConnect { .. } | Self::NotConnected | Self::Connection(_)
        )
    }

    /// Whether retrying the same operation can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Connection(_) | Self::Query { .. }
        )
    }
}

// ============================================================================
// Identifiers and collections
// ============================================================================

/// 24-hex-digit document identifier, serialized as `{"$oid": "<hex>"}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(String);

impl ObjectId {
    /// Generate a fresh id: 4 bytes of epoch seconds followed by 8 random bytes
    pub fn new() -> Self {
        let secs = chrono::Utc::now().timestamp().max(0) as u32;
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{secs:08x}{}", &random[..16]))
    }

    /// Parse a 24-hex-digit string
    pub fn parse(hex: &str) -> StoreResult<Self> {
        if hex.len() == 24 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(hex.to_ascii_lowercase()))
        } else {
            Err(StoreError::InvalidId(hex.to_string()))
        }
    }

    /// Hex form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extended-JSON form (`{"$oid": ..}`) as stored inside documents
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "$oid": self.0 })
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Extended<'a> {
            #[serde(rename = "$oid")]
            oid: &'a str,
        }
        Extended { oid: &self.0 }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Extended {
                #[serde(rename = "$oid")]
                oid: String,
            },
            Plain(String),
        }

        let hex = match Repr::deserialize(deserializer)? {
            Repr::Extended { oid } | Repr::Plain(oid) => oid,
        };
        Self::parse(&hex).map_err(serde::de::Error::custom)
    }
}

/// A collection inside a logical database
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Collection {
    pub database: String,
    pub name: String,
}

impl Collection {
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.name)
    }
}

/// Maps logical collections onto databases for a deployment environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    app_database: String,
    config_database: String,
}

impl StoreLayout {
    /// Development keeps everything in one test database
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Dev => Self {
                app_database: "currency_app_test".to_string(),
                config_database: "currency_app_test".to_string(),
            },
            Environment::Prod => Self {
                app_database: "currency_app".to_string(),
                config_database: "config_app".to_string(),
            },
        }
    }

    /// Collection in the application database (subscriptions, queue, feed, rates)
    pub fn app(&self, name: &str) -> Collection {
        Collection::new(&self.app_database, name)
    }

    /// Collection in the configuration database (render settings, rate keys)
    pub fn config(&self, name: &str) -> Collection {
        Collection::new(&self.config_database, name)
    }

    pub fn queue(&self) -> Collection {
        self.app(QUEUE_COLLECTION)
    }

    pub fn render_settings(&self) -> Collection {
        self.config(RENDER_SETTINGS_COLLECTION)
    }

    pub fn feed(&self) -> Collection {
        self.app(FEED_COLLECTION)
    }

    /// Rate keys configured for a country
    pub fn rate_keys(&self, country: &str) -> Collection {
        self.config(&format!("keys_{country}"))
    }

    /// Rate values recorded for a country
    pub fn rate_values(&self, country: &str) -> Collection {
        self.app(&format!("rates_{country}"))
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Document filter
///
/// Equality follows document-store semantics: an array-valued field matches when
/// any element equals the operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every document
    All,
    /// Document with this id
    Id(ObjectId),
    /// Top-level field equals value (or array field contains it)
    Eq(String, Value),
    /// Numeric top-level field is greater than or equal to the operand
    Gte(String, f64),
    /// All sub-filters match
    And(Vec<Filter>),
    /// At least one sub-filter matches
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: f64) -> Self {
        Self::Gte(field.into(), value)
    }

    /// Evaluate against a stored document
    pub fn matches(&self, id: &ObjectId, document: &Document) -> bool {
        match self {
            Self::All => true,
            Self::Id(expected) => expected == id,
            Self::Eq(field, value) => match document.get(field) {
                Some(Value::Array(items)) if !value.is_array() => items.contains(value),
                Some(actual) => actual == value,
                None => value.is_null(),
            },
            Self::Gte(field, bound) => document
                .get(field)
                .and_then(Value::as_f64)
                .is_some_and(|actual| actual >= *bound),
            Self::And(filters) => filters.iter().all(|f| f.matches(id, document)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(id, document)),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Ordering and paging for `find`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Numeric field to sort by; insertion order when absent
    pub sort: Option<(String, SortOrder)>,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn sorted(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            sort: Some((field.into(), order)),
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// Async document store
///
/// Returned documents always carry their id under `_id` in extended-JSON form.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Round-trip to the backend
    async fn ping(&self) -> StoreResult<()>;

    /// Documents matching `filter`
    async fn find(
        &self,
        collection: &Collection,
        filter: &Filter,
        options: FindOptions,
    ) -> StoreResult<Vec<Document>>;

    /// First document matching `filter`
    async fn find_one(
        &self,
        collection: &Collection,
        filter: &Filter,
    ) -> StoreResult<Option<Document>> {
        let mut found = self
            .find(collection, filter, FindOptions::default().limit(1))
            .await?;
        Ok(found.pop())
    }

    /// Insert a document; an `_id` already present is kept, otherwise one is generated
    async fn insert_one(&self, collection: &Collection, document: Document)
        -> StoreResult<ObjectId>;

    /// Delete the first matching document, returning how many were removed (0 or 1)
    async fn delete_one(&self, collection: &Collection, filter: &Filter) -> StoreResult<u64>;

    /// Delete every matching document
    async fn delete_many(&self, collection: &Collection, filter: &Filter) -> StoreResult<u64>;

    /// Number of matching documents
    async fn count(&self, collection: &Collection, filter: &Filter) -> StoreResult<u64>;

    /// Atomically lease the oldest unclaimed (or lease-expired) document to `claimant`
    async fn claim_one(
        &self,
        collection: &Collection,
        claimant: &str,
        lease: Duration,
    ) -> StoreResult<Option<Document>>;

    /// Release backend resources
    async fn close(&self) {}
}

/// Shared store handle
pub type SharedStore = Arc<dyn DocumentStore>;

/// Take the `_id` out of a document, if it has a valid one
pub fn take_id(document: &mut Document) -> Option<ObjectId> {
    document
        .remove("_id")
        .and_then(|value| serde_json::from_value(value).ok())
}

/// Serialize a value into a document
pub fn to_document<T: Serialize>(value: &T) -> StoreResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidDocument {
            collection: "<serialize>".to_string(),
            reason: format!("expected an object, got {other}"),
        }),
    }
}

/// Decode a document into a typed value
pub fn from_document<T: DeserializeOwned>(
    collection: &Collection,
    document: Document,
) -> StoreResult<T> {
    serde_json::from_value(Value::Object(document))
        .map_err(|e| StoreError::invalid_document(collection, e))
}
