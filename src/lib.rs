//! ratecast - scheduled exchange-rate content producer
//!
//! Every minute a producer runs per (country, collection) pair: it resolves
//! the subscriptions due in the current local time slot, compares the latest
//! rates with an earlier snapshot and enqueues one content item per card. A
//! processor drains the queue one item at a time, renders the content through
//! an external service and fans it out to the subscribed channels.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration from TOML files or environment variables
//! - [`models`] - Subscriptions, rates, render settings and queue items
//! - [`storage`] - Document store abstraction, connection manager and queue
//! - [`resolver`] - Slot matching, availability filtering and rate diffs
//! - [`scheduler`] - Per-minute producer runs
//! - [`processor`] - Queue drain, rendering and fan-out
//! - [`delivery`] - Channel senders
//! - [`metrics`] - Prometheus metrics
//! - [`error`] - Crate-level error type and categories
//! - [`utils`] - Retry, clock and formatting helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ratecast::config::Config;
//! use ratecast::storage::{postgres::PostgresConnector, ConnectionManager, ContentQueue, StoreLayout};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let connector = Arc::new(PostgresConnector::new(config.store.url.clone(), config.store.pool_size));
//!     let manager = Arc::new(ConnectionManager::new(connector, config.connection.policy()));
//!     let layout = StoreLayout::for_environment(config.store.environment);
//!     let queue = ContentQueue::new(manager, layout.queue());
//!     println!("queued: {}", queue.depth().await?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod delivery;
pub mod error;
pub mod metrics;
pub mod models;
pub mod processor;
pub mod resolver;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::models::{QueueItem, RenderSettings, Subscription};
    pub use crate::processor::{ContentProcessor, DrainOutcome};
    pub use crate::resolver::SubscriptionResolver;
    pub use crate::scheduler::{Producer, Scheduler};
    pub use crate::storage::{ConnectionManager, ContentQueue, StoreLayout};
}

// Direct re-exports for convenience
pub use models::{QueueItem, Subscription};
