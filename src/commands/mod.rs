//! Command implementations for the ratecast binary

pub mod drain;
pub mod produce;
pub mod run;

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

use ratecast::config::Config;
use ratecast::delivery::Senders;
use ratecast::processor::{ContentProcessor, HttpRenderer, ProcessorSettings};
use ratecast::resolver::SubscriptionResolver;
use ratecast::scheduler::Producer;
use ratecast::storage::memory::MemoryConnector;
use ratecast::storage::postgres::PostgresConnector;
use ratecast::storage::rates::StoreRateSource;
use ratecast::storage::repository::{
    FeedRepository, RenderSettingsRepository, SubscriptionRepository,
};
use ratecast::storage::{ConnectionManager, ContentQueue, StoreConnector, StoreLayout};

pub use drain::{drain, queue_depth, queue_remove};
pub use produce::{produce, ProduceArgs};
pub use run::run;

/// URL scheme selecting the in-process store
const MEMORY_SCHEME: &str = "memory://";

/// Shared wiring for every command
pub struct Services {
    pub config: Config,
    pub manager: Arc<ConnectionManager>,
    pub layout: StoreLayout,
    pub queue: ContentQueue,
}

impl Services {
    pub fn new(config: Config) -> Result<Self> {
        let connector: Arc<dyn StoreConnector> = if config.store.url.starts_with(MEMORY_SCHEME) {
            Arc::new(MemoryConnector::default())
        } else {
            Arc::new(PostgresConnector::new(
                config.store.url.clone(),
                config.store.pool_size,
            ))
        };

        let manager = Arc::new(ConnectionManager::new(connector, config.connection.policy()));
        let layout = StoreLayout::for_environment(config.store.environment);
        let queue = ContentQueue::new(manager.clone(), layout.queue());

        Ok(Self {
            config,
            manager,
            layout,
            queue,
        })
    }

    pub fn producer(&self) -> Result<Producer> {
        let mut timezones = BTreeMap::new();
        for country in self.config.countries.keys() {
            let tz = self
                .config
                .timezone(country)
                .with_context(|| format!("Invalid timezone for country '{country}'"))?;
            timezones.insert(country.clone(), tz);
        }

        let resolver = SubscriptionResolver::new(
            SubscriptionRepository::new(self.manager.clone(), self.layout.clone()),
            Arc::new(StoreRateSource::new(self.manager.clone(), self.layout.clone())),
        );

        Ok(Producer::new(
            resolver,
            RenderSettingsRepository::new(self.manager.clone(), &self.layout),
            self.queue.clone(),
            timezones,
        )
        .with_silence(self.config.logging.silence_mode))
    }

    pub fn processor(&self) -> Result<ContentProcessor> {
        let renderer = HttpRenderer::from_config(&self.config.render)
            .context("Failed to build render client")?;
        let senders =
            Senders::from_config(&self.config).context("Failed to build delivery senders")?;

        Ok(ContentProcessor::new(
            self.queue.clone(),
            FeedRepository::new(self.manager.clone(), &self.layout),
            Arc::new(renderer),
            senders,
            ProcessorSettings::from(&self.config.processor),
        ))
    }
}
