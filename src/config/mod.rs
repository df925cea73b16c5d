//! Configuration management for ratecast
//!
//! Configuration comes from environment variables (optionally seeded from a
//! `.env` file) or from a TOML file. Render hosts and the media folder are
//! looked up per deployment environment first (`IMAGE_RENDER_HOST_PROD`), then
//! without the suffix.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::storage::connection::ConnectionPolicy;

/// Channel collections every country is scheduled for by default
pub const DEFAULT_COLLECTIONS: &[&str] = &[
    "subscriptions-users",
    "subscriptions-telegram",
    "subscriptions-stories",
    "subscriptions-video",
];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Document store
    pub store: StoreConfig,

    /// Reconnect and health policy
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// External render service
    pub render: RenderConfig,

    /// Delivery channels
    pub delivery: DeliveryConfig,

    /// Producer scheduling
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Queue drain loop
    #[serde(default)]
    pub processor: ProcessorConfig,

    /// Country code to IANA timezone
    #[serde(default = "default_countries")]
    pub countries: BTreeMap<String, String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Deployment environment; selects database names and per-environment hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Dev),
            "prod" | "production" => Ok(Self::Prod),
            other => anyhow::bail!("Unknown environment '{other}' (expected dev or prod)"),
        }
    }
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `postgres://...` or `memory://`
    pub url: String,

    /// Deployment environment
    pub environment: Environment,

    /// Maximum pool size
    pub pool_size: usize,
}

/// Reconnect and health policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_health_failures: u32,
    pub heartbeat_interval_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let policy = ConnectionPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_secs: policy.base_delay.as_secs(),
            max_health_failures: policy.max_health_failures,
            heartbeat_interval_secs: policy.heartbeat_interval.as_secs(),
        }
    }
}

impl ConnectionConfig {
    pub fn policy(&self) -> ConnectionPolicy {
        ConnectionPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.base_delay_secs),
            max_health_failures: self.max_health_failures,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
        }
    }
}

/// Render service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Image render host (also serves stories and reels uploads)
    pub image_host: String,

    /// Video render host (also serves video uploads)
    pub video_host: String,

    /// Directory holding `<template>.hbs` files
    pub templates_dir: PathBuf,

    /// Directory where the render service writes media files
    pub media_folder: PathBuf,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Telegram Bot API base URL
    pub telegram_api_base: String,

    /// Bot token; photo delivery is disabled without it
    pub bot_token: Option<String>,

    /// Caption attached to promotional posts
    pub promo_caption: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// A scheduled (country, channel collection) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerPair {
    pub country: String,
    pub collection: String,
}

/// Producer scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between firings
    pub interval_secs: u64,

    /// Producer runs allowed in flight at once
    pub max_concurrent_producers: usize,

    /// Pairs fired on every tick
    pub pairs: Vec<ProducerPair>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let pairs = default_countries()
            .keys()
            .flat_map(|country| {
                DEFAULT_COLLECTIONS.iter().map(move |collection| ProducerPair {
                    country: country.clone(),
                    collection: collection.to_string(),
                })
            })
            .collect();

        Self {
            interval_secs: 60,
            max_concurrent_producers: 8,
            pairs,
        }
    }
}

/// Drain loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Seconds between queue depth polls
    pub poll_interval_secs: u64,

    /// Seconds a claimed item stays invisible to other drains
    pub lease_secs: u64,

    /// Claimant name recorded on leased items
    pub instance_id: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            lease_secs: 600,
            instance_id: default_instance_id(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,

    /// Suppress per-run producer summaries
    pub silence_mode: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
            silence_mode: false,
        }
    }
}

fn default_countries() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("by".to_string(), "Europe/Minsk".to_string()),
        ("pl".to_string(), "Europe/Warsaw".to_string()),
    ])
}

fn default_instance_id() -> String {
    format!("ratecast-{}", std::process::id())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// `NAME_<ENV>` first, then `NAME`
fn env_for(name: &str, environment: Environment) -> Option<String> {
    let suffixed = format!("{name}_{}", environment.as_str().to_ascii_uppercase());
    std::env::var(suffixed).or_else(|_| std::env::var(name)).ok()
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let environment = match std::env::var("RATECAST_ENVIRONMENT") {
            Ok(value) => value.parse()?,
            Err(_) => Environment::Prod,
        };

        let url = std::env::var("RATECAST_STORE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .unwrap_or_else(|_| String::from("postgresql://localhost/ratecast"));

        let defaults = Self::default();

        let image_host = env_for("IMAGE_RENDER_HOST", environment)
            .unwrap_or(defaults.render.image_host);
        let video_host = env_for("VIDEO_RENDER_HOST", environment)
            .unwrap_or(defaults.render.video_host);
        let media_folder = env_for("MEDIA_FOLDER_PATH", environment)
            .map(PathBuf::from)
            .unwrap_or(defaults.render.media_folder);
        let templates_dir = std::env::var("RATECAST_TEMPLATES_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.render.templates_dir);

        let mut scheduler = SchedulerConfig::default();
        scheduler.interval_secs = env_parse("RATECAST_SCHEDULE_INTERVAL", scheduler.interval_secs);
        scheduler.max_concurrent_producers =
            env_parse("RATECAST_MAX_PRODUCERS", scheduler.max_concurrent_producers);
        if let Ok(pairs) = std::env::var("RATECAST_PAIRS") {
            scheduler.pairs = parse_pairs(&pairs)?;
        }

        let mut processor = ProcessorConfig::default();
        processor.poll_interval_secs = env_parse("RATECAST_POLL_INTERVAL", processor.poll_interval_secs);
        processor.lease_secs = env_parse("RATECAST_LEASE_SECS", processor.lease_secs);
        if let Ok(instance_id) = std::env::var("RATECAST_INSTANCE_ID") {
            processor.instance_id = instance_id;
        }

        Ok(Self {
            store: StoreConfig {
                url,
                environment,
                pool_size: env_parse("RATECAST_POOL_SIZE", defaults.store.pool_size),
            },
            connection: ConnectionConfig {
                max_attempts: env_parse("RATECAST_CONNECT_ATTEMPTS", defaults.connection.max_attempts),
                base_delay_secs: env_parse("RATECAST_CONNECT_DELAY", defaults.connection.base_delay_secs),
                ..defaults.connection
            },
            render: RenderConfig {
                image_host,
                video_host,
                templates_dir,
                media_folder,
                timeout_secs: env_parse("RATECAST_RENDER_TIMEOUT", defaults.render.timeout_secs),
            },
            delivery: DeliveryConfig {
                telegram_api_base: std::env::var("TELEGRAM_API_BASE")
                    .unwrap_or(defaults.delivery.telegram_api_base),
                bot_token: std::env::var("BOT_TOKEN").ok().filter(|t| !t.is_empty()),
                promo_caption: std::env::var("RATECAST_PROMO_CAPTION")
                    .unwrap_or(defaults.delivery.promo_caption),
                timeout_secs: env_parse("RATECAST_DELIVERY_TIMEOUT", defaults.delivery.timeout_secs),
            },
            scheduler,
            processor,
            countries: defaults.countries,
            logging: LoggingConfig {
                level: std::env::var("RATECAST_LOG_LEVEL").unwrap_or(defaults.logging.level),
                format: std::env::var("RATECAST_LOG_FORMAT").unwrap_or(defaults.logging.format),
                silence_mode: env_parse("SILENCE_MODE", false),
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.store.pool_size == 0 {
            anyhow::bail!("pool_size must be greater than 0");
        }

        if self.connection.max_attempts == 0 {
            anyhow::bail!("connection.max_attempts must be greater than 0");
        }

        for (name, host) in [
            ("render.image_host", &self.render.image_host),
            ("render.video_host", &self.render.video_host),
            ("delivery.telegram_api_base", &self.delivery.telegram_api_base),
        ] {
            url::Url::parse(host).with_context(|| format!("{name} is not a valid URL: {host}"))?;
        }

        if self.scheduler.interval_secs == 0 {
            anyhow::bail!("scheduler.interval_secs must be greater than 0");
        }

        if self.scheduler.max_concurrent_producers == 0 {
            anyhow::bail!("scheduler.max_concurrent_producers must be greater than 0");
        }

        if !(1..=5).contains(&self.processor.poll_interval_secs) {
            anyhow::bail!("processor.poll_interval_secs must be between 1 and 5");
        }

        for (country, zone) in &self.countries {
            zone.parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("Invalid timezone '{zone}' for country '{country}': {e}"))?;
        }

        for pair in &self.scheduler.pairs {
            if !self.countries.contains_key(&pair.country) {
                anyhow::bail!("Scheduled country '{}' has no timezone", pair.country);
            }
        }

        Ok(())
    }

    /// Timezone of a supported country
    pub fn timezone(&self, country: &str) -> Option<Tz> {
        self.countries.get(country).and_then(|zone| zone.parse().ok())
    }

    #[must_use]
    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render.timeout_secs)
    }

    #[must_use]
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery.timeout_secs)
    }
}

/// Parse `by:subscriptions-users,pl:subscriptions-video`
pub fn parse_pairs(value: &str) -> Result<Vec<ProducerPair>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (country, collection) = entry
                .split_once(':')
                .with_context(|| format!("Invalid pair '{entry}', expected country:collection"))?;
            Ok(ProducerPair {
                country: country.trim().to_string(),
                collection: collection.trim().to_string(),
            })
        })
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                url: String::from("postgresql://localhost/ratecast"),
                environment: Environment::Prod,
                pool_size: 10,
            },
            connection: ConnectionConfig::default(),
            render: RenderConfig {
                image_host: String::from("http://localhost:3000"),
                video_host: String::from("http://localhost:3001"),
                templates_dir: PathBuf::from("views/templates"),
                media_folder: PathBuf::from("media"),
                timeout_secs: 120,
            },
            delivery: DeliveryConfig {
                telegram_api_base: String::from("https://api.telegram.org"),
                bot_token: None,
                promo_caption: String::from("Support the project: https://ko-fi.com/"),
                timeout_secs: 60,
            },
            scheduler: SchedulerConfig::default(),
            processor: ProcessorConfig::default(),
            countries: default_countries(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_pairs_cover_countries_and_collections() {
        let config = SchedulerConfig::default();
        assert_eq!(config.pairs.len(), 2 * DEFAULT_COLLECTIONS.len());
        assert!(config.pairs.contains(&ProducerPair {
            country: "pl".to_string(),
            collection: "subscriptions-video".to_string(),
        }));
    }

    #[test]
    fn test_poll_interval_bounds() {
        let mut config = Config::default();
        config.processor.poll_interval_secs = 0;
        assert!(config.validate().is_err());
        config.processor.poll_interval_secs = 6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let mut config = Config::default();
        config.countries.insert("xx".to_string(), "Mars/Olympus".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pair_without_timezone_rejected() {
        let mut config = Config::default();
        config.scheduler.pairs.push(ProducerPair {
            country: "de".to_string(),
            collection: "subscriptions-users".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_country_timezones() {
        let config = Config::default();
        assert_eq!(config.timezone("pl"), Some(chrono_tz::Europe::Warsaw));
        assert_eq!(config.timezone("by"), Some(chrono_tz::Europe::Minsk));
        assert_eq!(config.timezone("de"), None);
    }

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs("by:subscriptions-users, pl:subscriptions-video,").unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].country, "pl");
        assert_eq!(pairs[1].collection, "subscriptions-video");

        assert!(parse_pairs("nocolon").is_err());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_connection_policy_conversion() {
        let policy = ConnectionConfig::default().policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_secs(5));
        assert_eq!(policy.max_health_failures, 3);
    }
}
