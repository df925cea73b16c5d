//! Delivery channels for rendered content
//!
//! Each [`ChannelSender`] pushes one artifact to one external service. The
//! [`fan_out`] step picks the channels that apply to an item, runs the sends
//! concurrently and records every outcome without letting one failure stop
//! the others.

pub mod service;
pub mod telegram;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metrics;
use crate::models::{DeliveryChannel, DeliveryResult, QueueItem};

pub use service::ServiceSender;
pub use telegram::TelegramSender;

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur during channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid channel configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The item lacks what this channel needs (target chat, image)
    #[error("Missing {0}")]
    Missing(&'static str),

    /// Channel temporarily unavailable
    #[error("Channel temporarily unavailable: {0}")]
    Unavailable(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// The service answered but refused the content
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error
    #[error("Channel error: {0}")]
    Other(String),
}

impl ChannelError {
    /// Whether a later attempt could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::HttpError(e) => e.is_timeout() || e.is_connect(),
            Self::Unavailable(_) | Self::RateLimited(_) => true,
            Self::InvalidConfig(_)
            | Self::Missing(_)
            | Self::Rejected(_)
            | Self::SerializationError(_)
            | Self::Other(_) => false,
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = format!("HTTP {status}: {body}");
        if status == StatusCode::TOO_MANY_REQUESTS {
            Self::RateLimited(message)
        } else if status.is_server_error() {
            Self::Unavailable(message)
        } else {
            Self::Other(message)
        }
    }
}

/// What the render step produced for an item
#[derive(Debug, Clone, Default)]
pub struct Artifact {
    /// Image bytes for uploads
    pub image: Option<Bytes>,
    /// Image path on the shared media volume
    pub image_path: Option<String>,
    /// Video path on the shared media volume
    pub video_path: Option<String>,
}

/// One delivery target
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Channel served by this sender
    fn channel(&self) -> DeliveryChannel;

    /// Deliver the item's artifact
    async fn send(&self, item: &QueueItem, artifact: &Artifact) -> ChannelResult<DeliveryResult>;

    /// Check if the channel is available
    async fn health_check(&self) -> ChannelResult<bool> {
        Ok(true)
    }
}

/// `{completed, errors?}` answer of the media services
#[derive(Debug, Deserialize)]
struct ServiceReply {
    completed: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

/// Interpret a 2xx body; anything without the reply shape counts as completed
pub(crate) fn parse_reply(body: &str) -> DeliveryResult {
    match serde_json::from_str::<ServiceReply>(body) {
        Ok(reply) => DeliveryResult {
            completed: reply.completed,
            errors: reply
                .errors
                .into_iter()
                .map(|e| match e {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
        },
        Err(_) => DeliveryResult::completed(),
    }
}

// ============================================================================
// Registry and fan-out
// ============================================================================

/// Senders available to the drain loop, one per channel
#[derive(Clone, Default)]
pub struct Senders {
    senders: BTreeMap<DeliveryChannel, Arc<dyn ChannelSender>>,
}

impl Senders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender, replacing any previous one for the same channel
    pub fn with(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    pub fn get(&self, channel: DeliveryChannel) -> Option<&Arc<dyn ChannelSender>> {
        self.senders.get(&channel)
    }

    /// Health of every registered channel; errors count as unhealthy
    pub async fn check_health(&self) -> BTreeMap<DeliveryChannel, bool> {
        let checks = self.senders.iter().map(|(channel, sender)| async move {
            let healthy = match sender.health_check().await {
                Ok(healthy) => healthy,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Channel health check errored");
                    false
                }
            };
            if !healthy {
                warn!(channel = %channel, "Channel unavailable");
            }
            (*channel, healthy)
        });
        join_all(checks).await.into_iter().collect()
    }

    /// Every channel wired to the configured services
    pub fn from_config(config: &Config) -> ChannelResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.delivery_timeout())
            .build()?;
        let render = &config.render;

        Ok(Self::new()
            .with(Arc::new(TelegramSender::new(
                client.clone(),
                &config.delivery,
            )))
            .with(Arc::new(ServiceSender::stories(client.clone(), &render.image_host)))
            .with(Arc::new(ServiceSender::youtube(client.clone(), &render.video_host)))
            .with(Arc::new(ServiceSender::instagram(client.clone(), &render.image_host)))
            .with(Arc::new(ServiceSender::tiktok(client, &render.video_host))))
    }
}

/// Channels that will fire for `item`
///
/// A channel fires when it applies to the platform, the render settings
/// allow it, and the item itself opted in.
pub fn planned_channels(item: &QueueItem) -> Vec<DeliveryChannel> {
    item.platform
        .channels()
        .iter()
        .copied()
        .filter(|channel| {
            let allowed = item.render_settings.allows(*channel);
            let wanted = item.wants(*channel);
            if !(allowed && wanted) {
                debug!(
                    channel = %channel,
                    allowed,
                    wanted,
                    "Channel gated off"
                );
            }
            allowed && wanted
        })
        .collect()
}

/// Send `artifact` to every planned channel concurrently
///
/// The returned map holds one entry per attempted channel.
pub async fn fan_out(
    senders: &Senders,
    item: &QueueItem,
    artifact: &Artifact,
) -> BTreeMap<String, DeliveryResult> {
    let sends = planned_channels(item).into_iter().map(|channel| async move {
        let result = match senders.get(channel) {
            Some(sender) => match sender.send(item, artifact).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Delivery failed");
                    DeliveryResult::failed(e.to_string())
                }
            },
            None => DeliveryResult::failed(format!("no sender configured for {channel}")),
        };
        metrics::record_delivery(channel.as_str(), result.completed);
        (channel.as_str().to_string(), result)
    });

    let results: BTreeMap<String, DeliveryResult> = join_all(sends).await.into_iter().collect();
    for (channel, result) in &results {
        info!(channel = %channel, result = %result, "Delivery");
    }
    results
}
