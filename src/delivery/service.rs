//! Media-service senders
//!
//! Stories, reels and video uploads are handed to the render services, which
//! own the platform credentials. Every request has the shape
//! `POST {host}{endpoint} {"data": {"content": <item>, ...}}`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{parse_reply, Artifact, ChannelError, ChannelResult, ChannelSender};
use crate::models::{DeliveryChannel, DeliveryResult, QueueItem};

/// Title tag rewritten for reels
const SHORTS_TAG: &str = "#shorts";
const REELS_TAG: &str = "#reels";

/// Sender posting items to one media-service endpoint
pub struct ServiceSender {
    channel: DeliveryChannel,
    url: String,
    client: Client,
    /// Extra fields placed next to `content`
    options: Map<String, Value>,
}

impl ServiceSender {
    pub fn new(channel: DeliveryChannel, client: Client, host: &str, endpoint: &str) -> Self {
        Self {
            channel,
            url: format!("{}{endpoint}", host.trim_end_matches('/')),
            client,
            options: Map::new(),
        }
    }

    /// Add a field to the `data` object of every request
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// `POST {image_host}/api/send-stories`
    pub fn stories(client: Client, image_host: &str) -> Self {
        Self::new(DeliveryChannel::Stories, client, image_host, "/api/send-stories")
    }

    /// `POST {video_host}/api/send-video/youtube`; media is kept for the other uploads
    pub fn youtube(client: Client, video_host: &str) -> Self {
        Self::new(
            DeliveryChannel::Youtube,
            client,
            video_host,
            "/api/send-video/youtube",
        )
        .with_option("isRemoveMedia", Value::Bool(false))
    }

    /// `POST {image_host}/api/send-reels`
    pub fn instagram(client: Client, image_host: &str) -> Self {
        Self::new(DeliveryChannel::Instagram, client, image_host, "/api/send-reels")
    }

    /// `POST {video_host}/api/send-video/tiktok`
    pub fn tiktok(client: Client, video_host: &str) -> Self {
        Self::new(
            DeliveryChannel::Tiktok,
            client,
            video_host,
            "/api/send-video/tiktok",
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn content(&self, item: &QueueItem) -> ChannelResult<Value> {
        let mut item = item.clone();
        if self.channel == DeliveryChannel::Instagram {
            if let Some(video) = item.video.as_mut() {
                video.title_instagram = video.title_instagram.replace(SHORTS_TAG, REELS_TAG);
            }
        }
        Ok(serde_json::to_value(item)?)
    }
}

#[async_trait]
impl ChannelSender for ServiceSender {
    fn channel(&self) -> DeliveryChannel {
        self.channel
    }

    async fn send(&self, item: &QueueItem, artifact: &Artifact) -> ChannelResult<DeliveryResult> {
        let needs_video = matches!(
            self.channel,
            DeliveryChannel::Youtube | DeliveryChannel::Instagram | DeliveryChannel::Tiktok
        );
        if needs_video && artifact.video_path.is_none() {
            return Err(ChannelError::Missing("video"));
        }
        if self.channel == DeliveryChannel::Stories && artifact.image_path.is_none() {
            return Err(ChannelError::Missing("image path"));
        }

        let mut data = self.options.clone();
        data.insert("content".to_string(), self.content(item)?);

        debug!(channel = %self.channel, url = %self.url, "Posting to media service");
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "data": data }))
            .send()
            .await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());

        if !status.is_success() {
            return Err(ChannelError::from_status(status, &body));
        }
        Ok(parse_reply(&body))
    }

    async fn health_check(&self) -> ChannelResult<bool> {
        match self.client.head(&self.url).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "Media service health check failed");
                Ok(false)
            }
        }
    }
}
