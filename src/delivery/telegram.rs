//! Telegram photo channel
//!
//! Uploads the rendered image with `sendPhoto` as multipart form data.
//! Direct subscriptions go to the user's chat, channel subscriptions to the
//! broadcast channel.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{Artifact, ChannelError, ChannelResult, ChannelSender};
use crate::config::DeliveryConfig;
use crate::models::{DeliveryChannel, DeliveryResult, Platform, QueueItem};

/// Bot API answer
#[derive(Debug, Deserialize)]
struct BotReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sender for the Telegram Bot API
pub struct TelegramSender {
    client: Client,
    api_base: String,
    bot_token: Option<String>,
    promo_caption: String,
}

impl TelegramSender {
    pub fn new(client: Client, config: &DeliveryConfig) -> Self {
        Self {
            client,
            api_base: config.telegram_api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            promo_caption: config.promo_caption.clone(),
        }
    }

    fn endpoint(&self) -> ChannelResult<String> {
        let token = self
            .bot_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ChannelError::InvalidConfig("bot token is not set".to_string()))?;
        Ok(format!("{}/bot{token}/sendPhoto", self.api_base))
    }

    /// Chat id and caption for the item's platform
    fn target(&self, item: &QueueItem) -> ChannelResult<(String, String)> {
        let (chat, caption) = match item.platform {
            Platform::Users => (&item.content.chat_id, item.content.date_time.clone()),
            Platform::Telegram => (&item.content.chanel, item.content.tag.clone()),
            Platform::TelegramPromo => (&item.content.chanel, self.promo_caption.clone()),
            _ => return Err(ChannelError::Other(format!(
                "platform {} is not delivered through Telegram",
                item.platform
            ))),
        };

        let chat = match chat {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(ChannelError::Missing("chat id")),
        };
        Ok((chat, caption))
    }
}

#[async_trait]
impl ChannelSender for TelegramSender {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Telegram
    }

    async fn send(&self, item: &QueueItem, artifact: &Artifact) -> ChannelResult<DeliveryResult> {
        let url = self.endpoint()?;
        let (chat_id, caption) = self.target(item)?;
        let image = artifact.image.clone().ok_or(ChannelError::Missing("image"))?;

        let photo = Part::stream(image)
            .file_name("image.png")
            .mime_str("image/png")?;
        let form = Form::new()
            .text("chat_id", chat_id.clone())
            .part("photo", photo)
            .text("caption", caption);

        debug!(chat_id = %chat_id, platform = %item.platform, "Sending photo");
        let response = self.client.post(&url).multipart(form).send().await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ChannelError::from_status(status, &body));
        }

        match serde_json::from_str::<BotReply>(&body) {
            Ok(reply) if !reply.ok => Err(ChannelError::Rejected(
                reply.description.unwrap_or_else(|| "unknown error".to_string()),
            )),
            _ => Ok(DeliveryResult::completed()),
        }
    }

    /// Without a bot token no photo can be sent
    async fn health_check(&self) -> ChannelResult<bool> {
        Ok(self.endpoint().is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RenderContent, RenderSettings, SubscriptionRef};
    use bytes::Bytes;
    use serde_json::json;
    use std::collections::BTreeMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(api_base: &str, token: Option<&str>) -> DeliveryConfig {
        DeliveryConfig {
            telegram_api_base: api_base.to_string(),
            bot_token: token.map(str::to_string),
            promo_caption: "Support us".to_string(),
            timeout_secs: 5,
        }
    }

    fn item(platform: Platform) -> QueueItem {
        QueueItem {
            id: None,
            subscription_id: SubscriptionRef::Plain("sub".to_string()),
            country: "pl".to_string(),
            platform,
            time: "12:00".to_string(),
            template: "subscriptions-users".to_string(),
            keys: vec![],
            last_values: BTreeMap::new(),
            diff_values: BTreeMap::new(),
            target_time_to_diff: None,
            render_settings: RenderSettings::default(),
            should_post_youtube: true,
            should_post_instagram: true,
            should_post_tiktok: true,
            should_post_to_feed: false,
            content: RenderContent {
                chat_id: Some(json!(12345)),
                chanel: Some(json!("@rates")),
                tag: "#Daily".to_string(),
                date_time: "05.03.2024, 12:00:00".to_string(),
                ..RenderContent::default()
            },
            video: None,
            image_path: None,
            video_path: None,
            processes: BTreeMap::new(),
        }
    }

    fn image() -> Artifact {
        Artifact {
            image: Some(Bytes::from_static(b"\x89PNG")),
            ..Artifact::default()
        }
    }

    #[test]
    fn test_target_per_platform() {
        let sender = TelegramSender::new(Client::new(), &config("http://tg", Some("t")));

        let (chat, caption) = sender.target(&item(Platform::Users)).unwrap();
        assert_eq!(chat, "12345");
        assert_eq!(caption, "05.03.2024, 12:00:00");

        let (chat, caption) = sender.target(&item(Platform::Telegram)).unwrap();
        assert_eq!(chat, "@rates");
        assert_eq!(caption, "#Daily");

        let (_, caption) = sender.target(&item(Platform::TelegramPromo)).unwrap();
        assert_eq!(caption, "Support us");
    }

    #[tokio::test]
    async fn test_send_photo() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottoken/sendPhoto"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let sender = TelegramSender::new(Client::new(), &config(&server.uri(), Some("token")));
        let result = sender.send(&item(Platform::Users), &image()).await.unwrap();
        assert!(result.completed);
    }

    #[tokio::test]
    async fn test_rejected_by_bot_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottoken/sendPhoto"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": false,
                "description": "chat not found"
            })))
            .mount(&server)
            .await;

        let sender = TelegramSender::new(Client::new(), &config(&server.uri(), Some("token")));
        let err = sender.send(&item(Platform::Telegram), &image()).await.unwrap_err();
        assert!(err.to_string().contains("chat not found"));
    }

    #[tokio::test]
    async fn test_missing_token_and_image() {
        let sender = TelegramSender::new(Client::new(), &config("http://tg", None));
        let err = sender.send(&item(Platform::Users), &image()).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidConfig(_)));

        let sender = TelegramSender::new(Client::new(), &config("http://tg", Some("t")));
        let err = sender
            .send(&item(Platform::Users), &Artifact::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Missing("image")));
    }

    #[tokio::test]
    async fn test_health_requires_token() {
        let sender = TelegramSender::new(Client::new(), &config("http://tg", None));
        assert!(!sender.health_check().await.unwrap());

        let sender = TelegramSender::new(Client::new(), &config("http://tg", Some("t")));
        assert!(sender.health_check().await.unwrap());
    }
}
