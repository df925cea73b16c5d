//! Client for the external render service
//!
//! Images are rendered from `<templates_dir>/<template>.hbs` by
//! `POST {image_host}/api/render`; videos are assembled from already
//! rendered fragments by `POST {video_host}/api/generate-video`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::config::RenderConfig;

/// Result type for render operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Render service errors
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Template file could not be read
    #[error("Template '{name}' unavailable: {source}")]
    Template {
        name: String,
        #[source]
        source: io::Error,
    },

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success answer
    #[error("Render service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Image payload is not valid base64
    #[error("Invalid image payload: {0}")]
    Decode(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The service answered without any media
    #[error("Render service returned no media")]
    EmptyResult,
}

/// A rendered image
#[derive(Debug, Clone, Default)]
pub struct RenderedImage {
    /// Decoded image bytes, inline or read back from the media folder
    pub image: Option<Bytes>,
    /// Path on the shared media volume
    pub image_path: Option<String>,
}

/// Render backend used by the drain loop
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render `content` with the named template
    async fn render_image(&self, template: &str, content: &Value) -> RenderResult<RenderedImage>;

    /// Assemble a video from a bundled item, returning its media path
    async fn render_video(&self, content: &Value) -> RenderResult<String>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageReply {
    image: Option<String>,
    image_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoReply {
    video_path: Option<String>,
}

/// [`Renderer`] backed by the image and video render hosts
pub struct HttpRenderer {
    client: Client,
    image_host: String,
    video_host: String,
    templates_dir: PathBuf,
    media_folder: PathBuf,
}

impl HttpRenderer {
    pub fn new(client: Client, config: &RenderConfig) -> Self {
        Self {
            client,
            image_host: config.image_host.trim_end_matches('/').to_string(),
            video_host: config.video_host.trim_end_matches('/').to_string(),
            templates_dir: config.templates_dir.clone(),
            media_folder: config.media_folder.clone(),
        }
    }

    /// Build a renderer with its own client honoring the configured timeout
    pub fn from_config(config: &RenderConfig) -> RenderResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::new(client, config))
    }

    async fn template(&self, name: &str) -> RenderResult<String> {
        let path = self.templates_dir.join(format!("{name}.hbs"));
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| RenderError::Template {
                name: name.to_string(),
                source,
            })
    }

    async fn post(&self, url: &str, body: Value) -> RenderResult<String> {
        let response = self.client.post(url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(RenderError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    /// Image bytes for a path the service wrote to the media volume
    async fn read_media(&self, path: &str) -> Option<Bytes> {
        let full = self.media_folder.join(path.trim_start_matches('/'));
        match tokio::fs::read(&full).await {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(e) => {
                warn!(path = %full.display(), error = %e, "Rendered image not readable");
                None
            }
        }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render_image(&self, template: &str, content: &Value) -> RenderResult<RenderedImage> {
        let html = self.template(template).await?;
        let url = format!("{}/api/render", self.image_host);
        debug!(template, url = %url, "Rendering image");

        let body = self
            .post(
                &url,
                json!({
                    "data": {
                        "html": html,
                        "type": "png",
                        "content": content,
                        "encoding": "base64",
                        "quality": 100
                    }
                }),
            )
            .await?;
        let reply: ImageReply = serde_json::from_str(&body)?;

        let image_path = reply.image_path.filter(|path| !path.is_empty());
        let image = match reply.image.filter(|image| !image.is_empty()) {
            Some(encoded) => Some(Bytes::from(
                STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| RenderError::Decode(e.to_string()))?,
            )),
            None => match image_path.as_deref() {
                Some(path) => self.read_media(path).await,
                None => None,
            },
        };

        if image.is_none() && image_path.is_none() {
            return Err(RenderError::EmptyResult);
        }
        Ok(RenderedImage { image, image_path })
    }

    async fn render_video(&self, content: &Value) -> RenderResult<String> {
        let url = format!("{}/api/generate-video", self.video_host);
        debug!(url = %url, "Generating video");

        let body = self.post(&url, json!({ "data": { "content": content } })).await?;
        let reply: VideoReply = serde_json::from_str(&body)?;
        reply
            .video_path
            .filter(|path| !path.is_empty())
            .ok_or(RenderError::EmptyResult)
    }
}
