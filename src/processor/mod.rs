//! Queue drain loop
//!
//! The [`ContentProcessor`] polls the queue depth on a fixed interval and runs
//! at most one drain at a time in this process. A drain leases one item,
//! renders it, fans it out to the delivery channels and deletes it. Render
//! failures abort the item; it is removed all the same and never retried.

pub mod render;

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ProcessorConfig;
use crate::delivery::{fan_out, Artifact, Senders};
use crate::metrics;
use crate::models::{Platform, QueueItem};
use crate::storage::queue::Claimed;
use crate::storage::repository::FeedRepository;
use crate::storage::{ContentQueue, StoreResult};

pub use render::{HttpRenderer, RenderError, RenderResult, RenderedImage, Renderer};

/// How one drain cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing to claim
    Empty,
    /// Rendered and handed to the fan-out
    Delivered,
    /// Render settings disabled rendering for this kind of item
    RenderSkipped,
    /// Rendering failed; the item was dropped
    RenderFailed,
    /// The queued document did not decode; it was dropped
    Malformed,
}

impl DrainOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Delivered => "delivered",
            Self::RenderSkipped => "render_skipped",
            Self::RenderFailed => "render_failed",
            Self::Malformed => "malformed",
        }
    }
}

/// Drain loop timing and lease ownership
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Claimant recorded on leased items
    pub owner: String,
    pub lease: Duration,
    pub poll_interval: Duration,
}

impl From<&ProcessorConfig> for ProcessorSettings {
    fn from(config: &ProcessorConfig) -> Self {
        Self {
            owner: config.instance_id.clone(),
            lease: Duration::from_secs(config.lease_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
        }
    }
}

/// Clears the in-flight flag when the drain ends, however it ends
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight queue consumer
#[derive(Clone)]
pub struct ContentProcessor {
    queue: ContentQueue,
    feed: FeedRepository,
    renderer: Arc<dyn Renderer>,
    senders: Senders,
    settings: ProcessorSettings,
    in_flight: Arc<AtomicBool>,
    is_running: Arc<RwLock<bool>>,
}

impl ContentProcessor {
    pub fn new(
        queue: ContentQueue,
        feed: FeedRepository,
        renderer: Arc<dyn Renderer>,
        senders: Senders,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            queue,
            feed,
            renderer,
            senders,
            settings,
            in_flight: Arc::new(AtomicBool::new(false)),
            // Armed here so a stop() issued before run() starts is kept
            is_running: Arc::new(RwLock::new(true)),
        }
    }

    /// Whether a drain is currently in progress
    pub fn is_draining(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn try_begin(&self) -> Option<InFlight> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(self.in_flight.clone()))
    }

    /// One poll: start a background drain when items wait and none is running
    ///
    /// Store failures read as an empty queue so the loop keeps polling.
    pub async fn poll_once(&self) -> Option<JoinHandle<()>> {
        if self.is_draining() {
            debug!("Drain in flight, skipping poll");
            return None;
        }

        let depth = self.queue.depth_or_zero().await;
        metrics::set_queue_depth(depth);
        if depth == 0 {
            return None;
        }

        let guard = self.try_begin()?;
        let processor = self.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = processor.drain_one().await {
                error!(error = %e, "Drain cycle failed");
            }
        }))
    }

    /// Poll until [`stop`](Self::stop) is called; returns at once if already stopped
    pub async fn run(&self) {
        info!(
            owner = %self.settings.owner,
            interval_secs = self.settings.poll_interval.as_secs(),
            "Drain loop started"
        );
        self.senders.check_health().await;

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while *self.is_running.read().await {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = self.wait_for_stop() => {
                    break;
                }
            }
        }

        info!("Drain loop stopped");
    }

    /// Stop the poll loop; a drain already in flight runs to completion
    pub async fn stop(&self) {
        *self.is_running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    async fn wait_for_stop(&self) {
        while *self.is_running.read().await {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Lease, render, deliver and delete one item
    pub async fn drain_one(&self) -> StoreResult<DrainOutcome> {
        let started = Instant::now();
        let claimed = self
            .queue
            .claim_one(&self.settings.owner, self.settings.lease)
            .await?;

        let (id, mut item) = match claimed {
            None => return Ok(DrainOutcome::Empty),
            Some(Claimed::Malformed(id, reason)) => {
                warn!(id = ?id, reason = %reason, "Dropping malformed queue document");
                if let Some(id) = id {
                    self.queue.delete(&id).await?;
                }
                metrics::record_drain("unknown", DrainOutcome::Malformed.as_str(), 0.0);
                return Ok(DrainOutcome::Malformed);
            }
            Some(Claimed::Item(id, item)) => (id, *item),
        };

        info!(
            time = %item.time,
            name = %item.content.name,
            platform = %item.platform,
            "Drain started"
        );

        let outcome = match self.process(&mut item).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    subscription_id = %item.subscription_id,
                    platform = %item.platform,
                    error = %e,
                    "Render failed, dropping item"
                );
                DrainOutcome::RenderFailed
            }
        };

        if self.queue.delete(&id).await? == 0 {
            warn!(id = %id, "Drained item was already gone");
        }

        if item.should_post_to_feed && item.processes.values().any(|r| r.completed) {
            if let Err(e) = self.feed.append(&item).await {
                warn!(error = %e, "Failed to append item to the feed");
            }
        }

        let elapsed = started.elapsed();
        metrics::record_drain(
            item.platform.as_str(),
            outcome.as_str(),
            elapsed.as_secs_f64(),
        );
        info!(
            platform = %item.platform,
            outcome = outcome.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Drain finished"
        );
        Ok(outcome)
    }

    /// Render and fan out; deliveries land in `item.processes`
    async fn process(&self, item: &mut QueueItem) -> RenderResult<DrainOutcome> {
        let artifact = if item.platform == Platform::VideoAll {
            if !item.render_settings.video_should_render {
                return Ok(DrainOutcome::RenderSkipped);
            }
            self.render_video(item).await?
        } else {
            if !item.render_settings.image_should_render {
                return Ok(DrainOutcome::RenderSkipped);
            }
            self.render_image(item).await?
        };

        item.processes = fan_out(&self.senders, item, &artifact).await;
        Ok(DrainOutcome::Delivered)
    }

    /// Render the item's own template and record the image path on it
    async fn render_image(&self, item: &mut QueueItem) -> RenderResult<Artifact> {
        let template = item.render_settings.template(&item.template).to_string();
        let content = serde_json::to_value(&*item)?;
        let rendered = self.renderer.render_image(&template, &content).await?;

        item.image_path = rendered.image_path.clone();
        Ok(Artifact {
            image: rendered.image,
            image_path: rendered.image_path,
            video_path: None,
        })
    }

    /// Render every fragment and the title card, then assemble the video
    async fn render_video(&self, item: &mut QueueItem) -> RenderResult<Artifact> {
        let settings = item.render_settings.clone();
        if let Some(video) = item.video.as_mut() {
            for fragment in &mut video.fragments {
                let content: Value = serde_json::to_value(&*fragment)?;
                let rendered = self
                    .renderer
                    .render_image(settings.template(&fragment.template), &content)
                    .await?;
                fragment.image_path = rendered.image_path;
            }
        }

        let mut artifact = self.render_image(item).await?;
        let content = serde_json::to_value(&*item)?;
        let video_path = self.renderer.render_video(&content).await?;

        item.video_path = Some(video_path.clone());
        artifact.video_path = Some(video_path);
        Ok(artifact)
    }
}
