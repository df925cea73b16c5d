//! One producer run: resolve a slot and enqueue its queue items
//!
//! ```text
//! resolve -> render settings -> day filter -> split video -> enrich -> cards -> enqueue
//! ```

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::{Error, ErrorCategory, Result};
use crate::metrics;
use crate::models::{
    Fragment, Platform, QueueItem, RenderContent, RenderSettings, Subscription, SubscriptionRef,
    VideoBundle,
};
use crate::resolver::content::{rate_records, render_content, video_bundle};
use crate::resolver::{filter_available, split_general_video, Enriched, SlotQuery, SubscriptionResolver};
use crate::storage::repository::RenderSettingsRepository;
use crate::storage::{ContentQueue, ObjectId, StoreError};
use crate::utils::format_slot;

/// Arguments of one producer run
#[derive(Debug, Clone, Default)]
pub struct ProduceRequest {
    pub country: String,
    pub collection: String,
    /// Slot to resolve; defaults to the current local `HH:MM`
    pub time: Option<String>,
    /// Template forced for every item
    pub template: Option<String>,
    /// Produce only this subscription
    pub subscription_id: Option<ObjectId>,
    /// Local wall-clock time to run at instead of now
    pub datetime: Option<NaiveDateTime>,
}

impl ProduceRequest {
    pub fn new(country: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            collection: collection.into(),
            ..Self::default()
        }
    }

    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }

    pub fn with_datetime(mut self, datetime: NaiveDateTime) -> Self {
        self.datetime = Some(datetime);
        self
    }
}

/// How a producer run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerOutcome {
    /// Items were materialized (possibly zero after change detection)
    Completed,
    /// No subscription matched the slot
    NoMatch,
    /// Every match was inactive today
    Filtered,
    /// The run ended early on a non-connectivity error
    Failed(String),
}

impl ProducerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::NoMatch => "no_match",
            Self::Filtered => "filtered",
            Self::Failed(_) => "failed",
        }
    }
}

/// Summary of one producer run, sent to the scheduler's collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerReport {
    pub country: String,
    pub collection: String,
    pub time: String,
    pub matched: usize,
    pub filtered_out: usize,
    pub enqueued: usize,
    pub skipped_unchanged: usize,
    pub outcome: ProducerOutcome,
}

impl ProducerReport {
    fn new(country: &str, collection: &str, time: &str) -> Self {
        Self {
            country: country.to_string(),
            collection: collection.to_string(),
            time: time.to_string(),
            matched: 0,
            filtered_out: 0,
            enqueued: 0,
            skipped_unchanged: 0,
            outcome: ProducerOutcome::Completed,
        }
    }

    /// Report for a run that could not start or reach the store
    pub fn failed(country: &str, collection: &str, error: &Error) -> Self {
        Self {
            outcome: ProducerOutcome::Failed(error.to_string()),
            ..Self::new(country, collection, "")
        }
    }
}

impl fmt::Display for ProducerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {} | matched={} filtered={} enqueued={} unchanged={} | {}",
            self.country,
            self.collection,
            self.time,
            self.matched,
            self.filtered_out,
            self.enqueued,
            self.skipped_unchanged,
            self.outcome.as_str()
        )
    }
}

/// Resolves slots into queue items
pub struct Producer {
    resolver: SubscriptionResolver,
    settings: RenderSettingsRepository,
    queue: ContentQueue,
    timezones: BTreeMap<String, Tz>,
    silent: bool,
}

impl Producer {
    pub fn new(
        resolver: SubscriptionResolver,
        settings: RenderSettingsRepository,
        queue: ContentQueue,
        timezones: BTreeMap<String, Tz>,
    ) -> Self {
        Self {
            resolver,
            settings,
            queue,
            timezones,
            silent: false,
        }
    }

    /// Suppress the per-run summary lines
    pub fn with_silence(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Timezone configured for `country`
    pub fn timezone(&self, country: &str) -> Option<Tz> {
        self.timezones.get(country).copied()
    }

    /// Local time in `country`, honoring a requested wall-clock time
    pub fn local_now(&self, country: &str, at: Option<NaiveDateTime>) -> Result<DateTime<Tz>> {
        let tz = self
            .timezone(country)
            .ok_or_else(|| Error::config(format!("Unsupported country '{country}'")))?;

        match at {
            Some(naive) => tz
                .from_local_datetime(&naive)
                .earliest()
                .ok_or_else(|| Error::config(format!("{naive} does not exist in {tz}"))),
            None => Ok(Utc::now().with_timezone(&tz)),
        }
    }

    /// Run once for `request`
    ///
    /// Only connectivity failures are returned as errors; anything else is
    /// logged and reported as a failed run.
    pub async fn run(&self, request: &ProduceRequest) -> Result<ProducerReport> {
        let now = self.local_now(&request.country, request.datetime)?;
        let time = request.time.clone().unwrap_or_else(|| format_slot(&now));
        let mut report = ProducerReport::new(&request.country, &request.collection, &time);

        let result = self.produce(request, &now, &time, &mut report).await;
        let result = match result {
            Ok(()) => Ok(report),
            Err(e) if e.category() == ErrorCategory::Connectivity => Err(e),
            Err(e) => {
                warn!(
                    country = %request.country,
                    collection = %request.collection,
                    time = %time,
                    error = %e,
                    "Producer run failed"
                );
                report.outcome = ProducerOutcome::Failed(e.to_string());
                Ok(report)
            }
        };

        if let Ok(report) = &result {
            metrics::record_producer_run(
                &report.country,
                &report.collection,
                report.outcome.as_str(),
                report.enqueued,
                report.skipped_unchanged,
                report.filtered_out,
            );
        }
        result
    }

    async fn produce(
        &self,
        request: &ProduceRequest,
        now: &DateTime<Tz>,
        time: &str,
        report: &mut ProducerReport,
    ) -> Result<()> {
        let query = SlotQuery {
            collection: request.collection.clone(),
            country: request.country.clone(),
            time: time.to_string(),
            subscription_id: request.subscription_id.clone(),
        };

        let mut subscriptions = self
            .resolver
            .resolve(&query)
            .await
            .map_err(|e| resolution_failure(&query, e))?;
        report.matched = subscriptions.len();
        if subscriptions.is_empty() {
            debug!(country = %query.country, collection = %query.collection, time, "No subscriptions for slot");
            report.outcome = ProducerOutcome::NoMatch;
            return Ok(());
        }

        let settings = self.render_settings(&query, &subscriptions[0]).await;

        if !settings.skip_filter_by_day {
            subscriptions = filter_available(subscriptions, now);
            report.filtered_out = report.matched - subscriptions.len();
            if subscriptions.is_empty() {
                if !self.silent {
                    info!(
                        country = %query.country,
                        collection = %query.collection,
                        time,
                        "Subscriptions list empty after filtering"
                    );
                }
                self.finish(&query).await?;
                report.outcome = ProducerOutcome::Filtered;
                return Ok(());
            }
        }

        let (general, subscriptions) = split_general_video(subscriptions);
        let enriched = self
            .resolver
            .enrich(subscriptions, &query.country, time, now)
            .await
            .map_err(|e| resolution_failure(&query, e))?;

        let cards: Vec<(Enriched, RenderContent)> = enriched
            .into_iter()
            .map(|e| {
                let records = rate_records(time, &e.keys, &e.last_values, &e.diff_values);
                let content =
                    render_content(&e.subscription, now, time, e.target_time_to_diff, records);
                (e, content)
            })
            .collect();

        if !self.silent {
            info!(
                "Subscriptions Count = {} | Country = {} | Time = {} | Collection = {}",
                cards.len(),
                query.country,
                time,
                query.collection
            );
        }

        match general {
            Some(general) if query.collection == Platform::Video.as_str() => {
                let fragments = cards
                    .into_iter()
                    .map(|(e, content)| Fragment {
                        template: self.template(request, &e.subscription),
                        platform: e.subscription.platform.clone(),
                        content,
                        image_path: None,
                    })
                    .collect();
                let bundle = video_bundle(&general, fragments);
                let content = render_content(&general, now, time, None, Vec::new());
                let item = self.queue_item(request, time, &general, None, content, &settings, Some(bundle));
                self.queue.enqueue(&item).await?;
                report.enqueued += 1;
            }
            _ => {
                for (enriched, content) in cards {
                    if content.do_not_post_if_no_changes && !content.has_changes() {
                        debug!(id = %enriched.subscription.id, "No rate changes, not posting");
                        report.skipped_unchanged += 1;
                        continue;
                    }
                    let subscription = enriched.subscription.clone();
                    let item = self.queue_item(
                        request,
                        time,
                        &subscription,
                        Some(enriched),
                        content,
                        &settings,
                        None,
                    );
                    self.queue.enqueue(&item).await?;
                    report.enqueued += 1;
                }
            }
        }

        self.finish(&query).await?;
        Ok(())
    }

    /// Stored settings with the first subscription's overrides applied
    ///
    /// Ad-hoc content without overrides renders everything and sends nothing.
    async fn render_settings(&self, query: &SlotQuery, first: &Subscription) -> RenderSettings {
        let stored = self.settings.load_or_default().await;
        match &first.manager_render_settings {
            Some(overrides) => stored.with_overrides(overrides),
            None if query.is_content_manager() => RenderSettings {
                templates: stored.templates,
                ..RenderSettings::content_manager()
            },
            None => stored,
        }
    }

    /// Ad-hoc content is single use
    async fn finish(&self, query: &SlotQuery) -> Result<()> {
        if query.is_content_manager() {
            let removed = self.resolver.clear(&query.collection).await?;
            debug!(removed, "Cleared content manager collection");
        }
        Ok(())
    }

    fn template(&self, request: &ProduceRequest, subscription: &Subscription) -> String {
        request
            .template
            .clone()
            .or_else(|| subscription.template.clone())
            .unwrap_or_else(|| subscription.platform.default_template().to_string())
    }

    #[allow(clippy::too_many_arguments)]
    fn queue_item(
        &self,
        request: &ProduceRequest,
        time: &str,
        subscription: &Subscription,
        enriched: Option<Enriched>,
        content: RenderContent,
        settings: &RenderSettings,
        video: Option<VideoBundle>,
    ) -> QueueItem {
        let country = if subscription.country.is_empty() {
            request.country.clone()
        } else {
            subscription.country.clone()
        };
        let (keys, last_values, diff_values, target_time_to_diff) = match enriched {
            Some(e) => (e.keys, e.last_values, e.diff_values, e.target_time_to_diff),
            None => (subscription.keys.clone(), BTreeMap::new(), BTreeMap::new(), None),
        };

        QueueItem {
            id: None,
            subscription_id: SubscriptionRef::Typed(subscription.id.clone()),
            country,
            platform: subscription.platform.clone(),
            time: time.to_string(),
            template: self.template(request, subscription),
            keys,
            last_values,
            diff_values,
            target_time_to_diff,
            render_settings: settings.clone(),
            should_post_youtube: subscription.should_post_youtube.unwrap_or(true),
            should_post_instagram: subscription.should_post_instagram.unwrap_or(true),
            should_post_tiktok: subscription.should_post_tiktok.unwrap_or(true),
            should_post_to_feed: subscription.should_post_to_feed,
            content,
            video,
            image_path: None,
            video_path: None,
            processes: BTreeMap::new(),
        }
    }
}

/// Connectivity failures pass through; anything else fails the slot
fn resolution_failure(query: &SlotQuery, err: StoreError) -> Error {
    if err.is_connectivity() {
        Error::Store(err)
    } else {
        Error::resolution(format!(
            "{} {} at {}: {err}",
            query.country, query.collection, query.time
        ))
    }
}
