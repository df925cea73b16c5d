//! Subscription resolution and enrichment
//!
//! For one (time, country, collection) slot the resolver finds the matching
//! subscriptions, drops those not active today, and enriches each with the
//! rate values needed to render its card.
//!
//! ```text
//! resolve ──> filter_available ──> split_general_video ──> enrich ──> content
//!  (store)      (week mask)          (video bundles)        (rates)    (cards)
//! ```

pub mod availability;
pub mod content;
pub mod window;

use chrono::{DateTime, Datelike};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::models::{Platform, RateSnapshot, Subscription};
use crate::storage::rates::RateSource;
use crate::storage::repository::SubscriptionRepository;
use crate::storage::{ObjectId, StoreResult, CONTENT_MANAGER_COLLECTION};

pub use availability::is_available;
pub use window::{diff_window, DiffWindow, WindowSource};

/// The slot a producer run resolves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotQuery {
    pub collection: String,
    pub country: String,
    /// `HH:MM`
    pub time: String,
    /// Resolve exactly this subscription instead of matching the slot
    pub subscription_id: Option<ObjectId>,
}

impl SlotQuery {
    pub fn is_content_manager(&self) -> bool {
        self.collection == CONTENT_MANAGER_COLLECTION
    }
}

/// A subscription with the rate values for its firing
#[derive(Debug, Clone)]
pub struct Enriched {
    pub subscription: Subscription,
    /// Keys that have a latest value, in subscription order
    pub keys: Vec<String>,
    pub last_values: BTreeMap<String, RateSnapshot>,
    pub diff_values: BTreeMap<String, RateSnapshot>,
    pub window: Option<DiffWindow>,
    pub target_time_to_diff: Option<i64>,
}

/// Matches subscriptions to slots and enriches them with rates
#[derive(Clone)]
pub struct SubscriptionResolver {
    subscriptions: SubscriptionRepository,
    rates: Arc<dyn RateSource>,
}

impl SubscriptionResolver {
    pub fn new(subscriptions: SubscriptionRepository, rates: Arc<dyn RateSource>) -> Self {
        Self {
            subscriptions,
            rates,
        }
    }

    /// Subscriptions for the slot; an empty list is a valid answer
    ///
    /// Ad-hoc content is matched by country only.
    pub async fn resolve(&self, query: &SlotQuery) -> StoreResult<Vec<Subscription>> {
        if let Some(id) = &query.subscription_id {
            let found = self
                .subscriptions
                .find_by_id(&query.collection, id)
                .await?;
            return Ok(found.into_iter().collect());
        }

        if query.is_content_manager() {
            return self
                .subscriptions
                .find_by_country(&query.collection, &query.country)
                .await;
        }

        self.subscriptions
            .find_for_slot(&query.collection, &query.country, &query.time)
            .await
    }

    /// Remove everything from a collection after an ad-hoc run
    pub async fn clear(&self, collection: &str) -> StoreResult<u64> {
        self.subscriptions.clear(collection).await
    }

    /// Attach latest and window-start rates to each subscription
    ///
    /// Promotional subscriptions carry no rates and pass through untouched.
    pub async fn enrich(
        &self,
        subscriptions: Vec<Subscription>,
        country: &str,
        time: &str,
        now: &DateTime<Tz>,
    ) -> StoreResult<Vec<Enriched>> {
        let needs_rates = subscriptions
            .iter()
            .any(|s| s.platform != Platform::TelegramPromo);
        let latest: BTreeMap<String, RateSnapshot> = if needs_rates {
            self.rates
                .latest(country)
                .await?
                .into_iter()
                .map(|snapshot| (snapshot.key.clone(), snapshot))
                .collect()
        } else {
            BTreeMap::new()
        };

        let mut enriched = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            if subscription.platform == Platform::TelegramPromo {
                enriched.push(Enriched {
                    keys: subscription.keys.clone(),
                    subscription,
                    last_values: BTreeMap::new(),
                    diff_values: BTreeMap::new(),
                    window: None,
                    target_time_to_diff: None,
                });
                continue;
            }

            let window = diff_window(
                time,
                &subscription.slot_list(),
                subscription.time_to_get_diff.as_deref(),
                subscription.day_to_get_diff,
                now,
            );
            let target = window.target_millis(now);

            let keys: Vec<String> = subscription
                .keys
                .iter()
                .filter(|key| latest.contains_key(key.as_str()))
                .cloned()
                .collect();
            let diff_values: BTreeMap<String, RateSnapshot> = self
                .rates
                .at_or_after(country, &keys, target)
                .await?
                .into_iter()
                .map(|snapshot| (snapshot.key.clone(), snapshot))
                .collect();
            let last_values = keys
                .iter()
                .filter_map(|key| latest.get(key).map(|s| (key.clone(), s.clone())))
                .collect();

            debug!(
                id = %subscription.id,
                window_minutes = window.duration.num_minutes(),
                source = ?window.source,
                keys = keys.len(),
                "Enriched subscription"
            );

            enriched.push(Enriched {
                subscription,
                keys,
                last_values,
                diff_values,
                window: Some(window),
                target_time_to_diff: Some(target),
            });
        }
        Ok(enriched)
    }
}

/// Keep subscriptions whose week mask allows the day of `now`
pub fn filter_available(subscriptions: Vec<Subscription>, now: &DateTime<Tz>) -> Vec<Subscription> {
    let weekday = now.weekday();
    subscriptions
        .into_iter()
        .filter(|s| is_available(s.week_availability.as_deref(), weekday))
        .collect()
}

/// Take the general video subscription out of the list, if present
pub fn split_general_video(
    subscriptions: Vec<Subscription>,
) -> (Option<Subscription>, Vec<Subscription>) {
    let mut general = None;
    let mut rest = Vec::with_capacity(subscriptions.len());
    for subscription in subscriptions {
        if subscription.platform == Platform::VideoAll {
            // Only the first one becomes the bundle; duplicates are dropped
            if general.is_none() {
                general = Some(subscription);
            }
        } else {
            rest.push(subscription);
        }
    }
    (general, rest)
}
