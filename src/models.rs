// Core data structures for subscriptions, queue items and deliveries

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::storage::{Filter, ObjectId};

// ============================================================================
// Platforms and channels
// ============================================================================

/// Channel collection a subscription belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Platform {
    /// Direct chat messages to a user
    Users,
    /// Posts to a broadcast channel
    Telegram,
    /// Promotional channel posts; never enriched with rates
    TelegramPromo,
    /// Story uploads
    Stories,
    /// Fragment of a short video
    Video,
    /// General video subscription that bundles all video fragments
    VideoAll,
    Other(String),
}

impl Platform {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Users => "subscriptions-users",
            Self::Telegram => "subscriptions-telegram",
            Self::TelegramPromo => "subscriptions-telegram-promo",
            Self::Stories => "subscriptions-stories",
            Self::Video => "subscriptions-video",
            Self::VideoAll => "subscriptions-video-all",
            Self::Other(name) => name,
        }
    }

    /// Template used when neither the CLI nor the subscription names one
    pub fn default_template(&self) -> &'static str {
        match self {
            Self::TelegramPromo => "ask-donate",
            Self::Video | Self::VideoAll => "subscriptions-video",
            Self::Stories => "subscriptions-stories",
            _ => "subscriptions-users",
        }
    }

    /// Delivery channels applicable to items of this platform
    pub fn channels(&self) -> &'static [DeliveryChannel] {
        match self {
            Self::Users | Self::Telegram | Self::TelegramPromo => &[DeliveryChannel::Telegram],
            Self::Stories => &[DeliveryChannel::Stories],
            Self::VideoAll => &[
                DeliveryChannel::Youtube,
                DeliveryChannel::Instagram,
                DeliveryChannel::Tiktok,
            ],
            Self::Video | Self::Other(_) => &[],
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl From<String> for Platform {
    fn from(value: String) -> Self {
        match value.as_str() {
            "subscriptions-users" => Self::Users,
            "subscriptions-telegram" => Self::Telegram,
            "subscriptions-telegram-promo" => Self::TelegramPromo,
            "subscriptions-stories" => Self::Stories,
            "subscriptions-video" => Self::Video,
            "subscriptions-video-all" => Self::VideoAll,
            _ => Self::Other(value),
        }
    }
}

impl From<Platform> for String {
    fn from(platform: Platform) -> Self {
        platform.as_str().to_string()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    /// Photo message to a chat or channel
    Telegram,
    Stories,
    Youtube,
    Instagram,
    Tiktok,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Stories => "stories",
            Self::Youtube => "youtube",
            Self::Instagram => "instagram",
            Self::Tiktok => "tiktok",
        }
    }
}

impl fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

/// `time` may hold one slot or several
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeSlots {
    One(String),
    Many(Vec<String>),
}

impl TimeSlots {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(slot) => vec![slot.clone()],
            Self::Many(slots) => slots.clone(),
        }
    }
}

/// Free text or a list of lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Description {
    Text(String),
    Lines(Vec<String>),
}

impl Description {
    pub fn lines(&self) -> Vec<&str> {
        match self {
            Self::Text(text) => vec![text.as_str()],
            Self::Lines(lines) => lines.iter().map(String::as_str).collect(),
        }
    }
}

/// A persisted subscription, created outside this system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub platform: Platform,
    pub time: Option<TimeSlots>,
    /// Ordered slots used to find the previous firing
    #[serde(default)]
    pub times: Vec<String>,
    /// Seven characters, Monday first; `*` marks an active day
    pub week_availability: Option<String>,
    pub time_to_get_diff: Option<String>,
    pub day_to_get_diff: Option<i64>,
    pub template: Option<String>,
    pub name: Option<String>,
    pub interval: Option<String>,
    pub color: Option<String>,
    /// Chat id for direct messages
    pub user_id: Option<Value>,
    /// Broadcast channel id
    pub chanel: Option<Value>,
    #[serde(default)]
    pub keys: Vec<String>,
    pub tags: Option<String>,
    pub description: Option<Description>,
    #[serde(default)]
    pub do_not_post_if_no_changes: bool,
    #[serde(rename = "MANAGER_RENDER_SETTINGS")]
    pub manager_render_settings: Option<Map<String, Value>>,
    #[serde(rename = "MANAGER_FILE_NAME")]
    pub manager_file_name: Option<String>,
    pub should_post_youtube: Option<bool>,
    pub should_post_instagram: Option<bool>,
    pub should_post_tiktok: Option<bool>,
    #[serde(default)]
    pub should_post_to_feed: bool,
    pub title_text_template: Option<String>,
    #[serde(rename = "titleTags_youtube")]
    pub title_tags_youtube: Option<String>,
    #[serde(rename = "titleTags_instagram")]
    pub title_tags_instagram: Option<String>,
    #[serde(rename = "titleTags_tiktok")]
    pub title_tags_tiktok: Option<String>,
    #[serde(default)]
    pub sorting_by_tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Subscription {
    /// Slots for diff-window computation: `times`, else whatever `time` holds
    pub fn slot_list(&self) -> Vec<String> {
        if !self.times.is_empty() {
            return self.times.clone();
        }
        self.time.as_ref().map(TimeSlots::to_vec).unwrap_or_default()
    }
}

/// Reference from a queue item back to its subscription
///
/// Older producers stored the typed id, newer ones the plain string; both are
/// accepted everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionRef {
    Plain(String),
    Typed(ObjectId),
}

impl SubscriptionRef {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain(id) => id,
            Self::Typed(id) => id.as_str(),
        }
    }

    /// Filter matching either representation of `id` in the `subscriptionId` field
    pub fn filter_for(id: &str) -> Filter {
        let plain = Filter::eq("subscriptionId", id);
        match ObjectId::parse(id) {
            Ok(oid) => Filter::Or(vec![Filter::eq("subscriptionId", oid.to_value()), plain]),
            Err(_) => plain,
        }
    }
}

impl fmt::Display for SubscriptionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Rates
// ============================================================================

/// One recorded rate value merged with its key metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateSnapshot {
    pub key: String,
    pub value: f64,
    /// Milliseconds since epoch
    #[serde(default)]
    pub timestamp: Option<f64>,
    /// Human readable recording time
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bank: Option<String>,
    #[serde(default)]
    pub bank_color: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub currency_base: Option<String>,
    /// buy, sell or avg
    #[serde(default)]
    pub operation: Option<String>,
}

/// One display row handed to the templates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RateRecord {
    pub time: String,
    pub key: String,
    pub bank: Option<String>,
    pub currency: Option<String>,
    pub currency_base: Option<String>,
    pub operation: Option<String>,
    pub last_value: String,
    pub last_value_s: String,
    pub last_value_e: String,
    pub previous_value: String,
    pub previous_value_s: String,
    pub previous_value_e: String,
    pub previous_time: Option<String>,
    pub diff: String,
    pub diff_s: String,
    pub diff_e: String,
    pub diff_style: String,
    pub name: Option<String>,
    pub color: Option<String>,
    pub arrow_class: String,
}

impl RateRecord {
    /// Whether the value moved since the comparison point
    pub fn has_change(&self) -> bool {
        self.diff.parse::<f64>().map_or(true, |diff| diff != 0.0)
    }
}

// ============================================================================
// Render settings
// ============================================================================

fn enabled() -> bool {
    true
}

/// Shared switches for rendering and delivery
///
/// Missing flags count as enabled; `skipFilterByDay` defaults to off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(rename = "image_shouldRender", default = "enabled")]
    pub image_should_render: bool,
    #[serde(rename = "image_shouldSend_telegram", default = "enabled")]
    pub image_should_send_telegram: bool,
    #[serde(rename = "image_shouldSend_stories", default = "enabled")]
    pub image_should_send_stories: bool,
    #[serde(rename = "video_shouldRender", default = "enabled")]
    pub video_should_render: bool,
    #[serde(rename = "video_shouldSend_youtube", default = "enabled")]
    pub video_should_send_youtube: bool,
    #[serde(rename = "video_shouldSend_instagram", default = "enabled")]
    pub video_should_send_instagram: bool,
    #[serde(rename = "video_shouldSend_tiktok", default = "enabled")]
    pub video_should_send_tiktok: bool,
    #[serde(rename = "skipFilterByDay", default)]
    pub skip_filter_by_day: bool,
    /// Template name substitutions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub templates: BTreeMap<String, String>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            image_should_render: true,
            image_should_send_telegram: true,
            image_should_send_stories: true,
            video_should_render: true,
            video_should_send_youtube: true,
            video_should_send_instagram: true,
            video_should_send_tiktok: true,
            skip_filter_by_day: false,
            templates: BTreeMap::new(),
        }
    }
}

impl RenderSettings {
    /// Settings for ad-hoc content: render everything, send nothing
    pub fn content_manager() -> Self {
        Self {
            image_should_send_telegram: false,
            image_should_send_stories: false,
            video_should_send_youtube: false,
            video_should_send_instagram: false,
            video_should_send_tiktok: false,
            skip_filter_by_day: true,
            ..Self::default()
        }
    }

    /// Overlay per-subscription overrides; unknown or mistyped keys are ignored
    pub fn with_overrides(&self, overrides: &Map<String, Value>) -> Self {
        let Ok(Value::Object(mut merged)) = serde_json::to_value(self) else {
            return self.clone();
        };
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(merged)).unwrap_or_else(|_| self.clone())
    }

    /// Whether the settings permit sending to `channel`
    pub fn allows(&self, channel: DeliveryChannel) -> bool {
        match channel {
            DeliveryChannel::Telegram => self.image_should_send_telegram,
            DeliveryChannel::Stories => self.image_should_send_stories,
            DeliveryChannel::Youtube => self.video_should_send_youtube,
            DeliveryChannel::Instagram => self.video_should_send_instagram,
            DeliveryChannel::Tiktok => self.video_should_send_tiktok,
        }
    }

    /// Resolve a template name through the substitution table
    pub fn template<'a>(&'a self, name: &'a str) -> &'a str {
        self.templates.get(name).map_or(name, String::as_str)
    }
}

// ============================================================================
// Queue items
// ============================================================================

/// Display fields of one rendered card
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderContent {
    /// Source subscription id
    pub id: String,
    pub name: String,
    pub color: String,
    /// `dd.mm.yyyy`
    pub date: String,
    /// `dd.mm.yyyy, HH:MM:SS`
    pub date_time: String,
    pub previous_date_time: Option<String>,
    pub file_name: String,
    pub chat_id: Option<Value>,
    pub chanel: Option<Value>,
    /// `#Name_Without_Separators`
    pub tag: String,
    pub tags: Option<String>,
    pub description: Option<Description>,
    /// Skip enqueueing when no record changed
    pub do_not_post_if_no_changes: bool,
    pub records: Vec<RateRecord>,
}

impl RenderContent {
    /// Whether any record changed; no records means nothing changed
    pub fn has_changes(&self) -> bool {
        self.records.iter().any(RateRecord::has_change)
    }
}

/// One image inside a video bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub template: String,
    pub platform: Platform,
    #[serde(flatten)]
    pub content: RenderContent,
    /// Filled once rendered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

/// Video made of several fragments plus a title card
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoBundle {
    pub fragments: Vec<Fragment>,
    #[serde(rename = "videoTitle_youtube")]
    pub title_youtube: String,
    #[serde(rename = "videoTitle_instagram")]
    pub title_instagram: String,
    #[serde(rename = "videoTitle_tiktok")]
    pub title_tiktok: String,
    #[serde(rename = "videoDescription")]
    pub description: String,
}

/// A materialized job in the processing queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub subscription_id: SubscriptionRef,
    pub country: String,
    pub platform: Platform,
    /// Slot this item was produced for
    pub time: String,
    pub template: String,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub last_values: BTreeMap<String, RateSnapshot>,
    #[serde(default)]
    pub diff_values: BTreeMap<String, RateSnapshot>,
    /// Comparison point in epoch milliseconds
    pub target_time_to_diff: Option<i64>,
    /// Settings in force when the item was produced
    #[serde(default)]
    pub render_settings: RenderSettings,
    #[serde(default = "enabled")]
    pub should_post_youtube: bool,
    #[serde(default = "enabled")]
    pub should_post_instagram: bool,
    #[serde(default = "enabled")]
    pub should_post_tiktok: bool,
    #[serde(default)]
    pub should_post_to_feed: bool,
    #[serde(flatten)]
    pub content: RenderContent,
    /// Present on bundled video items only
    #[serde(flatten)]
    pub video: Option<VideoBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,
    /// Per-channel outcomes collected by the fan-out
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub processes: BTreeMap<String, DeliveryResult>,
}

impl QueueItem {
    /// The item's own opt-in for `channel`; chat and stories have no per-item flag
    pub fn wants(&self, channel: DeliveryChannel) -> bool {
        match channel {
            DeliveryChannel::Youtube => self.should_post_youtube,
            DeliveryChannel::Instagram => self.should_post_instagram,
            DeliveryChannel::Tiktok => self.should_post_tiktok,
            DeliveryChannel::Telegram | DeliveryChannel::Stories => true,
        }
    }
}

// ============================================================================
// Delivery results
// ============================================================================

/// Outcome of one channel send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl DeliveryResult {
    pub fn completed() -> Self {
        Self {
            completed: true,
            errors: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            completed: false,
            errors: vec![message.into()],
        }
    }
}

impl fmt::Display for DeliveryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.completed {
            write!(f, "[COMPLETED]")
        } else {
            write!(f, "[FAILED] {}", self.errors.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Document;
    use serde_json::json;

    #[test]
    fn test_platform_round_trip_keeps_unknown_names() {
        let known: Platform = serde_json::from_value(json!("subscriptions-video-all")).unwrap();
        assert_eq!(known, Platform::VideoAll);

        let unknown: Platform = serde_json::from_value(json!("subscriptions-fax")).unwrap();
        assert_eq!(serde_json::to_value(&unknown).unwrap(), json!("subscriptions-fax"));
    }

    #[test]
    fn test_platform_channels_and_templates() {
        assert_eq!(Platform::Users.channels(), &[DeliveryChannel::Telegram]);
        assert_eq!(Platform::VideoAll.channels().len(), 3);
        assert!(Platform::Video.channels().is_empty());
        assert_eq!(Platform::TelegramPromo.default_template(), "ask-donate");
        assert_eq!(Platform::Telegram.default_template(), "subscriptions-users");
    }

    #[test]
    fn test_subscription_from_document() {
        let subscription: Subscription = serde_json::from_value(json!({
            "_id": {"$oid": "65f0c0ffee65f0c0ffee65f0"},
            "country": "pl",
            "platform": "subscriptions-users",
            "time": ["08:00", "12:00"],
            "weekAvailability": "*****--",
            "keys": ["usd_buy"],
            "MANAGER_RENDER_SETTINGS": {"image_shouldSend_telegram": false},
            "userId": 12345,
            "customField": "kept"
        }))
        .unwrap();

        assert_eq!(subscription.platform, Platform::Users);
        assert_eq!(subscription.slot_list(), vec!["08:00", "12:00"]);
        assert_eq!(subscription.week_availability.as_deref(), Some("*****--"));
        assert_eq!(subscription.extra["customField"], "kept");
        assert!(subscription.manager_render_settings.is_some());
    }

    #[test]
    fn test_subscription_ref_forms() {
        let plain: SubscriptionRef = serde_json::from_value(json!("65f0c0ffee65f0c0ffee65f0")).unwrap();
        assert!(matches!(plain, SubscriptionRef::Plain(_)));

        let typed: SubscriptionRef =
            serde_json::from_value(json!({"$oid": "65f0c0ffee65f0c0ffee65f0"})).unwrap();
        assert!(matches!(typed, SubscriptionRef::Typed(_)));
        assert_eq!(typed.as_str(), plain.as_str());
    }

    #[test]
    fn test_subscription_ref_filter_matches_both_forms() {
        let id = ObjectId::new();
        let filter = SubscriptionRef::filter_for("65f0c0ffee65f0c0ffee65f0");

        let typed: Document = serde_json::from_value(
            json!({"subscriptionId": {"$oid": "65f0c0ffee65f0c0ffee65f0"}}),
        )
        .unwrap();
        let plain: Document =
            serde_json::from_value(json!({"subscriptionId": "65f0c0ffee65f0c0ffee65f0"})).unwrap();
        let other: Document = serde_json::from_value(json!({"subscriptionId": "other"})).unwrap();

        assert!(filter.matches(&id, &typed));
        assert!(filter.matches(&id, &plain));
        assert!(!filter.matches(&id, &other));

        // Non-hex ids can only have been stored as plain strings
        assert_eq!(
            SubscriptionRef::filter_for("legacy-7"),
            Filter::eq("subscriptionId", "legacy-7")
        );
    }

    #[test]
    fn test_render_settings_defaults_and_overrides() {
        let settings: RenderSettings = serde_json::from_value(json!({
            "video_shouldSend_instagram": false
        }))
        .unwrap();
        assert!(settings.video_should_send_youtube);
        assert!(!settings.video_should_send_instagram);
        assert!(!settings.skip_filter_by_day);

        let overrides = serde_json::from_value(json!({
            "video_shouldSend_instagram": true,
            "skipFilterByDay": true,
            "unknownFlag": 1
        }))
        .unwrap();
        let merged = settings.with_overrides(&overrides);
        assert!(merged.video_should_send_instagram);
        assert!(merged.skip_filter_by_day);
    }

    #[test]
    fn test_mistyped_override_is_ignored() {
        let overrides = serde_json::from_value(json!({"image_shouldRender": "yes"})).unwrap();
        let merged = RenderSettings::default().with_overrides(&overrides);
        assert_eq!(merged, RenderSettings::default());
    }

    #[test]
    fn test_content_manager_settings() {
        let settings = RenderSettings::content_manager();
        assert!(settings.image_should_render && settings.video_should_render);
        assert!(!settings.allows(DeliveryChannel::Telegram));
        assert!(!settings.allows(DeliveryChannel::Youtube));
        assert!(settings.skip_filter_by_day);
    }

    #[test]
    fn test_template_substitution() {
        let mut settings = RenderSettings::default();
        settings
            .templates
            .insert("subscriptions-users".to_string(), "subscriptions-users-v2".to_string());
        assert_eq!(settings.template("subscriptions-users"), "subscriptions-users-v2");
        assert_eq!(settings.template("ask-donate"), "ask-donate");
    }

    #[test]
    fn test_record_change_detection() {
        let mut content = RenderContent::default();
        assert!(!content.has_changes());

        let record = RateRecord {
            time: "12:00".to_string(),
            key: "usd".to_string(),
            bank: None,
            currency: None,
            currency_base: None,
            operation: None,
            last_value: "4.0000".to_string(),
            last_value_s: "4.00".to_string(),
            last_value_e: "00".to_string(),
            previous_value: "4.0000".to_string(),
            previous_value_s: "4.00".to_string(),
            previous_value_e: "00".to_string(),
            previous_time: None,
            diff: "+0.0000".to_string(),
            diff_s: "+0.0000".to_string(),
            diff_e: String::new(),
            diff_style: "diff-up".to_string(),
            name: None,
            color: None,
            arrow_class: "arrow-center".to_string(),
        };
        content.records.push(record.clone());
        assert!(!content.has_changes());

        content.records.push(RateRecord {
            diff: "-0.0100".to_string(),
            ..record
        });
        assert!(content.has_changes());
    }

    #[test]
    fn test_delivery_result_display() {
        assert_eq!(DeliveryResult::completed().to_string(), "[COMPLETED]");
        assert_eq!(DeliveryResult::failed("timeout").to_string(), "[FAILED] timeout");

        let json = serde_json::to_value(DeliveryResult::completed()).unwrap();
        assert_eq!(json, json!({"completed": true}));
    }
}
