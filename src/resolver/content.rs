//! Display content for rendered cards
//!
//! Turns enriched subscriptions into [`RenderContent`]: formatted rate rows,
//! names, colors, tags and the titles of bundled videos.

use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::{
    Description, Fragment, RateRecord, RateSnapshot, RenderContent, Subscription, VideoBundle,
};
use crate::utils::{format_date, format_date_time, format_rate};

const DATE_TIME_PLACEHOLDER: &str = "{{DATE_TIME}}";
const TITLE_TAGS_PLACEHOLDER: &str = "{{TITLE_TAGS}}";

/// Title used when a bundle's title cannot be built
pub const FALLBACK_TITLE: &str = "Name";
/// Description used when a bundle's description cannot be built
pub const FALLBACK_DESCRIPTION: &str = "Description";

// ============================================================================
// Names and colors
// ============================================================================

/// Card color for an update interval
pub fn interval_color(interval: Option<&str>) -> &'static str {
    match interval {
        Some("every-1-hours") => "#A459D1",
        Some("every-2-hours") => "#F99B7D",
        Some("every-4-hours") => "#088395",
        Some("every-6-hours") => "#5C469C",
        Some("every-12-hours") => "#19A7CE",
        Some("every-24-hours") => "#E55807",
        _ => "#088395",
    }
}

/// Card title for an update interval
pub fn interval_name(interval: Option<&str>) -> &'static str {
    match interval {
        Some("every-4-hours") => "4 Hour Updates",
        Some("every-24-hours") => "24 Hour Updates",
        _ => "Updates",
    }
}

/// CSS class of the operation arrow
pub fn arrow_class(operation: Option<&str>) -> &'static str {
    match operation.map(str::to_lowercase).as_deref() {
        Some("buy") => "arrow-right",
        Some("sell") => "arrow-left",
        _ => "arrow-center",
    }
}

/// Hashtag derived from a display name
pub fn hashtag(name: &str) -> String {
    let body: String = name
        .chars()
        .filter(|c| *c != '|' && *c != '-')
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();
    format!("#{body}")
}

// ============================================================================
// Rate rows
// ============================================================================

/// `(whole.two_decimals, last_two_decimals)` of a four-decimal value
fn split_value(value: &str) -> (String, String) {
    let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
    let head: String = fraction.chars().take(2).collect();
    let tail: String = fraction.chars().skip(2).take(2).collect();
    (format!("{whole}.{head}"), tail)
}

/// Index where the significant digits of a signed difference start
fn significant_start(diff: &str) -> usize {
    diff.char_indices()
        .find(|(_, c)| !matches!(c, '0' | '.' | '-' | '+'))
        .map_or(diff.len(), |(index, _)| index)
}

/// Build the display row for one key
///
/// The previous value falls back to the latest one when nothing was recorded
/// inside the comparison window, giving a zero difference.
pub fn rate_record(
    time: &str,
    last: &RateSnapshot,
    previous: Option<&RateSnapshot>,
) -> RateRecord {
    let last_value = format_rate(last.value);
    let previous_value = format_rate(previous.map_or(last.value, |p| p.value));

    // Differences are taken between the rounded values shown on the card
    let diff = last_value.parse::<f64>().unwrap_or(last.value)
        - previous_value.parse::<f64>().unwrap_or(last.value);
    let rising = diff >= 0.0;
    let diff = if rising {
        format!("+{}", format_rate(diff))
    } else {
        format_rate(diff)
    };

    let split = significant_start(&diff);
    let end = diff.len().min(7).max(split);

    let (last_value_s, last_value_e) = split_value(&last_value);
    let (previous_value_s, previous_value_e) = split_value(&previous_value);

    RateRecord {
        time: time.to_string(),
        key: last.key.clone(),
        bank: last.bank.clone(),
        currency: last.currency.clone(),
        currency_base: last.currency_base.clone(),
        operation: last.operation.clone(),
        last_value,
        last_value_s,
        last_value_e,
        previous_value,
        previous_value_s,
        previous_value_e,
        previous_time: previous.and_then(|p| p.date.clone()),
        diff_s: diff[..split].to_string(),
        diff_e: diff[split..end].to_string(),
        diff_style: if rising { "diff-up" } else { "diff-down" }.to_string(),
        diff,
        name: last.name.clone(),
        color: last.bank_color.clone(),
        arrow_class: arrow_class(last.operation.as_deref()).to_string(),
    }
}

/// Rows for every key that has a latest value, in key order
pub fn rate_records(
    time: &str,
    keys: &[String],
    last: &BTreeMap<String, RateSnapshot>,
    previous: &BTreeMap<String, RateSnapshot>,
) -> Vec<RateRecord> {
    keys.iter()
        .filter_map(|key| {
            let Some(latest) = last.get(key) else {
                debug!(key, "Skipping key without a latest value");
                return None;
            };
            Some(rate_record(time, latest, previous.get(key)))
        })
        .collect()
}

// ============================================================================
// Card content
// ============================================================================

/// Display name of a subscription
pub fn display_name(subscription: &Subscription) -> String {
    subscription
        .name
        .clone()
        .unwrap_or_else(|| interval_name(subscription.interval.as_deref()).to_string())
}

/// Card content for one subscription firing at `time`
pub fn render_content(
    subscription: &Subscription,
    now: &DateTime<Tz>,
    time: &str,
    target_time_to_diff: Option<i64>,
    records: Vec<RateRecord>,
) -> RenderContent {
    let id = subscription.id.to_string();
    let date = format_date(now);
    let name = display_name(subscription);

    let file_name = subscription
        .manager_file_name
        .clone()
        .unwrap_or_else(|| format!("{date}-{time}-{id}"));

    let previous_date_time = target_time_to_diff
        .and_then(|millis| now.timezone().timestamp_millis_opt(millis).single())
        .map(|at| format_date_time(&at));

    RenderContent {
        tag: hashtag(&name),
        color: subscription
            .color
            .clone()
            .unwrap_or_else(|| interval_color(subscription.interval.as_deref()).to_string()),
        date_time: format_date_time(now),
        date,
        previous_date_time,
        file_name,
        chat_id: subscription.user_id.clone(),
        chanel: subscription.chanel.clone(),
        tags: subscription.tags.clone(),
        description: subscription.description.clone(),
        do_not_post_if_no_changes: subscription.do_not_post_if_no_changes,
        records,
        name,
        id,
    }
}

// ============================================================================
// Video bundles
// ============================================================================

/// Order fragments by the first tag match for each sorting tag, then the rest
pub fn sort_fragments(fragments: Vec<Fragment>, sorting_by_tags: &[String]) -> Vec<Fragment> {
    if sorting_by_tags.is_empty() {
        return fragments;
    }

    let mut remaining: Vec<Option<Fragment>> = fragments.into_iter().map(Some).collect();
    let mut sorted = Vec::with_capacity(remaining.len());

    for tag in sorting_by_tags {
        let position = remaining.iter().position(|slot| {
            slot.as_ref().is_some_and(|fragment| {
                fragment
                    .content
                    .tags
                    .as_deref()
                    .is_some_and(|tags| tags.contains(tag.as_str()))
            })
        });
        if let Some(fragment) = position.and_then(|index| remaining[index].take()) {
            sorted.push(fragment);
        }
    }

    sorted.extend(remaining.into_iter().flatten());
    sorted
}

fn titles(general: &Subscription, fragments: &[Fragment]) -> Option<[String; 3]> {
    let template = general.title_text_template.as_deref()?;
    let first = fragments.first()?;
    let date_time = first.content.date_time.replacen(", ", "-", 1);
    let base = template.replacen(DATE_TIME_PLACEHOLDER, &date_time, 1);

    let with_tags =
        |tags: &Option<String>| base.replacen(TITLE_TAGS_PLACEHOLDER, tags.as_deref().unwrap_or(""), 1);

    Some([
        with_tags(&general.title_tags_youtube),
        with_tags(&general.title_tags_instagram),
        with_tags(&general.title_tags_tiktok),
    ])
}

fn description(general: &Subscription, fragments: &[Fragment]) -> Option<String> {
    let lines = general.description.as_ref().map(Description::lines)?;

    let fragment_tags: Vec<&str> = fragments
        .iter()
        .map(|fragment| fragment.content.tags.as_deref().unwrap_or(""))
        .collect();
    let all_tags = format!(
        "{} {}",
        general.tags.as_deref().unwrap_or(""),
        fragment_tags.join(" ")
    );

    Some(format!("{all_tags}\r\n\r\n{}", lines.join("\r\n")))
}

/// Assemble the video bundle of a general video subscription
pub fn video_bundle(general: &Subscription, fragments: Vec<Fragment>) -> VideoBundle {
    let fragments = sort_fragments(fragments, &general.sorting_by_tags);

    let [title_youtube, title_instagram, title_tiktok] = titles(general, &fragments)
        .unwrap_or_else(|| {
            debug!(id = %general.id, "Using fallback video titles");
            std::array::from_fn(|_| FALLBACK_TITLE.to_string())
        });
    let description =
        description(general, &fragments).unwrap_or_else(|| FALLBACK_DESCRIPTION.to_string());

    VideoBundle {
        fragments,
        title_youtube,
        title_instagram,
        title_tiktok,
        description,
    }
}
