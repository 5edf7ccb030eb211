use chrono::NaiveDateTime;

use crate::model::{Subscription, timestamp};
use crate::store::{PlayEvent, RefreshSummary, ResumePoint};

pub(crate) const NO_NEW_EPISODES: &str = "No new episodes.";

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

pub(crate) fn format_last_check(last_check: Option<NaiveDateTime>) -> String {
    last_check
        .map(|checked| timestamp::format(&checked))
        .unwrap_or_else(|| "never".to_string())
}

/// `m:ss`, or `h:mm:ss` past the hour.
pub(crate) fn format_position(ms: u64) -> String {
    let total_secs = ms / 1_000;
    let (hours, minutes, seconds) = (total_secs / 3_600, total_secs / 60 % 60, total_secs % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

pub(crate) fn subscription_row(subscription: &Subscription) -> String {
    format!(
        "{:<32} {:>5} {:<12} {:<20} {}",
        truncate(&subscription.title, 32),
        subscription.total_episodes,
        truncate(&subscription.update_time, 12),
        format_last_check(subscription.last_check),
        subscription.url
    )
}

pub(crate) fn subscription_header() -> String {
    format!(
        "{:<32} {:>5} {:<12} {:<20} {}",
        "TITLE", "EPS", "UPDATED", "LAST CHECK", "URL"
    )
}

pub(crate) fn play_event_row(event: &PlayEvent) -> String {
    let position = if event.total_time > 0 {
        format!(
            "{} / {}",
            format_position(event.current_time),
            format_position(event.total_time)
        )
    } else {
        format_position(event.current_time)
    };
    format!(
        "  {:<20} {:<20} {}",
        truncate(&event.episode_title, 20),
        event.last_played_time,
        position
    )
}

pub(crate) fn resume_line(series: &str, point: &ResumePoint) -> String {
    format!(
        "{series}: resume episode {} at {}",
        point.episode_number,
        format_position(point.current_time_ms)
    )
}

/// Notification lines for a finished refresh pass.
pub(crate) fn summary_lines(summary: &RefreshSummary) -> Vec<String> {
    let mut lines = summary
        .new_episodes()
        .map(|(title, count)| format!("New: {title} (+{count} episode(s))"))
        .collect::<Vec<_>>();

    lines.extend(
        summary
            .updated_subscriptions
            .iter()
            .filter_map(|(title, outcome)| Some((title, outcome.removed_episodes?)))
            .map(|(title, removed)| format!("Warning: {title} lists {removed} fewer episode(s) than before")),
    );

    if lines.is_empty() {
        lines.push(NO_NEW_EPISODES.to_string());
    }
    if let Some(error) = &summary.error {
        lines.push(format!("Warning: refresh results were not saved: {error}"));
    }
    lines
}
