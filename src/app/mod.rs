mod format;
mod scheduler;
mod worker;


use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Local;
use tracing::warn;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::http::{HttpFetcher, PageSource};
use crate::model::Subscription;
use crate::store::{
    HISTORY_DISPLAY_LIMIT, HistoryStore, PlaybackTick, ProgressThrottle, SettingsStore,
    SubscriptionStore, recent_unique, resolve_series_key,
};

use self::format::{
    format_last_check, format_position, play_event_row, resume_line, subscription_header,
    subscription_row, truncate,
};
use self::scheduler::{report_completion, run_watch};
use self::worker::{RefreshCompletion, RefreshEngine, RefreshTrigger};

pub fn run(cli: Cli, config: Config) -> Result<()> {
    let store = Arc::new(SubscriptionStore::open(
        config.subscriptions_path(),
        config.cooldown,
    ));
    let history = HistoryStore::new(config.history_path());
    let settings = SettingsStore::new(config.settings_path());
    let source: Arc<dyn PageSource> = Arc::new(HttpFetcher::new(config.fetch));
    let engine = Arc::new(RefreshEngine::new(Arc::clone(&store), source));

    match cli.command {
        Some(Command::Add { url }) => run_add(&engine, &url)?,
        Some(Command::Remove { url }) => run_remove(&store, &url)?,
        Some(Command::Refresh { url }) => run_refresh(&engine, &settings, url.as_deref())?,
        Some(Command::Skip { url, intro, outro }) => run_skip(&store, &url, intro, outro)?,
        Some(Command::History { series }) => run_history(&history, series.as_deref()),
        Some(Command::Resume { series }) => run_resume(&history, &series),
        Some(Command::Progress {
            series,
            episode,
            episode_title,
            episode_url,
            position_ms,
            duration_ms,
        }) => {
            let tick = build_tick(
                &store,
                &series,
                TickInput {
                    episode,
                    episode_title,
                    episode_url,
                    position_ms,
                    duration_ms,
                },
            )?;
            history
                .record_progress(&tick)
                .context("failed to record playback progress")?;
            println!(
                "Recorded {} episode {} at {}",
                tick.series_key,
                tick.episode_number,
                format_position(tick.current_time_ms)
            );
        }
        Some(Command::Track { series }) => run_track(&store, &history, &series)?,
        Some(Command::Watch) => run_watch(engine, &settings, &config)?,
        Some(Command::List) | None => run_list(&store, &settings),
    }

    Ok(())
}

fn run_add(engine: &RefreshEngine, url: &str) -> Result<()> {
    let subscription = engine
        .add(url)
        .with_context(|| format!("failed to subscribe to {}", url.trim()))?;
    println!(
        "Subscribed: {} ({} episode(s), updated {})",
        subscription.title, subscription.total_episodes, subscription.update_time
    );
    Ok(())
}

fn run_remove(store: &SubscriptionStore, url: &str) -> Result<()> {
    let removed = store.remove(url).context("failed to remove subscription")?;
    println!("Removed: {}", removed.title);
    Ok(())
}

fn run_refresh(engine: &RefreshEngine, settings: &SettingsStore, url: Option<&str>) -> Result<()> {
    if let Some(url) = url {
        let (title, outcome) = engine
            .refresh_one(url)
            .with_context(|| format!("failed to refresh {}", url.trim()))?;
        match (outcome.new_episodes, outcome.removed_episodes) {
            (Some(added), _) => println!("New: {title} (+{added} episode(s))"),
            (None, Some(removed)) => {
                println!("Warning: {title} lists {removed} fewer episode(s) than before")
            }
            (None, None) => println!("{title}: no new episodes."),
        }
        return Ok(());
    }

    if engine.store.snapshot().subscriptions.is_empty() {
        println!("No subscriptions yet. Run `subtrack add <url>` first.");
        return Ok(());
    }
    let summary = engine.refresh_all();
    let completion = RefreshCompletion {
        trigger: RefreshTrigger::Manual,
        summary,
        finished_at: Local::now(),
    };
    report_completion(&completion, settings);
    Ok(())
}

fn run_skip(
    store: &SubscriptionStore,
    url: &str,
    intro: Option<u32>,
    outro: Option<u32>,
) -> Result<()> {
    if intro.is_none() && outro.is_none() {
        bail!("nothing to change; pass --intro and/or --outro");
    }
    let updated = store
        .set_skip_durations(url, intro, outro)
        .context("failed to update skip durations")?;
    println!(
        "{}: skip intro {}s, outro {}s",
        updated.title, updated.intro_duration, updated.outro_duration
    );
    Ok(())
}

fn run_list(store: &SubscriptionStore, settings: &SettingsStore) {
    let snapshot = store.snapshot();
    if snapshot.subscriptions.is_empty() {
        println!("No subscriptions yet. Run `subtrack add <url>` first.");
        return;
    }

    println!("{}", subscription_header());
    for subscription in &snapshot.subscriptions {
        println!("{}", subscription_row(subscription));
    }
    println!(
        "\nLast refresh pass: {}",
        format_last_check(settings.last_check_time())
    );
}

fn run_history(history: &HistoryStore, series: Option<&str>) {
    let records = history.load();
    let mut shown = 0;
    for (key, record) in records
        .iter()
        .filter(|(key, _)| series.is_none_or(|wanted| wanted.trim() == key.as_str()))
    {
        shown += 1;
        println!(
            "{} (episode {} of {}, last watched {})",
            truncate(key, 40),
            record.episode_number,
            record.total_episodes,
            record.last_update.as_deref().unwrap_or("never")
        );
        for event in recent_unique(record, HISTORY_DISPLAY_LIMIT) {
            println!("{}", play_event_row(&event));
        }
    }

    if shown == 0 {
        match series {
            Some(series) => println!("No playback history for {series}."),
            None => println!("No playback history yet ({}).", history.path().display()),
        }
    }
}

fn run_resume(history: &HistoryStore, series: &str) {
    match history.get_resume_point(series.trim()) {
        Some(point) => println!("{}", resume_line(series.trim(), &point)),
        None => println!("No resume point for {}.", series.trim()),
    }
}

/// Reads `<episode> <position_ms> [duration_ms]` lines from a player on stdin and
/// records the ones the throttle lets through.
fn run_track(store: &SubscriptionStore, history: &HistoryStore, series: &str) -> Result<()> {
    let mut throttle = ProgressThrottle::default();
    let mut recorded = 0_usize;

    for line in io::stdin().lock().lines() {
        let line = line.context("failed to read player output")?;
        let Some(input) = parse_tick_line(&line) else {
            if !line.trim().is_empty() {
                warn!(line = %line, "ignoring unrecognized progress line");
            }
            continue;
        };
        if !throttle.should_record(input.episode, input.position_ms) {
            continue;
        }
        let tick = match build_tick(store, series, input) {
            Ok(tick) => tick,
            Err(err) => {
                warn!(line = %line, error = %err, "ignoring progress line");
                continue;
            }
        };
        history
            .record_progress(&tick)
            .context("failed to record playback progress")?;
        recorded += 1;
    }

    println!("Recorded {recorded} progress update(s) for {}.", series.trim());
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TickInput {
    pub(crate) episode: usize,
    pub(crate) episode_title: Option<String>,
    pub(crate) episode_url: Option<String>,
    pub(crate) position_ms: u64,
    pub(crate) duration_ms: u64,
}

pub(crate) fn parse_tick_line(line: &str) -> Option<TickInput> {
    let mut fields = line.split_whitespace();
    let episode = fields
        .next()?
        .parse::<usize>()
        .ok()
        .filter(|&episode| episode > 0)?;
    let position_ms = fields.next()?.parse().ok()?;
    let duration_ms = match fields.next() {
        Some(raw) => raw.parse().ok()?,
        None => 0,
    };
    if fields.next().is_some() {
        return None;
    }
    Some(TickInput {
        episode,
        episode_title: None,
        episode_url: None,
        position_ms,
        duration_ms,
    })
}

/// Fills in a tick from the matching subscription: title, stream url and episode count
/// come from the stored episode list unless given explicitly.
pub(crate) fn build_tick(
    store: &SubscriptionStore,
    series: &str,
    input: TickInput,
) -> Result<PlaybackTick> {
    if input.episode == 0 {
        bail!("episode numbers start at 1");
    }
    let snapshot = store.snapshot();
    let subscription = snapshot
        .subscriptions
        .iter()
        .find(|sub| sub.title == series.trim() || sub.url == series.trim());
    Ok(tick_for(subscription, series, input))
}

pub(crate) fn tick_for(
    subscription: Option<&Subscription>,
    series: &str,
    input: TickInput,
) -> PlaybackTick {
    let episode = subscription.and_then(|sub| {
        let index = input.episode.checked_sub(1)?;
        sub.episodes.get(index)
    });
    let episode_title = input
        .episode_title
        .or_else(|| episode.map(|ep| ep.title.clone()))
        .unwrap_or_else(|| format!("第{}集", input.episode));
    let episode_url = input
        .episode_url
        .or_else(|| episode.map(|ep| ep.url.clone()))
        .unwrap_or_default();
    let series_title = subscription.map(|sub| sub.title.as_str()).or(Some(series));

    PlaybackTick {
        series_key: resolve_series_key(series_title, &episode_title),
        episode_number: input.episode,
        episode_title,
        episode_url,
        total_episodes: subscription.map_or(0, |sub| sub.total_episodes),
        current_time_ms: input.position_ms,
        total_time_ms: input.duration_ms,
    }
}
