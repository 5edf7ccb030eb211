use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::StoreError;
use super::atomic::{read_json_or_default, write_json_atomic};
use crate::model::timestamp;

/// Events kept per series; older ones are evicted first.
pub const HISTORY_RETENTION: usize = 100;
/// Events shown per series after read-side de-duplication.
pub const HISTORY_DISPLAY_LIMIT: usize = 10;

pub const UNKNOWN_SERIES: &str = "Unknown Series";

const PROGRESS_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayEvent {
    #[serde(default)]
    pub episode_title: String,
    #[serde(default, deserialize_with = "lenient_usize")]
    pub episode_number: usize,
    #[serde(default)]
    pub last_played_time: String,
    /// Playback offset in milliseconds.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub current_time: u64,
    /// Stream duration in milliseconds.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total_time: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub last_played: String,
    /// Playback offset in milliseconds within `last_played`.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub last_played_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
    #[serde(default, deserialize_with = "lenient_usize")]
    pub total_episodes: usize,
    #[serde(default, deserialize_with = "lenient_usize")]
    pub episode_number: usize,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub play_history: Vec<PlayEvent>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Persisted shape of `play_history.json`, keyed by series.
pub type HistoryFile = BTreeMap<String, HistoryRecord>;

/// One progress report from the player. `episode_number` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackTick {
    pub series_key: String,
    pub episode_number: usize,
    pub episode_title: String,
    pub episode_url: String,
    pub total_episodes: usize,
    pub current_time_ms: u64,
    pub total_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub episode_number: usize,
    pub current_time_ms: u64,
}

pub struct HistoryStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every readable series record. A record that cannot be read is skipped here but
    /// left in the file.
    pub fn load(&self) -> HistoryFile {
        self.load_raw()
            .into_iter()
            .filter_map(|(series, raw)| parse_record(&series, raw).map(|record| (series, record)))
            .collect()
    }

    pub fn record_progress(&self, tick: &PlaybackTick) -> Result<(), StoreError> {
        self.record_progress_at(tick, timestamp::now_local())
    }

    pub(crate) fn record_progress_at(
        &self,
        tick: &PlaybackTick,
        now: NaiveDateTime,
    ) -> Result<(), StoreError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut history = self.load_raw();
        let stamp = timestamp::format(&now);

        let mut record = history
            .remove(&tick.series_key)
            .and_then(|raw| parse_record(&tick.series_key, raw))
            .unwrap_or_default();
        record.play_history.push(PlayEvent {
            episode_title: tick.episode_title.clone(),
            episode_number: tick.episode_number,
            last_played_time: stamp.clone(),
            current_time: tick.current_time_ms,
            total_time: tick.total_time_ms,
        });
        let overflow = record.play_history.len().saturating_sub(HISTORY_RETENTION);
        record.play_history.drain(..overflow);

        record.last_played = tick.episode_title.clone();
        record.last_played_time = tick.current_time_ms;
        record.last_update = Some(stamp);
        record.total_episodes = tick.total_episodes;
        record.episode_number = tick.episode_number;
        record.url = tick.episode_url.clone();

        history.insert(tick.series_key.clone(), serde_json::to_value(&record)?);
        write_json_atomic(&self.path, &history)?;
        debug!(
            series = %tick.series_key,
            episode = tick.episode_number,
            position_ms = tick.current_time_ms,
            "recorded playback progress"
        );
        Ok(())
    }

    /// Where to resume `series_key`; absent until progress has been recorded.
    pub fn get_resume_point(&self, series_key: &str) -> Option<ResumePoint> {
        let raw = self.load_raw().remove(series_key)?;
        let record = parse_record(series_key, raw)?;
        record
            .last_update
            .as_deref()
            .filter(|stamp| !stamp.trim().is_empty())?;
        Some(ResumePoint {
            episode_number: record.episode_number,
            current_time_ms: record.last_played_time,
        })
    }

    fn load_raw(&self) -> BTreeMap<String, Value> {
        read_json_or_default(&self.path, "play history")
    }
}

fn parse_record(series: &str, raw: Value) -> Option<HistoryRecord> {
    match serde_json::from_value(raw) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(series, error = %err, "skipping unreadable play history record");
            None
        }
    }
}

/// Players report positions as floats or strings as often as integers. Fractions are
/// truncated; anything non-numeric or negative reads as zero.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(whole_number).unwrap_or_default())
}

fn lenient_usize<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_u64(deserializer).map(|value| usize::try_from(value).unwrap_or(usize::MAX))
}

fn whole_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| non_negative(number.as_f64()?)),
        Value::String(text) => non_negative(text.trim().parse().ok()?),
        _ => None,
    }
}

fn non_negative(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0).then(|| value as u64)
}

/// Play events of `record` with repeated `(episode_title, episode_number)` pairs collapsed
/// to their latest occurrence, oldest first, limited to the `limit` most recent.
pub fn recent_unique(record: &HistoryRecord, limit: usize) -> Vec<PlayEvent> {
    let mut seen = HashSet::new();
    let mut latest_first = Vec::new();
    for event in record.play_history.iter().rev() {
        if latest_first.len() == limit {
            break;
        }
        if seen.insert((event.episode_title.as_str(), event.episode_number)) {
            latest_first.push(event.clone());
        }
    }

    latest_first.reverse();
    for event in &mut latest_first {
        if !event.episode_title.contains('第') {
            event.episode_title = format!("第{}集", event.episode_number);
        }
    }
    latest_first
}

/// History key for a playback session: the subscription's title when it has one,
/// otherwise the title of the video being played.
pub fn resolve_series_key(series_title: Option<&str>, video_title: &str) -> String {
    [series_title.unwrap_or_default(), video_title]
        .into_iter()
        .map(str::trim)
        .find(|title| !title.is_empty())
        .unwrap_or(UNKNOWN_SERIES)
        .to_string()
}

/// Decides which player position reports are worth persisting: the first one, any
/// episode change, and otherwise positions at least ten seconds from the last recorded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressThrottle {
    last: Option<(usize, u64)>,
}

impl ProgressThrottle {
    pub fn should_record(&mut self, episode_number: usize, current_time_ms: u64) -> bool {
        let record = match self.last {
            None => true,
            Some((episode, _)) if episode != episode_number => true,
            Some((_, recorded_ms)) => current_time_ms.abs_diff(recorded_ms) >= PROGRESS_INTERVAL_MS,
        };
        if record {
            self.last = Some((episode_number, current_time_ms));
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeDelta};
    use std::fs;
    use tempfile::TempDir;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|date| date.and_hms_opt(20, 0, 0))
            .expect("valid timestamp")
    }

    fn tick(episode_number: usize, current_time_ms: u64) -> PlaybackTick {
        PlaybackTick {
            series_key: "繁花".to_string(),
            episode_number,
            episode_title: format!("第{episode_number}集"),
            episode_url: format!("https://cdn.example.com/{episode_number}/index.m3u8"),
            total_episodes: 30,
            current_time_ms,
            total_time_ms: 2_700_000,
        }
    }

    fn event(title: &str, number: usize, at: &str) -> PlayEvent {
        PlayEvent {
            episode_title: title.to_string(),
            episode_number: number,
            last_played_time: at.to_string(),
            current_time: 0,
            total_time: 0,
        }
    }

    #[test]
    fn retains_only_the_most_recent_hundred_events() {
        let dir = TempDir::new().expect("temp dir");
        let store = HistoryStore::new(dir.path().join("play_history.json"));

        for call in 0..101_u64 {
            let at = start() + TimeDelta::seconds(i64::try_from(call).expect("small"));
            store
                .record_progress_at(&tick(1, call * 1_000), at)
                .expect("record");
        }

        let history = store.load();
        let events = &history["繁花"].play_history;
        assert_eq!(events.len(), HISTORY_RETENTION);
        assert_eq!(events[0].current_time, 1_000);
        assert_eq!(events[99].current_time, 100_000);
    }

    #[test]
    fn progress_updates_summary_fields_and_persists() {
        let dir = TempDir::new().expect("temp dir");
        let store = HistoryStore::new(dir.path().join("play_history.json"));

        store.record_progress_at(&tick(1, 5_000), start()).expect("record");
        store
            .record_progress_at(&tick(2, 42_000), start() + TimeDelta::minutes(50))
            .expect("record");

        let reopened = HistoryStore::new(store.path().to_path_buf()).load();
        let record = &reopened["繁花"];
        assert_eq!(record.last_played, "第2集");
        assert_eq!(record.last_played_time, 42_000);
        assert_eq!(record.last_update.as_deref(), Some("2024-03-09 20:50:00"));
        assert_eq!(record.total_episodes, 30);
        assert_eq!(record.episode_number, 2);
        assert_eq!(record.url, "https://cdn.example.com/2/index.m3u8");
        assert_eq!(record.play_history.len(), 2);
        assert_eq!(record.play_history[1].total_time, 2_700_000);
    }

    #[test]
    fn resume_point_follows_latest_progress() {
        let dir = TempDir::new().expect("temp dir");
        let store = HistoryStore::new(dir.path().join("play_history.json"));
        assert_eq!(store.get_resume_point("繁花"), None);

        store.record_progress_at(&tick(3, 61_000), start()).expect("record");

        assert_eq!(
            store.get_resume_point("繁花"),
            Some(ResumePoint {
                episode_number: 3,
                current_time_ms: 61_000,
            })
        );
        assert_eq!(store.get_resume_point("Other"), None);
    }

    #[test]
    fn resume_point_requires_last_update() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("play_history.json");
        fs::write(
            &path,
            r#"{"繁花": {"last_played": "第2集", "last_played_time": 9000, "episode_number": 2}}"#,
        )
        .expect("write");

        assert_eq!(HistoryStore::new(path).get_resume_point("繁花"), None);
    }

    #[test]
    fn corrupt_history_starts_empty_and_is_replaced_on_write() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("play_history.json");
        fs::write(&path, "{\"繁花\": [").expect("write");
        let store = HistoryStore::new(&path);
        assert!(store.load().is_empty());

        store.record_progress_at(&tick(1, 1_000), start()).expect("record");

        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn recording_one_series_keeps_every_other_series() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("play_history.json");
        fs::write(
            &path,
            r#"{
                "Other Show": {
                    "last_played": "第4集",
                    "last_played_time": 61234.5,
                    "last_update": "2024-03-08T21:00:00",
                    "episode_number": 4,
                    "cover": "https://img.example.com/other.jpg",
                    "play_history": [
                        {"episode_title": "第4集", "episode_number": 4, "current_time": "61234", "total_time": 1440000.0}
                    ]
                },
                "Broken Show": {"play_history": "not a list"}
            }"#,
        )
        .expect("seed");
        let store = HistoryStore::new(&path);

        store.record_progress_at(&tick(1, 5_000), start()).expect("record");

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).expect("read"))
            .expect("valid json");
        assert_eq!(raw["Broken Show"]["play_history"], "not a list");
        assert_eq!(raw["Other Show"]["cover"], "https://img.example.com/other.jpg");
        assert_eq!(raw["Other Show"]["last_played_time"], 61234.5);

        let history = store.load();
        assert_eq!(history.keys().collect::<Vec<_>>(), vec!["Other Show", "繁花"]);
        let other = &history["Other Show"];
        assert_eq!(other.play_history[0].current_time, 61_234);
        assert_eq!(other.play_history[0].total_time, 1_440_000);
        assert_eq!(
            store.get_resume_point("Other Show"),
            Some(ResumePoint {
                episode_number: 4,
                current_time_ms: 61_234,
            })
        );
        assert_eq!(store.get_resume_point("Broken Show"), None);
    }

    #[test]
    fn unreadable_positions_load_as_zero() {
        let record: HistoryRecord = serde_json::from_str(
            r#"{"last_played_time": -5, "total_episodes": "12", "episode_number": null,
                "play_history": [{"current_time": true, "total_time": "long"}]}"#,
        )
        .expect("deserialize");

        assert_eq!(record.last_played_time, 0);
        assert_eq!(record.total_episodes, 12);
        assert_eq!(record.episode_number, 0);
        assert_eq!(record.play_history[0].current_time, 0);
        assert_eq!(record.play_history[0].total_time, 0);
    }

    #[test]
    fn duplicate_events_collapse_to_the_later_occurrence() {
        let record = HistoryRecord {
            play_history: vec![
                event("第1集", 1, "2024-03-09 20:00:00"),
                event("第2集", 2, "2024-03-09 20:30:00"),
                event("第1集", 1, "2024-03-09 21:00:00"),
            ],
            ..HistoryRecord::default()
        };

        let unique = recent_unique(&record, HISTORY_DISPLAY_LIMIT);

        assert_eq!(
            unique,
            vec![
                event("第2集", 2, "2024-03-09 20:30:00"),
                event("第1集", 1, "2024-03-09 21:00:00"),
            ]
        );
        assert_eq!(record.play_history.len(), 3, "read-side only");
    }

    #[test]
    fn display_view_keeps_the_most_recent_entries_and_labels_bare_titles() {
        let record = HistoryRecord {
            play_history: (1..=12)
                .map(|n| event(&format!("Episode {n}"), n, "2024-03-09 20:00:00"))
                .collect(),
            ..HistoryRecord::default()
        };

        let unique = recent_unique(&record, HISTORY_DISPLAY_LIMIT);

        assert_eq!(unique.len(), HISTORY_DISPLAY_LIMIT);
        assert_eq!(unique[0].episode_title, "第3集");
        assert_eq!(unique[9].episode_title, "第12集");
    }

    #[test]
    fn series_key_prefers_subscription_title() {
        assert_eq!(resolve_series_key(Some("繁花"), "第01集"), "繁花");
        assert_eq!(resolve_series_key(Some("  "), "第01集"), "第01集");
        assert_eq!(resolve_series_key(None, " 第01集 "), "第01集");
        assert_eq!(resolve_series_key(None, ""), UNKNOWN_SERIES);
    }

    #[test]
    fn throttle_records_every_ten_seconds_and_on_episode_change() {
        let mut throttle = ProgressThrottle::default();
        assert!(throttle.should_record(1, 0));
        assert!(!throttle.should_record(1, 4_000));
        assert!(!throttle.should_record(1, 9_999));
        assert!(throttle.should_record(1, 10_000));
        assert!(throttle.should_record(2, 10_500));
        assert!(!throttle.should_record(2, 12_000));
        assert!(throttle.should_record(2, 500), "seeking back counts as movement");
    }
}
