use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::page::ParsedPage;

pub const DEFAULT_INTRO_SECS: u32 = 90;
pub const DEFAULT_OUTRO_SECS: u32 = 90;

const LEGACY_UPDATE_KEY: &str = "last_update";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub title: String,
    pub url: String,
}

/// One followed show. Keys this crate does not model are kept in `extra` and written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub title: String,
    pub url: String,
    #[serde(
        default,
        with = "timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_check: Option<NaiveDateTime>,
    #[serde(default)]
    pub update_time: String,
    #[serde(default)]
    pub total_episodes: usize,
    #[serde(default)]
    pub episodes: Vec<Episode>,
    #[serde(default = "default_intro")]
    pub intro_duration: u32,
    #[serde(default = "default_outro")]
    pub outro_duration: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Subscription {
    pub fn from_page(url: String, page: ParsedPage, checked_at: NaiveDateTime) -> Self {
        let mut subscription = Self {
            title: String::new(),
            url,
            last_check: None,
            update_time: String::new(),
            total_episodes: 0,
            episodes: Vec::new(),
            intro_duration: DEFAULT_INTRO_SECS,
            outro_duration: DEFAULT_OUTRO_SECS,
            extra: Map::new(),
        };
        subscription.apply_page(page, checked_at);
        subscription
    }

    /// Replaces the page-derived fields wholesale; the episode list is never merged.
    pub fn apply_page(&mut self, page: ParsedPage, checked_at: NaiveDateTime) {
        self.title = page.title;
        self.update_time = page.update_time;
        self.episodes = page.episodes;
        self.total_episodes = self.episodes.len();
        self.last_check = Some(checked_at);
    }

    /// Entries written by the subscription manager carry the page date as `last_update` only.
    pub(crate) fn fill_legacy_update_time(&mut self) {
        if self.update_time.is_empty()
            && let Some(legacy) = self.extra.get(LEGACY_UPDATE_KEY).and_then(Value::as_str)
        {
            self.update_time = legacy.to_string();
        }
    }

    pub fn in_cooldown(&self, now: NaiveDateTime, cooldown: TimeDelta) -> bool {
        match self.last_check {
            Some(checked) => now.signed_duration_since(checked) < cooldown,
            None => false,
        }
    }
}

/// Persisted shape of `subscriptions.json`. Other top-level keys, such as the player's
/// `series_info`, pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionsFile {
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_episode: Option<usize>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_intro() -> u32 {
    DEFAULT_INTRO_SECS
}

fn default_outro() -> u32 {
    DEFAULT_OUTRO_SECS
}

/// `YYYY-MM-DD HH:MM:SS` local timestamps. Unreadable values load as absent.
pub(crate) mod timestamp {
    use chrono::{DateTime, Local, NaiveDateTime, Timelike};
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub(crate) const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub(crate) fn now_local() -> NaiveDateTime {
        let now = Local::now().naive_local();
        now.with_nanosecond(0).unwrap_or(now)
    }

    pub(crate) fn format(value: &NaiveDateTime) -> String {
        value.format(FORMAT).to_string()
    }

    pub(crate) fn parse(raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        NaiveDateTime::parse_from_str(raw, FORMAT)
            .ok()
            .or_else(|| {
                DateTime::parse_from_rfc3339(raw)
                    .ok()
                    .map(|dt| dt.with_timezone(&Local).naive_local())
            })
            .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok())
    }

    pub(crate) fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => serializer.serialize_str(&format(value)),
            None => serializer.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(raw.as_ref().and_then(Value::as_str).and_then(parse))
    }
}
