use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use tracing::{error, info, warn};
use url::Url;

use super::StoreError;
use super::atomic::{read_json_or_default, write_json_atomic};
use crate::detect::{ChangeDetector, Detection};
use crate::http::PageSource;
use crate::model::{Subscription, SubscriptionsFile, timestamp};
use crate::page::EpisodePageParser;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionOutcome {
    pub has_update: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_episodes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed_episodes: Option<usize>,
}

impl From<Detection> for SubscriptionOutcome {
    fn from(detection: Detection) -> Self {
        Self {
            has_update: detection.has_update,
            new_episodes: detection.new_episode_delta,
            removed_episodes: detection.removed_episodes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub has_updates: bool,
    pub updated_subscriptions: BTreeMap<String, SubscriptionOutcome>,
    /// Set when the refreshed state could not be persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RefreshSummary {
    fn record(&mut self, title: &str, outcome: SubscriptionOutcome) {
        self.has_updates |= outcome.has_update;
        self.updated_subscriptions.insert(title.to_string(), outcome);
    }

    /// `(title, new episode count)` for every subscription that gained episodes.
    pub fn new_episodes(&self) -> impl Iterator<Item = (&str, usize)> {
        self.updated_subscriptions
            .iter()
            .filter(|(_, outcome)| outcome.has_update)
            .map(|(title, outcome)| (title.as_str(), outcome.new_episodes.unwrap_or(0)))
    }
}

/// Owns `subscriptions.json`. Readers get immutable snapshots; every mutation works on
/// a copy that replaces the snapshot only after it has been persisted.
pub struct SubscriptionStore {
    path: PathBuf,
    cooldown: TimeDelta,
    snapshot: RwLock<Arc<SubscriptionsFile>>,
    writer: Mutex<()>,
}

impl SubscriptionStore {
    pub fn open(path: impl Into<PathBuf>, cooldown: TimeDelta) -> Self {
        let path = path.into();
        let state = Self::load(&path);
        info!(
            path = %path.display(),
            subscriptions = state.subscriptions.len(),
            "loaded subscriptions"
        );
        Self {
            path,
            cooldown,
            snapshot: RwLock::new(Arc::new(state)),
            writer: Mutex::new(()),
        }
    }

    pub fn load(path: &Path) -> SubscriptionsFile {
        let mut state: SubscriptionsFile = read_json_or_default(path, "subscriptions");
        for subscription in &mut state.subscriptions {
            subscription.fill_legacy_update_time();
        }
        state
    }

    pub fn snapshot(&self) -> Arc<SubscriptionsFile> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn save(&self, state: SubscriptionsFile) -> Result<(), StoreError> {
        let _writer = self.lock_writer();
        self.persist(state)
    }

    pub fn refresh_all(
        &self,
        source: &dyn PageSource,
        parser: &EpisodePageParser,
        detector: &ChangeDetector,
    ) -> RefreshSummary {
        let never = AtomicBool::new(false);
        self.refresh_pass(timestamp::now_local(), source, parser, detector, &never)
    }

    /// Like [`Self::refresh_all`], stopping before the next subscription once `cancel` is set.
    pub fn refresh_all_cancellable(
        &self,
        source: &dyn PageSource,
        parser: &EpisodePageParser,
        detector: &ChangeDetector,
        cancel: &AtomicBool,
    ) -> RefreshSummary {
        self.refresh_pass(timestamp::now_local(), source, parser, detector, cancel)
    }

    pub(crate) fn refresh_pass(
        &self,
        now: NaiveDateTime,
        source: &dyn PageSource,
        parser: &EpisodePageParser,
        detector: &ChangeDetector,
        cancel: &AtomicBool,
    ) -> RefreshSummary {
        let _writer = self.lock_writer();
        let mut next = SubscriptionsFile::clone(&self.snapshot());
        let mut summary = RefreshSummary::default();
        let mut dirty = false;

        for subscription in &mut next.subscriptions {
            if cancel.load(Ordering::SeqCst) {
                info!("refresh cancelled; remaining subscriptions left as they were");
                break;
            }
            if subscription.in_cooldown(now, self.cooldown) {
                info!(title = %subscription.title, "skipping refresh: checked recently");
                continue;
            }

            info!(url = %subscription.url, "refreshing subscription");
            let outcome = match source.fetch(&subscription.url) {
                Ok(html) => apply_page(subscription, &html, now, parser, detector),
                Err(err) => {
                    warn!(url = %subscription.url, error = %err, "fetch failed; no update");
                    None
                }
            };
            dirty |= outcome.is_some();
            summary.record(&subscription.title, outcome.unwrap_or_default());
        }

        if dirty && let Err(err) = self.persist(next) {
            error!(path = %self.path.display(), error = %err, "failed to save refreshed subscriptions");
            summary.error = Some(err.to_string());
        }
        summary
    }

    /// Refreshes one subscription immediately, ignoring its cool-down.
    pub fn refresh_one(
        &self,
        url: &str,
        source: &dyn PageSource,
        parser: &EpisodePageParser,
        detector: &ChangeDetector,
    ) -> Result<(String, SubscriptionOutcome), StoreError> {
        let url = url.trim();
        let _writer = self.lock_writer();
        let mut next = SubscriptionsFile::clone(&self.snapshot());
        let subscription = find_mut(&mut next, url)?;

        let html = source.fetch(url).map_err(|source| StoreError::Fetch {
            url: url.to_string(),
            source,
        })?;
        let outcome = apply_page(subscription, &html, timestamp::now_local(), parser, detector)
            .ok_or_else(|| StoreError::UnparseablePage(url.to_string()))?;
        let title = subscription.title.clone();

        self.persist(next)?;
        Ok((title, outcome))
    }

    pub fn add(
        &self,
        url: &str,
        source: &dyn PageSource,
        parser: &EpisodePageParser,
    ) -> Result<Subscription, StoreError> {
        let url = validate_subscription_url(url)?;
        let _writer = self.lock_writer();
        let mut next = SubscriptionsFile::clone(&self.snapshot());
        if next.subscriptions.iter().any(|existing| existing.url == url) {
            return Err(StoreError::DuplicateSubscription(url));
        }

        let html = source.fetch(&url).map_err(|source| StoreError::Fetch {
            url: url.clone(),
            source,
        })?;
        let page = parser.parse(&html);
        if page.is_degraded() {
            return Err(StoreError::UnparseablePage(url));
        }

        let subscription = Subscription::from_page(url, page, timestamp::now_local());
        info!(
            title = %subscription.title,
            episodes = subscription.total_episodes,
            "added subscription"
        );
        next.subscriptions.push(subscription.clone());
        self.persist(next)?;
        Ok(subscription)
    }

    pub fn remove(&self, url: &str) -> Result<Subscription, StoreError> {
        let _writer = self.lock_writer();
        let mut next = SubscriptionsFile::clone(&self.snapshot());
        let url = url.trim();
        let index = next
            .subscriptions
            .iter()
            .position(|existing| existing.url == url)
            .ok_or_else(|| StoreError::UnknownSubscription(url.to_string()))?;

        let removed = next.subscriptions.remove(index);
        self.persist(next)?;
        info!(title = %removed.title, "removed subscription");
        Ok(removed)
    }

    pub fn set_skip_durations(
        &self,
        url: &str,
        intro: Option<u32>,
        outro: Option<u32>,
    ) -> Result<Subscription, StoreError> {
        let _writer = self.lock_writer();
        let mut next = SubscriptionsFile::clone(&self.snapshot());
        let subscription = find_mut(&mut next, url)?;
        if let Some(intro) = intro {
            subscription.intro_duration = intro;
        }
        if let Some(outro) = outro {
            subscription.outro_duration = outro;
        }
        let updated = subscription.clone();

        self.persist(next)?;
        Ok(updated)
    }

    fn persist(&self, state: SubscriptionsFile) -> Result<(), StoreError> {
        write_json_atomic(&self.path, &state)?;
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(state);
        Ok(())
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn find_mut<'a>(
    state: &'a mut SubscriptionsFile,
    url: &str,
) -> Result<&'a mut Subscription, StoreError> {
    let url = url.trim();
    state
        .subscriptions
        .iter_mut()
        .find(|existing| existing.url == url)
        .ok_or_else(|| StoreError::UnknownSubscription(url.to_string()))
}

/// Parses `html` and swaps the page into `subscription`. Returns `None`, leaving the
/// subscription untouched, when the page is unusable.
fn apply_page(
    subscription: &mut Subscription,
    html: &str,
    now: NaiveDateTime,
    parser: &EpisodePageParser,
    detector: &ChangeDetector,
) -> Option<SubscriptionOutcome> {
    let page = parser.parse(html);
    if page.is_degraded() {
        warn!(url = %subscription.url, "page could not be parsed; keeping stored episodes");
        return None;
    }

    let old_count = subscription.episodes.len();
    if page.total_episodes == 0 && old_count > 0 {
        warn!(
            url = %subscription.url,
            stored = old_count,
            "page lists no episodes; keeping stored episodes"
        );
        return None;
    }

    let detection = detector.detect(old_count, page.total_episodes);
    if let Some(removed) = detection.removed_episodes {
        warn!(title = %page.title, removed, "episode list shrank");
    }
    if let Some(added) = detection.new_episode_delta {
        info!(title = %page.title, added, "new episodes");
    }

    subscription.apply_page(page, now);
    Some(detection.into())
}

pub(crate) fn validate_subscription_url(raw: &str) -> Result<String, StoreError> {
    let trimmed = raw.trim();
    let invalid = || StoreError::InvalidUrl(trimmed.to_string());
    let parsed = Url::parse(trimmed).map_err(|_| invalid())?;
    let dotted_host = parsed.host_str().is_some_and(|host| host.contains('.'));
    if !matches!(parsed.scheme(), "http" | "https") || !dotted_host {
        return Err(invalid());
    }
    Ok(trimmed.to_string())
}
