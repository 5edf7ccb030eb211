mod atomic;
mod history;
mod settings;
mod subscriptions;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::http::FetchError;

pub use history::{
    HISTORY_DISPLAY_LIMIT, HistoryRecord, HistoryStore, PlayEvent, PlaybackTick,
    ProgressThrottle, ResumePoint, recent_unique, resolve_series_key,
};
pub use settings::SettingsStore;
pub use subscriptions::{RefreshSummary, SubscriptionOutcome, SubscriptionStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode state: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid subscription url: {0}")]
    InvalidUrl(String),

    #[error("already subscribed to {0}")]
    DuplicateSubscription(String),

    #[error("no subscription with url {0}")]
    UnknownSubscription(String),

    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("page at {0} could not be parsed")]
    UnparseablePage(String),
}
