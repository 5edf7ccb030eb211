use std::path::PathBuf;

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::StoreError;
use super::atomic::{read_json_or_default, write_json_atomic};
use crate::model::timestamp;

/// Persisted shape of `settings.json`. Keys this crate does not know are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub update_settings: UpdateSettings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check_time: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Settings {
        read_json_or_default(&self.path, "settings")
    }

    /// Stores `at` as the time of the last completed refresh pass.
    pub fn record_check(&self, at: DateTime<Local>) -> Result<(), StoreError> {
        let mut settings = self.load();
        settings.update_settings.last_check_time =
            Some(at.to_rfc3339_opts(SecondsFormat::Secs, false));
        write_json_atomic(&self.path, &settings)
    }

    pub fn last_check_time(&self) -> Option<NaiveDateTime> {
        self.load()
            .update_settings
            .last_check_time
            .as_deref()
            .and_then(timestamp::parse)
    }
}
