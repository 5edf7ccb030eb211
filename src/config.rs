use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use chrono::TimeDelta;
use tracing::warn;

use crate::http::FetchPolicy;
use crate::paths::{self, HISTORY_FILE, SETTINGS_FILE, SUBSCRIPTIONS_FILE};

const DATA_DIR_VAR: &str = "SUBTRACK_DATA_DIR";
const FETCH_TIMEOUT_VAR: &str = "SUBTRACK_FETCH_TIMEOUT_SECS";
const FETCH_ATTEMPTS_VAR: &str = "SUBTRACK_FETCH_ATTEMPTS";
const RETRY_DELAY_VAR: &str = "SUBTRACK_RETRY_DELAY_SECS";
const COOLDOWN_VAR: &str = "SUBTRACK_COOLDOWN_MINUTES";
const REFRESH_INTERVAL_VAR: &str = "SUBTRACK_REFRESH_INTERVAL_MINUTES";
const STARTUP_DELAY_VAR: &str = "SUBTRACK_STARTUP_DELAY_MS";

const DEFAULT_COOLDOWN_MINUTES: i64 = 60;
const DEFAULT_REFRESH_INTERVAL_MINUTES: u64 = 60;
const DEFAULT_STARTUP_DELAY_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub fetch: FetchPolicy,
    pub cooldown: TimeDelta,
    pub refresh_interval: Duration,
    pub startup_delay: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let data_dir = match env::var_os(DATA_DIR_VAR).filter(|value| !value.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => paths::default_data_dir()?,
        };
        Ok(Self::from_lookup(data_dir, |key| env::var_os(key)))
    }

    /// Builds a config around `data_dir`, taking tunables from `lookup` and keeping the
    /// default for anything missing or unparsable.
    pub fn from_lookup<F>(data_dir: PathBuf, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let defaults = FetchPolicy::default();
        let timeout_secs = parse_var(&lookup, FETCH_TIMEOUT_VAR, defaults.timeout.as_secs(), |v| v > 0);
        let attempts = parse_var(&lookup, FETCH_ATTEMPTS_VAR, defaults.attempts, |v| v > 0);
        let retry_secs = parse_var(&lookup, RETRY_DELAY_VAR, defaults.retry_delay.as_secs(), |_| true);
        let cooldown_minutes = parse_var(&lookup, COOLDOWN_VAR, DEFAULT_COOLDOWN_MINUTES, |v| {
            v >= 0 && TimeDelta::try_minutes(v).is_some()
        });
        let interval_minutes = parse_var(
            &lookup,
            REFRESH_INTERVAL_VAR,
            DEFAULT_REFRESH_INTERVAL_MINUTES,
            |v| v > 0,
        );
        let startup_ms = parse_var(&lookup, STARTUP_DELAY_VAR, DEFAULT_STARTUP_DELAY_MS, |_| true);

        Self {
            data_dir,
            fetch: FetchPolicy {
                timeout: Duration::from_secs(timeout_secs),
                attempts,
                retry_delay: Duration::from_secs(retry_secs),
            },
            cooldown: TimeDelta::try_minutes(cooldown_minutes).unwrap_or(TimeDelta::zero()),
            refresh_interval: Duration::from_secs(interval_minutes.saturating_mul(60)),
            startup_delay: Duration::from_millis(startup_ms),
        }
    }

    pub fn subscriptions_path(&self) -> PathBuf {
        self.data_dir.join(SUBSCRIPTIONS_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }
}

fn parse_var<F, T, V>(lookup: &F, key: &str, default: T, valid: V) -> T
where
    F: Fn(&str) -> Option<OsString>,
    T: FromStr + Copy,
    V: Fn(T) -> bool,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    let raw = raw.to_string_lossy();
    match raw.trim().parse::<T>() {
        Ok(value) if valid(value) => value,
        _ => {
            warn!(variable = key, value = %raw, "ignoring invalid setting; using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Config {
        let vars = vars
            .iter()
            .map(|(key, value)| (key.to_string(), OsString::from(value)))
            .collect::<HashMap<_, _>>();
        Config::from_lookup(PathBuf::from("/data/subtrack"), |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_refresh_policy() {
        let config = config_with(&[]);
        assert_eq!(config.fetch, FetchPolicy::default());
        assert_eq!(config.cooldown, TimeDelta::hours(1));
        assert_eq!(config.refresh_interval, Duration::from_secs(3_600));
        assert_eq!(config.startup_delay, Duration::from_secs(1));
    }

    #[test]
    fn environment_overrides_tunables() {
        let config = config_with(&[
            (FETCH_TIMEOUT_VAR, "5"),
            (FETCH_ATTEMPTS_VAR, " 4 "),
            (RETRY_DELAY_VAR, "0"),
            (COOLDOWN_VAR, "15"),
            (REFRESH_INTERVAL_VAR, "30"),
            (STARTUP_DELAY_VAR, "0"),
        ]);

        assert_eq!(config.fetch.timeout, Duration::from_secs(5));
        assert_eq!(config.fetch.attempts, 4);
        assert_eq!(config.fetch.retry_delay, Duration::ZERO);
        assert_eq!(config.cooldown, TimeDelta::minutes(15));
        assert_eq!(config.refresh_interval, Duration::from_secs(1_800));
        assert_eq!(config.startup_delay, Duration::ZERO);
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let config = config_with(&[
            (FETCH_TIMEOUT_VAR, "0"),
            (FETCH_ATTEMPTS_VAR, "three"),
            (COOLDOWN_VAR, "-5"),
            (REFRESH_INTERVAL_VAR, ""),
        ]);

        assert_eq!(config.fetch, FetchPolicy::default());
        assert_eq!(config.cooldown, TimeDelta::hours(1));
        assert_eq!(config.refresh_interval, Duration::from_secs(3_600));
    }

    #[test]
    fn state_files_live_in_the_data_dir() {
        let config = config_with(&[]);
        assert_eq!(
            config.subscriptions_path(),
            PathBuf::from("/data/subtrack/subscriptions.json")
        );
        assert_eq!(config.history_path(), PathBuf::from("/data/subtrack/play_history.json"));
        assert_eq!(config.settings_path(), PathBuf::from("/data/subtrack/settings.json"));
    }
}
