use std::path::PathBuf;

use anyhow::{Context, Result};

pub const SUBSCRIPTIONS_FILE: &str = "subscriptions.json";
pub const HISTORY_FILE: &str = "play_history.json";
pub const SETTINGS_FILE: &str = "settings.json";

pub fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("unable to resolve data directory")?;
    Ok(base.join("subtrack"))
}
