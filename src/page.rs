//! Extraction of show metadata and the playlist from a detail page.
//!
//! The selectors target one fixed layout:
//!
//! ```text
//! .content__detail h1.title      show title, optional <small> status
//! .text-light                    "更新时间：2024-03-09"
//! .content__thumb .thumb img     cover image
//! .content__playlist li a        "第01集$https://host/path/index.m3u8"
//! ```

use chrono::Local;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::Episode;

pub const PARSE_FAILED_TITLE: &str = "解析失败";
pub const UNKNOWN_TITLE: &str = "未知剧名";

const TITLE_SELECTOR: &str = ".content__detail h1.title";
const STATUS_SELECTOR: &str = "small";
const UPDATE_TIME_SELECTOR: &str = ".text-light";
const IMAGE_SELECTOR: &str = ".content__thumb .thumb img";
const PLAYLIST_SELECTOR: &str = ".content__playlist li a";

const UPDATE_TIME_PREFIXES: &[&str] = &["更新时间：", "更新时间:", "Updated:"];
const EPISODE_DELIMITER: char = '$';

#[derive(Debug, Error)]
enum PageError {
    #[error("document is empty")]
    EmptyDocument,
    #[error("title heading has no text")]
    UntitledHeading,
    #[error("invalid selector {selector}: {reason}")]
    Selector {
        selector: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPage {
    pub title: String,
    pub update_status: String,
    pub update_time: String,
    pub image_url: String,
    pub episodes: Vec<Episode>,
    pub total_episodes: usize,
    degraded: bool,
}

impl ParsedPage {
    fn degraded(today: String) -> Self {
        Self {
            title: PARSE_FAILED_TITLE.to_string(),
            update_status: String::new(),
            update_time: today,
            image_url: String::new(),
            episodes: Vec::new(),
            total_episodes: 0,
            degraded: true,
        }
    }

    /// True when extraction failed and the fields are placeholders.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EpisodePageParser;

impl EpisodePageParser {
    pub fn parse(&self, html: &str) -> ParsedPage {
        let today = Local::now().format("%Y-%m-%d").to_string();
        match extract_page(html, &today) {
            Ok(page) => {
                debug!(
                    title = %page.title,
                    episodes = page.total_episodes,
                    "parsed episode page"
                );
                page
            }
            Err(err) => {
                warn!(error = %err, "failed to parse episode page");
                ParsedPage::degraded(today)
            }
        }
    }
}

fn extract_page(html: &str, today: &str) -> Result<ParsedPage, PageError> {
    if html.trim().is_empty() {
        return Err(PageError::EmptyDocument);
    }

    let document = Html::parse_document(html);
    let (title, update_status) = extract_heading(&document)?;
    let update_time = extract_update_time(&document)?.unwrap_or_else(|| today.to_string());
    let image_url = extract_image_url(&document)?;
    let episodes = extract_episodes(&document)?;

    Ok(ParsedPage {
        title,
        update_status,
        update_time,
        image_url,
        total_episodes: episodes.len(),
        episodes,
        degraded: false,
    })
}

fn selector(raw: &'static str) -> Result<Selector, PageError> {
    Selector::parse(raw).map_err(|err| PageError::Selector {
        selector: raw,
        reason: err.to_string(),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn extract_heading(document: &Html) -> Result<(String, String), PageError> {
    let Some(heading) = document.select(&selector(TITLE_SELECTOR)?).next() else {
        return Ok((UNKNOWN_TITLE.to_string(), String::new()));
    };

    let title = heading
        .text()
        .map(str::trim)
        .find(|text| !text.is_empty())
        .ok_or(PageError::UntitledHeading)?
        .to_string();
    let update_status = heading
        .select(&selector(STATUS_SELECTOR)?)
        .next()
        .map(element_text)
        .unwrap_or_default();

    Ok((title, update_status))
}

fn extract_update_time(document: &Html) -> Result<Option<String>, PageError> {
    let Some(element) = document.select(&selector(UPDATE_TIME_SELECTOR)?).next() else {
        return Ok(None);
    };
    let text = element_text(element);
    let stripped = UPDATE_TIME_PREFIXES
        .iter()
        .find_map(|prefix| text.strip_prefix(*prefix))
        .unwrap_or(&text)
        .trim();
    Ok((!stripped.is_empty()).then(|| stripped.to_string()))
}

fn extract_image_url(document: &Html) -> Result<String, PageError> {
    Ok(document
        .select(&selector(IMAGE_SELECTOR)?)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(|src| src.trim().to_string())
        .unwrap_or_default())
}

fn extract_episodes(document: &Html) -> Result<Vec<Episode>, PageError> {
    let anchors = selector(PLAYLIST_SELECTOR)?;
    Ok(document
        .select(&anchors)
        .filter_map(|anchor| split_episode_text(&element_text(anchor)))
        .collect())
}

/// `"第01集$https://..."` → episode; anything but exactly two non-empty fields is rejected.
pub(crate) fn split_episode_text(text: &str) -> Option<Episode> {
    let mut parts = text.trim().split(EPISODE_DELIMITER);
    let title = parts.next()?.trim();
    let url = parts.next()?.trim();
    if parts.next().is_some() || title.is_empty() || url.is_empty() {
        return None;
    }
    Some(Episode {
        title: title.to_string(),
        url: url.to_string(),
    })
}
