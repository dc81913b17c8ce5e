use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CursorMode;
use crate::domain::{BeatmapSetItem, WorkingSet};
use crate::error::HarvestError;
use crate::session::BeatmapSite;

pub const CURSOR_PARAM: &str = "cursor_string";

/// One page of the search endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchPage {
    pub beatmapsets: Vec<SearchEntry>,
    #[serde(default)]
    pub cursor_string: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchEntry {
    pub id: u64,
    pub title: String,
    pub artist: String,
    /// Required: the local cursor is built from it.
    pub favourite_count: u64,
}

impl SearchPage {
    pub fn from_json(body: &str) -> Result<Self, HarvestError> {
        serde_json::from_str(body).map_err(|err| HarvestError::Schema(err.to_string()))
    }
}

impl From<&SearchEntry> for BeatmapSetItem {
    fn from(entry: &SearchEntry) -> Self {
        BeatmapSetItem::new(entry.id, entry.title.clone(), entry.artist.clone())
    }
}

/// Search filter threaded into every page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    params: Vec<(String, String)>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            params: vec![("sort".to_string(), "favourites_desc".to_string())],
        }
    }
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing an earlier value for the same key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.params.push((key, value)),
        }
        self
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn page_params(&self, cursor: Option<&str>) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .params
            .iter()
            .filter(|(k, _)| k != CURSOR_PARAM)
            .cloned()
            .collect();
        if let Some(cursor) = cursor.filter(|value| !value.is_empty()) {
            params.push((CURSOR_PARAM.to_string(), cursor.to_string()));
        }
        params
    }
}

/// Base64 of `{"favourite_count":..,"id":..}`.
pub fn encode_local_cursor(favourite_count: u64, id: u64) -> String {
    let json = serde_json::json!({ "favourite_count": favourite_count, "id": id });
    STANDARD.encode(json.to_string())
}

fn next_cursor(page: &SearchPage, last: &SearchEntry, mode: CursorMode) -> Option<String> {
    match mode {
        CursorMode::Server => page
            .cursor_string
            .clone()
            .filter(|cursor| !cursor.is_empty()),
        CursorMode::Local => Some(encode_local_cursor(last.favourite_count, last.id)),
    }
}

/// Pages through search results until `target` distinct items are collected.
///
/// Stops early on an empty page, a page that adds nothing new, or a missing
/// server cursor. Collecting nothing at all is an error; a partial set is
/// returned with a warning.
pub fn scrape<S: BeatmapSite + ?Sized>(
    site: &S,
    query: &SearchQuery,
    target: usize,
    mode: CursorMode,
) -> Result<WorkingSet, HarvestError> {
    let mut working_set = WorkingSet::new();
    if target == 0 {
        return Ok(working_set);
    }

    info!(target, "scraping beatmap sets");
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;

    while working_set.len() < target {
        let page = site.search(&query.page_params(cursor.as_deref()))?;
        pages += 1;

        let remaining = target - working_set.len();
        let entries = &page.beatmapsets[..page.beatmapsets.len().min(remaining)];
        let Some(last) = entries.last() else {
            warn!(page = pages, "search returned an empty page");
            break;
        };

        let before = working_set.len();
        working_set.extend(entries.iter().map(BeatmapSetItem::from));
        debug!(
            page = pages,
            received = page.beatmapsets.len(),
            added = working_set.len() - before,
            "search page merged"
        );
        if working_set.len() == before {
            warn!(page = pages, "search page added no new items");
            break;
        }
        if working_set.len() >= target {
            break;
        }

        match next_cursor(&page, last, mode) {
            Some(next) => cursor = Some(next),
            None => {
                debug!(page = pages, "no further cursor");
                break;
            }
        }
    }

    if working_set.is_empty() {
        return Err(HarvestError::ExhaustedResults {
            collected: 0,
            target,
        });
    }
    if working_set.len() < target {
        warn!(
            collected = working_set.len(),
            target, "search results exhausted before target"
        );
    }
    info!(count = working_set.len(), pages, "scraped beatmap sets");
    Ok(working_set)
}
