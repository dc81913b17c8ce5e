use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// Directory name of the flattened per-category image pool.
pub const IMAGE_POOL_DIR: &str = "imgs";

/// Upper bound on a canonical name in bytes, leaving room for `.zip` and
/// pool file suffixes within common 255-byte file name limits.
pub const MAX_NAME_BYTES: usize = 200;

/// One downloadable beatmap set as seen on a search page.
///
/// Equality and hashing cover the whole `(id, title, artist)` tuple, so two
/// entries sharing an id but carrying different metadata are distinct
/// working-set members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeatmapSetItem {
    pub id: u64,
    pub title: String,
    pub artist: String,
}

pub type WorkingSet = HashSet<BeatmapSetItem>;

impl BeatmapSetItem {
    pub fn new(id: u64, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            artist: artist.into(),
        }
    }

    /// `{id}-{artist}-{title}` with illegal characters replaced, whitespace kept.
    pub fn display_name(&self) -> String {
        sanitize_name(&format!("{}-{}-{}", self.id, self.artist, self.title))
    }

    /// Name used for the item's archive, directory and remote keys.
    ///
    /// Truncated on a char boundary to [`MAX_NAME_BYTES`].
    pub fn canonical_name(&self) -> String {
        truncate_utf8(normalize_whitespace(&self.display_name()), MAX_NAME_BYTES)
    }

    pub fn page_url(&self, base_url: &str) -> String {
        format!("{}/beatmapsets/{}", base_url.trim_end_matches('/'), self.id)
    }

    pub fn download_url(&self, base_url: &str, no_video: bool) -> String {
        let url = format!("{}/download", self.page_url(base_url));
        if no_video {
            format!("{url}?noVideo=1")
        } else {
            url
        }
    }
}

impl fmt::Display for BeatmapSetItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Replaces each of `<>:"/\|?*` with `_`.
pub fn sanitize_name(value: &str) -> String {
    value
        .chars()
        .map(|ch| match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            ch => ch,
        })
        .collect()
}

fn truncate_utf8(mut value: String, max_bytes: usize) -> String {
    if value.len() > max_bytes {
        let mut end = max_bytes;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}

/// Replaces every whitespace character with `_`.
pub fn normalize_whitespace(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch.is_whitespace() { '_' } else { ch })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Operator-chosen label partitioning local storage and remote keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Category(String);

impl Category {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Category {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed != "."
            && trimmed != ".."
            && trimmed != IMAGE_POOL_DIR
            && sanitize_name(trimmed) == trimmed;
        if !is_valid {
            return Err(HarvestError::InvalidCategory(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for Category {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.0
    }
}
