use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::MediaKind;
use crate::error::HarvestError;

pub const DEFAULT_CONFIG_FILE: &str = "osu-harvest.json";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub download_root: PathBuf,
    pub site: SiteConfig,
    pub filter: FilterConfig,
    pub run: RunConfig,
    pub upload: Option<UploadConfig>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            download_root: PathBuf::from("download"),
            site: SiteConfig::default(),
            filter: FilterConfig::default(),
            run: RunConfig::default(),
            upload: None,
        }
    }
}

/// How the next search cursor is derived from a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorMode {
    /// Thread the page's `cursor_string` back verbatim.
    Server,
    /// Base64 of `{"favourite_count":..,"id":..}` taken from the page's last entry.
    Local,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    pub cursor_mode: CursorMode,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://osu.ppy.sh".to_string(),
            cursor_mode: CursorMode::Server,
            user_agent: format!("osu-harvest/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    pub image_min_bytes: u64,
    pub audio_min_bytes: u64,
    pub image_extensions: Vec<String>,
    pub audio_extensions: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            image_min_bytes: 400 * 1024,
            audio_min_bytes: 1024 * 1024,
            image_extensions: ["jpg", "png", "bmp"].map(String::from).to_vec(),
            audio_extensions: ["wav", "mp3", "flac", "ape", "wv"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl FilterConfig {
    /// Classifies a file name by extension, case-insensitively.
    pub fn classify(&self, name: &str) -> Option<MediaKind> {
        let (_, ext) = name.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        if self.image_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            Some(MediaKind::Image)
        } else if self.audio_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }

    pub fn min_bytes(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Image => self.image_min_bytes,
            MediaKind::Audio => self.audio_min_bytes,
        }
    }

    pub fn retains(&self, kind: MediaKind, size: u64) -> bool {
        size >= self.min_bytes(kind)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    pub pacing_ms: u64,
    pub max_consecutive_failures: u32,
    pub no_video: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            pacing_ms: 2000,
            max_consecutive_failures: 5,
            no_video: false,
        }
    }
}

impl RunConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadScope {
    #[default]
    Images,
    All,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// `http(s)://host` of the object store, or a local directory for `dir` stores.
    pub endpoint: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_root_prefix")]
    pub root_prefix: String,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub scope: UploadScope,
    #[serde(default = "default_convert_images")]
    pub convert_images: bool,
}

fn default_root_prefix() -> String {
    "osu".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_convert_images() -> bool {
    true
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<HarvestConfig, HarvestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(HarvestConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<HarvestConfig, HarvestError> {
        let config: HarvestConfig =
            serde_json::from_str(content).map_err(|err| HarvestError::ConfigParse(err.to_string()))?;
        if config.run.max_consecutive_failures == 0 {
            return Err(HarvestError::ConfigParse(
                "run.max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if let Some(upload) = &config.upload {
            if upload.workers == 0 {
                return Err(HarvestError::ConfigParse(
                    "upload.workers must be at least 1".to_string(),
                ));
            }
        }
        Ok(config)
    }
}
