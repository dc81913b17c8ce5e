use std::fs;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::config::FilterConfig;
use crate::domain::{Category, IMAGE_POOL_DIR, MediaKind};
use crate::error::HarvestError;

/// On-disk layout of downloaded beatmap media:
///
/// ```text
/// <root>/<category>/<name>.zip   transient archive
/// <root>/<category>/<name>/      extracted media
/// <root>/<category>/imgs/        flattened image pool
/// ```
#[derive(Debug, Clone)]
pub struct Library {
    root: Utf8PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ItemManifest {
    pub images: Vec<String>,
    pub songs: Vec<String>,
}

impl Library {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, HarvestError> {
        let root = Utf8PathBuf::from_path_buf(root.into())
            .map_err(|_| HarvestError::Filesystem("invalid library path".to_string()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn category_dir(&self, category: &Category) -> Utf8PathBuf {
        self.root.join(category.as_str())
    }

    pub fn archive_path(&self, category: &Category, name: &str) -> Utf8PathBuf {
        self.category_dir(category).join(format!("{name}.zip"))
    }

    pub fn item_dir(&self, category: &Category, name: &str) -> Utf8PathBuf {
        self.category_dir(category).join(name)
    }

    pub fn pool_dir(&self, category: &Category) -> Utf8PathBuf {
        self.category_dir(category).join(IMAGE_POOL_DIR)
    }

    pub fn pool_path(&self, category: &Category, name: &str, file_name: &str) -> Utf8PathBuf {
        self.pool_dir(category).join(format!("{name}-{file_name}"))
    }

    pub fn ensure_category(&self, category: &Category) -> Result<(), HarvestError> {
        fs::create_dir_all(self.category_dir(category).as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))
    }

    /// True when either the extracted directory or the archive is present.
    pub fn contains(&self, category: &Category, name: &str) -> bool {
        self.item_dir(category, name).as_std_path().is_dir()
            || self.archive_path(category, name).as_std_path().is_file()
    }

    pub fn categories(&self) -> Result<Vec<String>, HarvestError> {
        if !self.root.as_std_path().is_dir() {
            return Ok(Vec::new());
        }
        list_dir_names(self.root.as_std_path())
    }

    pub fn items(&self, category: &Category) -> Result<Vec<String>, HarvestError> {
        let dir = self.category_dir(category);
        if !dir.as_std_path().is_dir() {
            return Err(HarvestError::ItemNotFound(category.to_string()));
        }
        Ok(list_dir_names(dir.as_std_path())?
            .into_iter()
            .filter(|name| name != IMAGE_POOL_DIR)
            .collect())
    }

    /// Media files of one extracted item, as `<item>/<file>` paths.
    pub fn manifest(
        &self,
        category: &Category,
        item: &str,
        filter: &FilterConfig,
    ) -> Result<ItemManifest, HarvestError> {
        let dir = self.item_dir(category, item);
        if item.contains(['/', '\\']) || !dir.as_std_path().is_dir() {
            return Err(HarvestError::ItemNotFound(format!("{category}/{item}")));
        }
        let mut manifest = ItemManifest::default();
        for path in walk_dir(dir.as_std_path())? {
            if !path.is_file() {
                continue;
            }
            let Ok(relative) = path.strip_prefix(dir.as_std_path()) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            let entry = format!("{item}/{relative}");
            match filter.classify(&relative) {
                Some(MediaKind::Image) => manifest.images.push(entry),
                Some(MediaKind::Audio) => manifest.songs.push(entry),
                None => {}
            }
        }
        manifest.images.sort();
        manifest.songs.sort();
        Ok(manifest)
    }
}

fn list_dir_names(dir: &Path) -> Result<Vec<String>, HarvestError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|err| HarvestError::Filesystem(err.to_string()))? {
        let entry = entry.map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Every path below `root`, directories included.
pub(crate) fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, HarvestError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| HarvestError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}
