use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info};
use zip::ZipArchive;

use crate::config::FilterConfig;
use crate::domain::{MediaKind, normalize_whitespace};
use crate::error::HarvestError;

const MAX_FILE_NAME_BYTES: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedMediaFile {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractReport {
    pub kept: Vec<ExtractedMediaFile>,
    pub removed: Vec<ExtractedMediaFile>,
    pub pooled: Vec<PathBuf>,
    /// Members skipped because their extension is not a recognized media type.
    pub ignored: usize,
}

/// Where one archive's media goes.
#[derive(Debug, Clone, Copy)]
pub struct ExtractTarget<'a> {
    pub item_dir: &'a Path,
    pub pool_dir: &'a Path,
    /// Prefix for pooled image names.
    pub name: &'a str,
}

/// Extracts recognized media members of `archive` into `target.item_dir`
/// under whitespace-normalized names, then applies the size filter.
///
/// Any member that cannot be extracted, renamed, filtered or pooled removes
/// the whole item directory along with its pooled copies and fails the
/// item; nothing is left half-extracted.
pub fn extract_media(
    archive: &Path,
    target: ExtractTarget<'_>,
    filter: &FilterConfig,
) -> Result<ExtractReport, HarvestError> {
    let mut report = ExtractReport::default();
    let result = extract_members(archive, target.item_dir, filter, &mut report)
        .and_then(|extracted| apply_size_filter(extracted, target, filter, &mut report));
    if let Err(err) = result {
        discard_item_dir(target.item_dir);
        for pooled in &report.pooled {
            let _ = fs::remove_file(pooled);
        }
        return Err(err);
    }

    info!(
        archive = %archive.display(),
        kept = report.kept.len(),
        removed = report.removed.len(),
        ignored = report.ignored,
        "archive extracted"
    );
    Ok(report)
}

fn apply_size_filter(
    extracted: Vec<(PathBuf, MediaKind)>,
    target: ExtractTarget<'_>,
    filter: &FilterConfig,
    report: &mut ExtractReport,
) -> Result<(), HarvestError> {
    let mut pool_names = HashSet::new();
    for (path, kind) in extracted {
        let size = fs::metadata(&path)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?
            .len();
        let file = ExtractedMediaFile { path, kind, size };
        if !filter.retains(kind, size) {
            debug!(path = %file.path.display(), size, %kind, "below size threshold");
            fs::remove_file(&file.path).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
            report.removed.push(file);
            continue;
        }
        if kind == MediaKind::Image {
            let pool_name = pool_file_name(&file.path, target, &mut pool_names)?;
            report.pooled.push(copy_to_pool(&file.path, target.pool_dir, &pool_name)?);
        }
        report.kept.push(file);
    }
    Ok(())
}

fn extract_members(
    archive: &Path,
    item_dir: &Path,
    filter: &FilterConfig,
    report: &mut ExtractReport,
) -> Result<Vec<(PathBuf, MediaKind)>, HarvestError> {
    let file = fs::File::open(archive)
        .map_err(|err| HarvestError::Extraction(format!("open zip {}: {err}", archive.display())))?;
    let mut zip = ZipArchive::new(file).map_err(|err| HarvestError::Extraction(err.to_string()))?;

    let mut extracted = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|err| HarvestError::Extraction(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let Some(kind) = filter.classify(&normalize_whitespace(entry.name())) else {
            report.ignored += 1;
            continue;
        };
        let Some(relative) = entry.enclosed_name() else {
            return Err(HarvestError::Extraction(format!(
                "unsafe member path: {}",
                entry.name()
            )));
        };

        let raw_path = item_dir.join(&relative);
        let renamed = item_dir.join(normalize_whitespace(&relative.to_string_lossy()));
        if extracted.iter().any(|(path, _)| *path == renamed) {
            return Err(HarvestError::Extraction(format!(
                "rename collision at {}",
                renamed.display()
            )));
        }
        if let Some(parent) = raw_path.parent() {
            fs::create_dir_all(parent).map_err(|err| HarvestError::Extraction(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&raw_path).map_err(|err| HarvestError::Extraction(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| HarvestError::Extraction(err.to_string()))?;
        drop(outfile);

        if renamed != raw_path {
            if let Err(err) = rename_member(&raw_path, &renamed) {
                error!(
                    from = %raw_path.display(),
                    to = %renamed.display(),
                    "rename failed, dropping item"
                );
                let _ = fs::remove_file(&raw_path);
                return Err(err);
            }
            prune_empty_parents(&raw_path, item_dir);
        }
        extracted.push((renamed, kind));
    }
    Ok(extracted)
}

fn rename_member(from: &Path, to: &Path) -> Result<(), HarvestError> {
    if to.exists() {
        return Err(HarvestError::Extraction(format!(
            "rename collision at {}",
            to.display()
        )));
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|err| HarvestError::Extraction(err.to_string()))?;
    }
    fs::rename(from, to).map_err(|err| HarvestError::Extraction(err.to_string()))
}

/// Removes directories left empty by a rename, stopping at `item_dir`.
fn prune_empty_parents(path: &Path, item_dir: &Path) {
    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == item_dir || !current.starts_with(item_dir) {
            break;
        }
        if fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
}

/// Picks `{name}-{file}` for a pooled image. When two members share a file
/// name the later one gets `{name}-{dir}-{file}`, then a numbered name.
fn pool_file_name(
    path: &Path,
    target: ExtractTarget<'_>,
    taken: &mut HashSet<String>,
) -> Result<String, HarvestError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| HarvestError::Filesystem(format!("no file name: {}", path.display())))?
        .to_string_lossy()
        .into_owned();
    let flattened = path
        .strip_prefix(target.item_dir)
        .unwrap_or(path)
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("-");

    let pool_name = [file_name.clone(), flattened]
        .into_iter()
        .chain((2usize..).map(|n| format!("{n}-{file_name}")))
        .map(|candidate| cap_file_name(format!("{}-{candidate}", target.name)))
        .find(|candidate| !taken.contains(candidate))
        .ok_or_else(|| HarvestError::Extraction(format!("no pool name for {}", path.display())))?;
    taken.insert(pool_name.clone());
    Ok(pool_name)
}

/// Shortens the stem so the name fits in `MAX_FILE_NAME_BYTES`, keeping the extension.
fn cap_file_name(name: String) -> String {
    if name.len() <= MAX_FILE_NAME_BYTES {
        return name;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{ext}")),
        None => (name.as_str(), String::new()),
    };
    let mut end = MAX_FILE_NAME_BYTES.saturating_sub(ext.len()).min(stem.len());
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{ext}", &stem[..end])
}

fn copy_to_pool(path: &Path, pool_dir: &Path, pool_name: &str) -> Result<PathBuf, HarvestError> {
    fs::create_dir_all(pool_dir).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    let pooled = pool_dir.join(pool_name);
    fs::copy(path, &pooled).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    Ok(pooled)
}

fn discard_item_dir(item_dir: &Path) {
    if item_dir.exists() {
        if let Err(err) = fs::remove_dir_all(item_dir) {
            error!(dir = %item_dir.display(), %err, "failed to remove partial extraction");
        }
    }
}
